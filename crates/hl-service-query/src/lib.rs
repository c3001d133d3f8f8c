//! Service-side query paging.
//!
//! - `QueryCursor`: pages SQL queries and listings through
//!   `x-ms-continuation` tokens
//! - `QueryOptions` / `QueryType`: per-request overrides and item kinds

pub mod cursor;
pub mod error;
pub mod query;

pub use cursor::{QueryCursor, QueryPage, QueryRequest};
pub use error::{QueryError, QueryResult};
pub use query::{DEFAULT_PAGE_SIZE, QueryOptions, QueryType, validate_query};
