//! Error types for service queries.

/// Errors from building or paging a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The hub answered with something the cursor cannot page through.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hub returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("malformed query response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience alias for query results.
pub type QueryResult<T> = Result<T, QueryError>;
