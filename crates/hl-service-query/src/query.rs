//! Query kinds, paging options, and SQL validation.

use std::fmt;

use serde::Serialize;

use crate::error::{QueryError, QueryResult};

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Kind of item a query returns, as named by the `x-ms-item-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Twin,
    DeviceJob,
    JobResponse,
    Raw,
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twin => "twin",
            Self::DeviceJob => "deviceJob",
            Self::JobResponse => "jobResponse",
            Self::Raw => "raw",
            Self::Unknown => "unknown",
        }
    }

    /// Parse an `x-ms-item-type` value. Unrecognized names map to `Unknown`.
    pub fn from_header(value: &str) -> Self {
        [Self::Twin, Self::DeviceJob, Self::JobResponse, Self::Raw]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(value.trim()))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request paging overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    continuation_token: Option<String>,
    page_size: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            continuation_token: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> QueryResult<Self> {
        if page_size == 0 {
            return Err(QueryError::InvalidArgument(
                "page size cannot be zero".into(),
            ));
        }
        self.page_size = page_size;
        Ok(self)
    }

    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// JSON body of a SQL query request.
#[derive(Debug, Serialize)]
pub(crate) struct QueryRequestBody<'a> {
    pub query: &'a str,
}

/// Require a query that names both SELECT and FROM.
pub fn validate_query(query: &str) -> QueryResult<()> {
    if query.trim().is_empty() {
        return Err(QueryError::InvalidArgument("query cannot be empty".into()));
    }
    let has_keyword = |keyword: &str| {
        query
            .split_whitespace()
            .any(|word| word.eq_ignore_ascii_case(keyword))
    };
    if !has_keyword("select") || !has_keyword("from") {
        return Err(QueryError::InvalidArgument(format!(
            "query must contain SELECT and FROM: {query}"
        )));
    }
    Ok(())
}
