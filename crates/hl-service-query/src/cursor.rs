//! Paging cursor over hub query results.
//!
//! Each request carries `x-ms-continuation` (when resuming) and
//! `x-ms-max-item-count`; each response names its item kind in
//! `x-ms-item-type` and, when more pages remain, a fresh
//! `x-ms-continuation` token.

use std::time::Duration;

use reqwest::{Method, Response};
use url::Url;

use crate::error::{QueryError, QueryResult};
use crate::query::{QueryOptions, QueryRequestBody, QueryType, validate_query};

const HEADER_CONTINUATION: &str = "x-ms-continuation";
const HEADER_ITEM_TYPE: &str = "x-ms-item-type";
const HEADER_PAGE_SIZE: &str = "x-ms-max-item-count";
const HEADER_AUTHORIZATION: &str = "authorization";

/// Where and how a cursor sends its requests.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    client: reqwest::Client,
    url: Url,
    method: Method,
    authorization: Option<String>,
    timeout: Duration,
}

impl QueryRequest {
    pub fn new(client: reqwest::Client, url: Url, method: Method) -> Self {
        Self {
            client,
            url,
            method,
            authorization: None,
            timeout: Duration::from_secs(24),
        }
    }

    /// Value for the `authorization` header (a service SAS token).
    pub fn with_authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    items: Vec<serde_json::Value>,
    continuation_token: Option<String>,
}

impl QueryPage {
    fn parse(body: &str, continuation_token: Option<String>) -> QueryResult<Self> {
        if body.trim().is_empty() {
            return Err(QueryError::Io("query response body is empty".into()));
        }
        let items: Vec<serde_json::Value> = serde_json::from_str(body)?;
        Ok(Self {
            items,
            continuation_token,
        })
    }

    pub fn items(&self) -> &[serde_json::Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<serde_json::Value> {
        self.items
    }

    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }
}

/// Cursor over a SQL query or a non-SQL listing.
///
/// Call [`QueryCursor::send_query_request`] once to fetch the first page,
/// then alternate [`QueryCursor::has_next`] and [`QueryCursor::next`].
#[derive(Debug)]
pub struct QueryCursor {
    page_size: u32,
    query: Option<String>,
    request_type: QueryType,
    response_type: QueryType,
    page: Option<QueryPage>,
    request: Option<QueryRequest>,
    page_returned: bool,
}

impl QueryCursor {
    /// Cursor for a SQL query; the query must contain SELECT and FROM.
    pub fn sql(query: impl Into<String>, page_size: u32, request_type: QueryType) -> QueryResult<Self> {
        let query = query.into();
        validate_query(&query)?;
        let mut cursor = Self::listing(page_size, request_type)?;
        cursor.query = Some(query);
        Ok(cursor)
    }

    /// Cursor for a listing that posts no query text.
    pub fn listing(page_size: u32, request_type: QueryType) -> QueryResult<Self> {
        if page_size == 0 {
            return Err(QueryError::InvalidArgument(
                "page size cannot be zero".into(),
            ));
        }
        if request_type == QueryType::Unknown {
            return Err(QueryError::InvalidArgument(
                "cannot process an unknown type query".into(),
            ));
        }
        Ok(Self {
            page_size,
            query: None,
            request_type,
            response_type: QueryType::Unknown,
            page: None,
            request: None,
            page_returned: false,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn request_type(&self) -> QueryType {
        self.request_type
    }

    /// Item kind the hub reported for the latest page.
    pub fn response_type(&self) -> QueryType {
        self.response_type
    }

    /// Token for the page after the latest one, if any.
    pub fn continuation_token(&self) -> Option<&str> {
        self.page.as_ref().and_then(QueryPage::continuation_token)
    }

    /// Fetch a page and remember `request` for later pages.
    ///
    /// The continuation token comes from `options` when it names one,
    /// otherwise from the latest page. The page size comes from `options`
    /// when given, otherwise from the cursor.
    pub async fn send_query_request(
        &mut self,
        request: QueryRequest,
        options: Option<&QueryOptions>,
    ) -> QueryResult<&QueryPage> {
        let continuation = options
            .and_then(QueryOptions::continuation_token)
            .map(str::to_string)
            .or_else(|| self.continuation_token().map(str::to_string));
        let page_size = options.map_or(self.page_size, QueryOptions::page_size);

        let body = match &self.query {
            Some(query) => serde_json::to_vec(&QueryRequestBody { query })?,
            None => Vec::new(),
        };

        let mut builder = request
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout)
            .header(HEADER_PAGE_SIZE, page_size.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &continuation {
            builder = builder.header(HEADER_CONTINUATION, token);
        }
        if let Some(auth) = &request.authorization {
            builder = builder.header(HEADER_AUTHORIZATION, auth);
        }
        self.request = Some(request);

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "query request rejected");
            return Err(QueryError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let (next_token, response_type) = read_paging_headers(&response);
        self.response_type = response_type;
        if response_type == QueryType::Unknown {
            return Err(QueryError::Io(
                "query response type is not defined by the hub".into(),
            ));
        }
        if response_type != self.request_type {
            return Err(QueryError::Io(format!(
                "query response type {response_type} does not match request type {}",
                self.request_type
            )));
        }

        let body = response.text().await?;
        let page = QueryPage::parse(&body, next_token)?;
        tracing::debug!(
            items = page.items().len(),
            more = page.continuation_token().is_some(),
            item_type = %response_type,
            "query page received"
        );
        Ok(self.page.insert(page))
    }

    /// Whether another page is available, fetching it when the latest page
    /// was already returned and the hub left a continuation token.
    pub async fn has_next(&mut self) -> QueryResult<bool> {
        self.advance(None).await
    }

    /// Like [`QueryCursor::has_next`], resuming from the options' token
    /// when it names one.
    pub async fn has_next_with(&mut self, options: &QueryOptions) -> QueryResult<bool> {
        self.advance(Some(options)).await
    }

    /// Return the next page, or `None` when the results are exhausted.
    pub async fn next(&mut self) -> QueryResult<Option<&QueryPage>> {
        if !self.advance(None).await? {
            return Ok(None);
        }
        self.page_returned = true;
        Ok(self.page.as_ref())
    }

    pub async fn next_with(&mut self, options: &QueryOptions) -> QueryResult<Option<&QueryPage>> {
        if !self.advance(Some(options)).await? {
            return Ok(None);
        }
        self.page_returned = true;
        Ok(self.page.as_ref())
    }

    async fn advance(&mut self, options: Option<&QueryOptions>) -> QueryResult<bool> {
        if !self.page_returned {
            return Ok(self.page.is_some());
        }

        let explicit = options.and_then(QueryOptions::continuation_token).is_some();
        if !explicit && self.continuation_token().is_none() {
            return Ok(false);
        }

        let request = self.request.clone().ok_or_else(|| {
            QueryError::InvalidArgument("no query request has been sent".into())
        })?;
        // Without an explicit token the saved one is used.
        let options = options.filter(|_| explicit);
        self.send_query_request(request, options).await?;
        self.page_returned = false;
        Ok(true)
    }
}

fn read_paging_headers(response: &Response) -> (Option<String>, QueryType) {
    let headers = response.headers();
    let continuation = headers
        .get(HEADER_CONTINUATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let item_type = headers
        .get(HEADER_ITEM_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(QueryType::Unknown, QueryType::from_header);
    (continuation, item_type)
}
