//! Paginated fetcher for the feature endpoint.

use formats::page::{Cursor, ErrorBody, Page};
use runtime::scheduler::BoxFuture;

use crate::error::NetworkError;

/// Source of feature pages.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait PageFetcher: Send + Sync {
    /// Fetch the page after `cursor`, or the first page when `None`.
    ///
    /// A returned page without `next_cursor` is the last one.
    fn fetch_page<'a>(&'a self, cursor: Option<&'a Cursor>)
    -> BoxFuture<'a, Result<Page, NetworkError>>;
}

/// `GET {endpoint}?limit=N[&cursor=C]` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    endpoint: String,
    page_size: usize,
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(endpoint: impl Into<String>, page_size: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            page_size: page_size.max(1),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, cursor: Option<&Cursor>) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(&self.endpoint)
            .query(&[("limit", self.page_size.to_string())]);
        match cursor {
            Some(c) => req.query(&[("cursor", c.as_str())]),
            None => req,
        }
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch_page<'a>(
        &'a self,
        cursor: Option<&'a Cursor>,
    ) -> BoxFuture<'a, Result<Page, NetworkError>> {
        let req = self.request(cursor);
        Box::pin(async move {
            let resp = req
                .send()
                .await
                .map_err(|e| NetworkError::Transport(e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| NetworkError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(status_error(status.as_u16(), &body));
            }
            Ok(Page::from_json_str(&body)?)
        })
    }
}

/// Prefer the server's `{ "error": ... }` message over the bare status.
fn status_error(status: u16, body: &str) -> NetworkError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_string()
        });
    NetworkError::Status { status, message }
}
