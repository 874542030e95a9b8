use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use formats::feature::feature_collection_value;
use formats::page::{clamp_limit, decode_cursor, encode_cursor, CursorError, PageBody};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::store::{Pool, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
}

/// Raw query values; parsing is lenient so a bad `limit` falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Error)]
pub enum PageRequestError {
    #[error("invalid cursor: {0}")]
    Cursor(#[from] CursorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

pub async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

pub async fn get_geojson(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageBody>, (StatusCode, Json<Value>)> {
    load_page(&state.pool, &query).await.map(Json).map_err(|e| {
        error!("page request failed: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// One keyset page: rows with `id > cursor`, ascending, at most `limit`.
///
/// `nextCursor` is present iff the page is full, so a store whose size is a
/// multiple of `limit` ends with one empty page.
pub async fn load_page(pool: &Pool, query: &PageQuery) -> Result<PageBody, PageRequestError> {
    let limit = clamp_limit(query.limit.as_deref());
    let after = match query.cursor.as_deref().filter(|c| !c.is_empty()) {
        Some(token) => Some(decode_cursor(token)?),
        None => None,
    };

    let conn = pool.acquire().await?;
    let rows = conn.page_after(after, limit).await?;
    drop(conn);

    let next_cursor = match rows.last() {
        Some(last) if rows.len() == limit => Some(encode_cursor(last.id).to_string()),
        _ => None,
    };
    debug!(?after, limit, rows = rows.len(), more = next_cursor.is_some(), "served page");

    Ok(PageBody {
        features: feature_collection_value(rows.iter()),
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::{load_page, PageQuery, PageRequestError};
    use crate::store::{MemoryStore, Pool};
    use formats::feature::{Feature, FeatureCollection};
    use formats::page::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
    use pretty_assertions::assert_eq;
    use serde_json::Map;
    use std::sync::Arc;

    fn pool(n: u64) -> Pool {
        let rows = (1..=n).map(|id| Feature::new(id, Map::new(), None));
        Pool::new(Arc::new(MemoryStore::new(rows)), 2)
    }

    fn query(limit: Option<&str>, cursor: Option<&str>) -> PageQuery {
        PageQuery {
            limit: limit.map(str::to_string),
            cursor: cursor.map(str::to_string),
        }
    }

    fn ids(body: &formats::page::PageBody) -> Vec<u64> {
        FeatureCollection::from_geojson_value(&body.features)
            .expect("collection")
            .features
            .iter()
            .map(|f| f.id)
            .collect()
    }

    #[tokio::test]
    async fn walks_all_rows_with_cursors() {
        let pool = pool(12);
        let mut cursor: Option<String> = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let body = load_page(&pool, &query(Some("5"), cursor.as_deref()))
                .await
                .expect("page");
            pages += 1;
            seen.extend(ids(&body));
            match body.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, (1..=12).collect::<Vec<u64>>());
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn exact_multiple_ends_with_empty_page() {
        let pool = pool(10);
        let second = load_page(&pool, &query(Some("5"), Some("NQ"))).await.expect("page");
        assert_eq!(ids(&second), vec![6, 7, 8, 9, 10]);
        let cursor = second.next_cursor.expect("full page has a cursor");
        assert_eq!(cursor, "MTA");

        let last = load_page(&pool, &query(Some("5"), Some(&cursor))).await.expect("page");
        assert!(ids(&last).is_empty());
        assert_eq!(last.next_cursor, None);
    }

    #[tokio::test]
    async fn bad_limit_uses_default() {
        let pool = pool(3);
        let body = load_page(&pool, &query(Some("lots"), None)).await.expect("page");
        assert_eq!(ids(&body).len(), 3);
        assert_eq!(body.next_cursor, None);
        assert!(DEFAULT_PAGE_LIMIT <= MAX_PAGE_LIMIT);
    }

    #[tokio::test]
    async fn undecodable_cursor_is_an_error() {
        let pool = pool(3);
        let err = load_page(&pool, &query(None, Some("%%%"))).await.unwrap_err();
        assert!(matches!(err, PageRequestError::Cursor(_)));
    }

    #[tokio::test]
    async fn empty_cursor_means_first_page() {
        let pool = pool(3);
        let body = load_page(&pool, &query(Some("2"), Some(""))).await.expect("page");
        assert_eq!(ids(&body), vec![1, 2]);
        assert_eq!(body.next_cursor.as_deref(), Some("Mg"));
    }
}
