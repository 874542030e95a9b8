//! Wire format of the paginated feature endpoint.
//!
//! `GET /api/geojson?limit=<n>&cursor=<token>` answers with
//! `{ "features": <FeatureCollection>, "nextCursor"?: <token> }`; a page
//! without `nextCursor` is the last one. Failures answer `{ "error": <msg> }`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::feature::{CollectionError, Feature, FeatureCollection};

/// Default number of features per page.
pub const DEFAULT_PAGE_LIMIT: usize = 5000;
/// Largest page the server will produce.
pub const MAX_PAGE_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBody {
    pub features: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Opaque continuation token. Clients only echo it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub features: Vec<Feature>,
    /// Entries in the collection that were not valid features.
    pub rejected: usize,
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Collection(#[from] CollectionError),
}

impl Page {
    pub fn new(features: Vec<Feature>, next_cursor: Option<Cursor>) -> Self {
        Self {
            features,
            rejected: 0,
            next_cursor,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    pub fn from_json_str(payload: &str) -> Result<Self, PageError> {
        let body: PageBody = serde_json::from_str(payload)?;
        Self::from_body(body)
    }

    pub fn from_body(body: PageBody) -> Result<Self, PageError> {
        let fc = FeatureCollection::from_geojson_value(&body.features)?;
        Ok(Self {
            features: fc.features,
            rejected: fc.rejected,
            // An empty token is treated the same as an absent one.
            next_cursor: body.next_cursor.filter(|c| !c.is_empty()).map(Cursor),
        })
    }
}

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("cursor does not wrap a record id")]
    NotAnId,
}

/// Wrap the last-returned record id into a cursor token.
pub fn encode_cursor(last_id: u64) -> Cursor {
    Cursor(URL_SAFE_NO_PAD.encode(last_id.to_string()))
}

/// Recover the record id from a cursor token. Padding is tolerated.
pub fn decode_cursor(token: &str) -> Result<u64, CursorError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim_end_matches('='))?;
    let text = std::str::from_utf8(&bytes).map_err(|_| CursorError::NotAnId)?;
    text.trim().parse().map_err(|_| CursorError::NotAnId)
}

/// Parse a `limit` query value, falling back to the default and clamping to
/// `[1, MAX_PAGE_LIMIT]`.
pub fn clamp_limit(raw: Option<&str>) -> usize {
    let requested = raw
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_PAGE_LIMIT as i64);
    requested.clamp(1, MAX_PAGE_LIMIT as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::{
        Cursor, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, Page, PageError, clamp_limit, decode_cursor,
        encode_cursor,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_page_with_cursor() {
        let payload = r#"{
            "features": { "type": "FeatureCollection", "features": [
                { "type": "Feature", "id": 1, "properties": {},
                  "geometry": { "type": "Point", "coordinates": [1, 2] } }
            ] },
            "nextCursor": "MQ"
        }"#;
        let page = Page::from_json_str(payload).expect("page");
        assert_eq!(page.features.len(), 1);
        assert_eq!(page.next_cursor, Some(Cursor::new("MQ")));
        assert!(page.has_more());
    }

    #[test]
    fn missing_or_empty_cursor_ends_stream() {
        let payload = r#"{ "features": { "type": "FeatureCollection", "features": [] } }"#;
        assert!(!Page::from_json_str(payload).expect("page").has_more());

        let payload =
            r#"{ "features": { "type": "FeatureCollection", "features": [] }, "nextCursor": "" }"#;
        assert!(!Page::from_json_str(payload).expect("page").has_more());
    }

    #[test]
    fn rejects_non_collection_body() {
        let err = Page::from_json_str(r#"{ "features": [] }"#).unwrap_err();
        assert!(matches!(err, PageError::Collection(_)));

        let err = Page::from_json_str("not json").unwrap_err();
        assert!(matches!(err, PageError::Json(_)));
    }

    #[test]
    fn cursor_wraps_decimal_id() {
        let c = encode_cursor(12345);
        // base64url("12345") without padding.
        assert_eq!(c.as_str(), "MTIzNDU");
        assert_eq!(decode_cursor(c.as_str()).expect("decode"), 12345);
        assert_eq!(decode_cursor("MTIzNDU=").expect("padded"), 12345);
    }

    #[test]
    fn garbage_cursor_is_an_error() {
        assert!(decode_cursor("!!!").is_err());
        // base64url("abc")
        assert!(decode_cursor("YWJj").is_err());
    }

    #[test]
    fn limit_is_defaulted_and_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some("abc")), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some("0")), 1);
        assert_eq!(clamp_limit(Some("-5")), 1);
        assert_eq!(clamp_limit(Some("250")), 250);
        assert_eq!(clamp_limit(Some("999999")), MAX_PAGE_LIMIT);
    }
}
