//! Request inspection helpers.
//!
//! # Responsibilities
//! - Resolve the request ID (propagated header or a fresh UUID)
//! - Validate the request target before routing sees it
//! - Read request bodies under a size limit
//!
//! # Design Decisions
//! - Bodies are read lazily, only when a handler asks for them
//! - A body can be taken once; later reads report `AlreadyConsumed`

use axum::body::Body;
use axum::http::{HeaderMap, Uri};
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Header carrying the request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Errors reading a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("Request body has already been consumed")]
    AlreadyConsumed,

    #[error("Failed to read request body (limit {limit} bytes): {reason}")]
    Read { limit: usize, reason: String },

    #[error("Request body is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// The request ID set by the request-id layer, or a new one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Path-and-query form of the URI, as routes see it.
///
/// Returns `None` when the target is not origin-form (does not start with `/`).
pub fn routing_target(uri: &Uri) -> Option<String> {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    if target.starts_with('/') {
        Some(target.to_string())
    } else {
        None
    }
}

pub async fn read_bytes(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| BodyError::Read {
            limit,
            reason: e.to_string(),
        })
}

pub async fn read_string(body: Body, limit: usize) -> Result<String, BodyError> {
    let bytes = read_bytes(body, limit).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

pub async fn read_json<T: DeserializeOwned>(body: Body, limit: usize) -> Result<T, BodyError> {
    let bytes = read_bytes(body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_id_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), "abc-123");

        let generated = request_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn routing_target_keeps_query() {
        let uri: Uri = "/api/users?page=2".parse().unwrap();
        assert_eq!(routing_target(&uri).as_deref(), Some("/api/users?page=2"));

        let uri: Uri = "http://example.com/x".parse().unwrap();
        assert_eq!(routing_target(&uri).as_deref(), Some("/x"));

        let uri: Uri = "*".parse().unwrap();
        assert_eq!(routing_target(&uri), None);
    }

    #[tokio::test]
    async fn bodies_respect_limit() {
        let text = read_string(Body::from("hello"), 16).await.unwrap();
        assert_eq!(text, "hello");

        let err = read_bytes(Body::from("0123456789"), 4).await.unwrap_err();
        assert!(matches!(err, BodyError::Read { limit: 4, .. }));
    }

    #[tokio::test]
    async fn json_bodies_decode() {
        #[derive(Debug, serde::Deserialize)]
        struct Login {
            user: String,
        }

        let login: Login = read_json(Body::from(r#"{"user":"alice"}"#), 64).await.unwrap();
        assert_eq!(login.user, "alice");

        let err = read_json::<Login>(Body::from("nope"), 64).await.unwrap_err();
        assert!(matches!(err, BodyError::InvalidJson(_)));
    }
}
