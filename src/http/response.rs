//! Responses the dispatcher produces on its own.
//!
//! # Responsibilities
//! - Build rejection replies (bad request, rate limited, route disabled)
//! - Build terminal replies (no route, handler failure, timeout)
//!
//! # Design Decisions
//! - Every rejection goes through [`Reply`], so dispatcher output and
//!   handler output finalize the same way

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};

use crate::dispatch::{Reply, ReplyBody};

/// Header marking a 404 produced because no route claimed the request.
pub const INTERNAL_STATUS_CODE: HeaderName = HeaderName::from_static("internal-status-code");

/// JSON rejection body: `{"reason": .., "message": ..}`.
pub fn fail_reason(status: StatusCode, reason: &str, message: &str) -> Reply {
    let body = serde_json::json!({
        "reason": reason,
        "message": message,
    });
    Reply::new(ReplyBody::Json(body)).with_status(status)
}

pub fn bad_request() -> Reply {
    Reply::empty().with_status(StatusCode::BAD_REQUEST)
}

pub fn too_many_requests() -> Reply {
    Reply::failure(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
}

pub fn route_disabled(message: &str) -> Reply {
    fail_reason(StatusCode::UNAUTHORIZED, "Route Disabled", message)
}

pub fn not_found() -> Reply {
    Reply::empty()
        .with_status(StatusCode::NOT_FOUND)
        .with_header(INTERNAL_STATUS_CODE, HeaderValue::from_static("no-route"))
}

pub fn handler_failed(error: &anyhow::Error) -> Reply {
    Reply::failure(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

pub fn redirect_limit_exceeded() -> Reply {
    Reply::failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal redirect limit exceeded",
    )
}

/// The reply sent when the request-wide deadline fires.
///
/// Status stays 200; clients key off the body text.
pub fn timed_out(limit: Duration) -> Reply {
    Reply::text(format!("Request timed out after {}ms", limit.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(reply: Reply) -> String {
        let response = reply.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn route_disabled_is_json() {
        let reply = route_disabled("Chat is down");
        assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);

        let value: serde_json::Value = serde_json::from_str(&body_text(reply).await).unwrap();
        assert_eq!(value["reason"], "Route Disabled");
        assert_eq!(value["message"], "Chat is down");
    }

    #[tokio::test]
    async fn not_found_is_marked() {
        let reply = not_found();
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
        assert_eq!(reply.headers()[&INTERNAL_STATUS_CODE], "no-route");
        assert_eq!(body_text(reply).await, "");
    }

    #[tokio::test]
    async fn timeout_reports_limit() {
        let reply = timed_out(Duration::from_millis(1500));
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(body_text(reply).await, "Request timed out after 1500ms");
    }
}
