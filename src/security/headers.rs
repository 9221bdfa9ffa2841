//! Response headers added to every reply.
//!
//! # Responsibilities
//! - Allow cross-origin requests (`access-control-allow-origin: *`)
//! - Tag responses with the worker that produced them (`cluster-id`)
//!
//! # Design Decisions
//! - Handlers may override CORS; `cluster-id` always reflects the real worker
//! - No `connection` header: keep-alive is negotiated by the HTTP layer and
//!   the header is illegal on HTTP/2

use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

/// Header carrying the worker id in cluster mode.
pub const CLUSTER_ID: HeaderName = HeaderName::from_static("cluster-id");

/// Wrap `router` with the standard response headers.
pub fn apply_response_headers(router: Router, worker_id: Option<usize>) -> Router {
    let router = router.layer(SetResponseHeaderLayer::if_not_present(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    ));

    match worker_id {
        Some(id) => router.layer(SetResponseHeaderLayer::overriding(
            CLUSTER_ID,
            HeaderValue::from(id),
        )),
        None => router,
    }
}
