//! The per-request handle given to context providers and route actions.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextError, RequestContext};
use crate::http::request::{self, BodyError};
use crate::resilience::Deadline;

/// A request in flight.
///
/// Cloning is cheap; every clone refers to the same request, context and
/// deadline. The exchange is dropped once the response has been finalized.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<Inner>,
}

struct Inner {
    request_id: String,
    method: Method,
    headers: HeaderMap,
    original_target: String,
    target: RwLock<String>,
    remote_addr: Option<SocketAddr>,
    worker_id: Option<usize>,
    body: Mutex<Option<Body>>,
    body_limit: usize,
    context: RequestContext,
    deadline: Deadline,
}

impl Exchange {
    pub(crate) fn new(
        request: Request<Body>,
        target: String,
        remote_addr: Option<SocketAddr>,
        worker_id: Option<usize>,
        body_limit: usize,
        deadline: Deadline,
    ) -> Self {
        let (parts, body) = request.into_parts();
        let request_id = request::request_id(&parts.headers);

        Self {
            inner: Arc::new(Inner {
                request_id,
                method: parts.method,
                headers: parts.headers,
                original_target: target.clone(),
                target: RwLock::new(target),
                remote_addr,
                worker_id,
                body: Mutex::new(Some(body)),
                body_limit,
                context: RequestContext::new(),
                deadline,
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The target the client asked for, before any internal redirect.
    pub fn original_target(&self) -> &str {
        &self.inner.original_target
    }

    /// The target routes are currently matched against (path plus query).
    pub fn target(&self) -> String {
        self.inner
            .target
            .read()
            .expect("exchange target lock poisoned")
            .clone()
    }

    pub fn path(&self) -> String {
        let target = self.target();
        match target.split_once('?') {
            Some((path, _)) => path.to_string(),
            None => target,
        }
    }

    pub fn query(&self) -> Option<String> {
        self.target()
            .split_once('?')
            .map(|(_, query)| query.to_string())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Worker slot serving this request, when running under the supervisor.
    pub fn worker_id(&self) -> Option<usize> {
        self.inner.worker_id
    }

    pub(crate) fn rewrite_target(&self, target: String) {
        let mut current = self
            .inner
            .target
            .write()
            .expect("exchange target lock poisoned");
        *current = target;
    }

    /// Disable the request-wide timeout for the rest of this request.
    pub fn lift_response_timeout(&self) {
        self.inner.deadline.lift();
    }

    pub fn is_timeout_lifted(&self) -> bool {
        self.inner.deadline.is_lifted()
    }

    /// Cancelled when the request-wide timeout fires.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.deadline.cancellation()
    }

    pub(crate) fn deadline(&self) -> &Deadline {
        &self.inner.deadline
    }

    pub fn context(&self) -> &RequestContext {
        &self.inner.context
    }

    pub fn context_value<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.inner.context.get(key)
    }

    pub fn required_context_value<T>(&self, key: &str) -> Result<Arc<T>, ContextError>
    where
        T: Any + Send + Sync,
    {
        self.inner.context.get_required(key)
    }

    pub fn set_context_value<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.inner.context.set(key, value);
    }

    pub fn init_context_value<T>(&self, key: impl Into<String>, value: T) -> Result<(), ContextError>
    where
        T: Any + Send + Sync,
    {
        self.inner.context.init(key, value)
    }

    /// Take the raw request body. Returns `None` once it has been taken.
    pub fn take_body(&self) -> Option<Body> {
        self.inner
            .body
            .lock()
            .expect("exchange body mutex poisoned")
            .take()
    }

    fn body_or_consumed(&self) -> Result<Body, BodyError> {
        self.take_body().ok_or(BodyError::AlreadyConsumed)
    }

    pub async fn read_body_bytes(&self) -> Result<Bytes, BodyError> {
        request::read_bytes(self.body_or_consumed()?, self.inner.body_limit).await
    }

    pub async fn read_body_string(&self) -> Result<String, BodyError> {
        request::read_string(self.body_or_consumed()?, self.inner.body_limit).await
    }

    pub async fn read_body_json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        request::read_json(self.body_or_consumed()?, self.inner.body_limit).await
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: &str, target: &str) -> Self {
        let request = Request::builder()
            .method(method)
            .uri(target)
            .body(Body::empty())
            .unwrap();
        Self::new(
            request,
            target.to_string(),
            Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
            None,
            1024 * 1024,
            Deadline::arm(std::time::Duration::from_secs(60)),
        )
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("request_id", &self.inner.request_id)
            .field("method", &self.inner.method)
            .field("target", &self.target())
            .field("remote_addr", &self.inner.remote_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn target_parts() {
        let exchange = Exchange::for_test("GET", "/api/users?page=2");
        assert_eq!(exchange.path(), "/api/users");
        assert_eq!(exchange.query().as_deref(), Some("page=2"));

        exchange.rewrite_target("/index.html".into());
        assert_eq!(exchange.target(), "/index.html");
        assert_eq!(exchange.query(), None);
        assert_eq!(exchange.original_target(), "/api/users?page=2");
    }

    #[test]
    fn request_id_is_propagated() {
        let request = Request::builder()
            .uri("/")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap();
        let exchange = Exchange::new(
            request,
            "/".into(),
            None,
            Some(3),
            64,
            Deadline::arm(Duration::from_secs(1)),
        );
        assert_eq!(exchange.request_id(), "req-42");
        assert_eq!(exchange.worker_id(), Some(3));
    }

    #[tokio::test]
    async fn body_reads_once() {
        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .body(Body::from(r#"{"user":"alice"}"#))
            .unwrap();
        let exchange = Exchange::new(
            request,
            "/login".into(),
            None,
            None,
            1024,
            Deadline::arm(Duration::from_secs(1)),
        );

        let value: serde_json::Value = exchange.read_body_json().await.unwrap();
        assert_eq!(value["user"], "alice");
        assert!(matches!(
            exchange.read_body_string().await,
            Err(BodyError::AlreadyConsumed)
        ));
    }

    #[test]
    fn clones_share_context_and_deadline() {
        let exchange = Exchange::for_test("GET", "/");
        let clone = exchange.clone();

        clone.set_context_value("authenticated", true);
        clone.lift_response_timeout();

        assert_eq!(exchange.context_value::<bool>("authenticated").as_deref(), Some(&true));
        assert!(exchange.is_timeout_lifted());
        assert!(exchange.init_context_value("authenticated", false).is_err());
    }
}
