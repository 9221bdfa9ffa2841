//! The dispatch loop.
//!
//! # Responsibilities
//! - Arm the request-wide deadline before anything else
//! - Turn away malformed, rate-limited and restricted requests
//! - Run context providers once, then scan routes in priority order
//! - Honor fallthrough and internal redirect signals from handlers
//! - Finalize exactly one response per request
//!
//! # Design Decisions
//! - Each scanning pass works on one registry snapshot
//! - A redirect restarts matching from the highest priority with a fresh
//!   snapshot; the number of redirects per request is capped
//! - The deadline races the whole provider + scan future. When it wins the
//!   future is dropped, so a late handler result can never be sent

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::FutureExt;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::context::{ContextProviderRegistry, ProvideContext};
use crate::dispatch::exchange::Exchange;
use crate::dispatch::outcome::Outcome;
use crate::dispatch::reply::Reply;
use crate::dispatch::tracker::RequestTracker;
use crate::http::{request, response};
use crate::observability::metrics;
use crate::resilience::Deadline;
use crate::routing::{RouteAction, RouteId, RouteRegistry, RouteSpec};
use crate::security::{PathRestrictorCache, RateDecision, RateLimiter};

/// Per-worker dispatch limits.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub maximum_request_time: Duration,
    pub max_internal_redirects: usize,
    pub max_body_size: usize,
    pub collect_all_timings: bool,
    pub worker_id: Option<usize>,
}

impl DispatchSettings {
    pub fn from_config(config: &ServerConfig, worker_id: Option<usize>) -> Self {
        Self {
            maximum_request_time: config.server.maximum_request_time(),
            max_internal_redirects: config.server.max_internal_redirects,
            max_body_size: config.server.max_body_size,
            collect_all_timings: config.server.collect_all_timings,
            worker_id,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default(), None)
    }
}

/// Routes requests to registered handlers.
pub struct Dispatcher {
    routes: Arc<RouteRegistry>,
    providers: Arc<ContextProviderRegistry>,
    rate_limiter: Arc<RateLimiter>,
    restrictors: Arc<PathRestrictorCache>,
    tracker: RequestTracker,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// A dispatcher with no routes, no providers, no rate limiting and no
    /// restrictions.
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            routes: Arc::new(RouteRegistry::new()),
            providers: Arc::new(ContextProviderRegistry::new()),
            rate_limiter: Arc::new(RateLimiter::disabled()),
            restrictors: Arc::new(PathRestrictorCache::new()),
            tracker: RequestTracker::new(),
            settings,
        }
    }

    /// A dispatcher wired from configuration.
    pub fn from_config(config: &ServerConfig, worker_id: Option<usize>) -> Self {
        Self::new(DispatchSettings::from_config(config, worker_id))
            .with_rate_limiter(Arc::new(RateLimiter::new(config.rate_limit.clone())))
            .with_restrictors(Arc::new(PathRestrictorCache::from_rules(
                &config.restrictions.rules,
            )))
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_restrictors(mut self, restrictors: Arc<PathRestrictorCache>) -> Self {
        self.restrictors = restrictors;
        self
    }

    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    pub fn providers(&self) -> &Arc<ContextProviderRegistry> {
        &self.providers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn restrictors(&self) -> &Arc<PathRestrictorCache> {
        &self.restrictors
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn register<A>(&self, spec: RouteSpec, action: A) -> RouteId
    where
        A: RouteAction + 'static,
    {
        self.routes.register(spec, action)
    }

    pub fn register_provider<P>(&self, name: impl Into<String>, provider: P)
    where
        P: ProvideContext + 'static,
    {
        self.providers.register(name, provider);
    }

    /// Dispatch one request to completion.
    pub async fn dispatch(&self, request: Request<Body>, remote_addr: Option<SocketAddr>) -> Response {
        let start = Instant::now();
        let deadline = Deadline::arm(self.settings.maximum_request_time);
        let guard = self.tracker.track();
        let method = request.method().clone();

        let (remote_addr, target) = match (remote_addr, request::routing_target(request.uri())) {
            (Some(addr), Some(target)) => (addr, target),
            (addr, _) => {
                tracing::debug!(
                    remote_addr = ?addr,
                    uri = %request.uri(),
                    "Rejecting request without source address or origin-form target"
                );
                metrics::record_rejection("bad_request");
                return self.finish(response::bad_request(), method.as_str(), start);
            }
        };

        let exchange = Exchange::new(
            request,
            target,
            Some(remote_addr),
            self.settings.worker_id,
            self.settings.max_body_size,
            deadline,
        );

        let span = tracing::info_span!(
            "request",
            id = %exchange.request_id(),
            seq = guard.sequence(),
            method = %method,
            target = %exchange.original_target(),
            worker = ?self.settings.worker_id,
        );

        let reply = self.process(&exchange, remote_addr).instrument(span.clone()).await;
        let response = span.in_scope(|| self.finish(reply, method.as_str(), start));
        drop(guard);
        response
    }

    async fn process(&self, exchange: &Exchange, remote_addr: SocketAddr) -> Reply {
        if let Some(rejection) = self.admit(exchange, remote_addr) {
            return rejection;
        }

        let deadline = exchange.deadline();
        tokio::select! {
            reply = self.run(exchange) => reply,
            _ = deadline.expired() => {
                tracing::warn!(
                    limit_ms = deadline.limit().as_millis() as u64,
                    elapsed_ms = deadline.elapsed().as_millis() as u64,
                    target = %exchange.target(),
                    "Request timed out"
                );
                metrics::record_rejection("timed_out");
                response::timed_out(deadline.limit())
            }
        }
    }

    /// Pre-routing checks: rate limit, then path restrictions.
    fn admit(&self, exchange: &Exchange, remote_addr: SocketAddr) -> Option<Reply> {
        let source = remote_addr.ip().to_string();
        if let RateDecision::Limited { count } = self.rate_limiter.check(&source) {
            tracing::debug!(source = %source, count, "Rate limit exceeded");
            metrics::record_rejection("rate_limited");
            return Some(response::too_many_requests());
        }

        let target = exchange.target();
        if let Some(message) = self.restrictors.check(&target) {
            tracing::debug!(target = %target, message = %message, "Path restricted");
            metrics::record_rejection("route_disabled");
            return Some(response::route_disabled(&message));
        }

        None
    }

    /// Providers, then scanning passes until a handler responds.
    async fn run(&self, exchange: &Exchange) -> Reply {
        let failures = self.providers.populate_all(exchange).await;
        if failures > 0 {
            tracing::debug!(failures, "Continuing after context provider failures");
        }

        let mut redirects = 0usize;

        'scan: loop {
            let handlers = self.routes.snapshot();
            let target = exchange.target();

            for handler in handlers.iter() {
                if !handler.matches(exchange.method(), &target) {
                    continue;
                }

                let result = match AssertUnwindSafe(handler.invoke(exchange.clone()))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        metrics::record_signal("panic");
                        Err(anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref())))
                    }
                };
                if let Ok(outcome) = &result {
                    metrics::record_signal(outcome.kind());
                }

                match result {
                    Ok(Outcome::Respond(reply)) => return reply,
                    Ok(Outcome::Fallthrough(reason)) => {
                        tracing::trace!(route = %handler.id(), reason = ?reason, "Handler fell through");
                    }
                    Ok(Outcome::Redirect(next)) => {
                        redirects += 1;
                        if redirects > self.settings.max_internal_redirects {
                            tracing::error!(
                                route = %handler.id(),
                                redirects,
                                "Internal redirect limit exceeded"
                            );
                            return response::redirect_limit_exceeded();
                        }

                        tracing::debug!(route = %handler.id(), from = %target, to = %next, "Internal redirect");
                        exchange.rewrite_target(next);
                        continue 'scan;
                    }
                    Err(e) => {
                        tracing::error!(
                            route = %handler.id(),
                            method = %exchange.method(),
                            target = %target,
                            error = %e,
                            "Route handler failed"
                        );
                        return response::handler_failed(&e);
                    }
                }
            }

            tracing::debug!(target = %target, "No route claimed request");
            return response::not_found();
        }
    }

    fn finish(&self, reply: Reply, method: &str, start: Instant) -> Response {
        let status = reply.status();
        metrics::record_request(method, status.as_u16(), start);

        if self.settings.collect_all_timings {
            tracing::info!(
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
        }

        reply.into_response()
    }
}

/// Text carried by a panic payload, when it is a string.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RestrictionRule};
    use crate::dispatch::HandlerResult;
    use axum::http::{Method, StatusCode};
    use std::sync::Mutex;

    fn client() -> Option<SocketAddr> {
        Some(SocketAddr::from(([10, 0, 0, 7], 51000)))
    }

    fn get(target: &str) -> Request<Body> {
        Request::builder().uri(target).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn route(pattern: &str) -> RouteSpec {
        RouteSpec::new(pattern).unwrap()
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        for priority in [0, -999, 5] {
            let order = order.clone();
            dispatcher.register(route("^/").priority(priority), move |_ex: Exchange| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(priority);
                    Ok(Outcome::fallthrough())
                }
            });
        }

        let response = dispatcher.dispatch(get("/anything"), client()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["internal-status-code"], "no-route");
        assert_eq!(*order.lock().unwrap(), vec![5, 0, -999]);
    }

    #[tokio::test]
    async fn fallthrough_continues_to_next_match() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register(route("^/page").priority(10), |_ex: Exchange| async {
            Ok(Outcome::fallthrough_because("not mine"))
        });
        dispatcher.register(route("^/page"), |_ex: Exchange| async {
            Ok(Outcome::respond("second"))
        });

        let response = dispatcher.dispatch(get("/page"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "second");
    }

    #[tokio::test]
    async fn redirect_restarts_from_the_top() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register(route("^/index\\.html$").priority(-10), |ex: Exchange| async move {
            Ok(Outcome::respond(format!("index via {}", ex.original_target())))
        });
        dispatcher.register(route("^/$").priority(100), |_ex: Exchange| async {
            Ok(Outcome::redirect("/index.html"))
        });

        let response = dispatcher.dispatch(get("/"), client()).await;
        assert_eq!(body_text(response).await, "index via /");
    }

    #[tokio::test]
    async fn redirect_loops_are_capped() {
        let settings = DispatchSettings {
            max_internal_redirects: 3,
            ..DispatchSettings::default()
        };
        let dispatcher = Dispatcher::new(settings);
        let calls = Arc::new(Mutex::new(0));

        let c = calls.clone();
        dispatcher.register(route("^/loop"), move |_ex: Exchange| {
            let c = c.clone();
            async move {
                *c.lock().unwrap() += 1;
                Ok(Outcome::redirect("/loop"))
            }
        });

        let response = dispatcher.dispatch(get("/loop"), client()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "internal redirect limit exceeded");
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn method_filter_and_error_path() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register(route("^/login$").method(Method::POST), |_ex: Exchange| async {
            let result: HandlerResult = Err(anyhow::anyhow!("session store unavailable"));
            result
        });

        let response = dispatcher.dispatch(get("/login"), client()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.dispatch(post, client()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "session store unavailable");
    }

    #[tokio::test]
    async fn panicking_handler_still_gets_a_500() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register(route("^/crash$"), |_ex: Exchange| async {
            let items: Vec<u32> = Vec::new();
            let first = items[0];
            Ok(Outcome::respond(first.to_string()))
        });

        let response = dispatcher.dispatch(get("/crash"), client()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.starts_with("handler panicked: index out of bounds"));
        assert_eq!(dispatcher.tracker().active_count(), 0);

        // The worker keeps serving afterwards.
        let response = dispatcher.dispatch(get("/crash"), client()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn missing_source_address_is_rejected() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register(route("^/"), |_ex: Exchange| async { Ok(Outcome::respond("ok")) });

        let response = dispatcher.dispatch(get("/"), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn rate_limit_then_decay() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            threshold: 2,
            reduction_amount: 10,
            ..RateLimitConfig::default()
        }));
        let dispatcher = Dispatcher::new(DispatchSettings::default()).with_rate_limiter(limiter.clone());
        dispatcher.register(route("^/"), |_ex: Exchange| async { Ok(Outcome::respond("ok")) });

        for _ in 0..3 {
            let response = dispatcher.dispatch(get("/"), client()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = dispatcher.dispatch(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(response).await, "Too many requests");

        // A different source is unaffected.
        let other = Some(SocketAddr::from(([10, 0, 0, 8], 51000)));
        assert_eq!(dispatcher.dispatch(get("/"), other).await.status(), StatusCode::OK);

        limiter.decay();
        let response = dispatcher.dispatch(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn disabled_paths_return_401() {
        let restrictors = Arc::new(PathRestrictorCache::from_rules(&[RestrictionRule {
            pattern: "^/api/chat".into(),
            enabled: false,
            message: "Chat is down".into(),
        }]));
        let dispatcher = Dispatcher::new(DispatchSettings::default()).with_restrictors(restrictors);
        dispatcher.register(route("^/api"), |_ex: Exchange| async { Ok(Outcome::respond("ok")) });

        let response = dispatcher.dispatch(get("/api/chat/rooms"), client()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["reason"], "Route Disabled");
        assert_eq!(body["message"], "Chat is down");

        let response = dispatcher.dispatch(get("/api/users"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn providers_feed_handlers() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        dispatcher.register_provider("auth", |ex: Exchange| async move {
            let authenticated = ex.header("authorization").is_some();
            ex.set_context_value("authenticated", authenticated);
            Ok(())
        });
        dispatcher.register_provider("broken", |_ex: Exchange| async {
            anyhow::bail!("provider down")
        });
        dispatcher.register(route("^/whoami$"), |ex: Exchange| async move {
            let authenticated = ex.required_context_value::<bool>("authenticated")?;
            Ok(Outcome::respond(*authenticated))
        });

        let request = Request::builder()
            .uri("/whoami")
            .header("authorization", "Bearer t")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.dispatch(request, client()).await;
        assert_eq!(body_text(response).await, "true");
    }

    #[tokio::test]
    async fn slow_handlers_time_out() {
        let settings = DispatchSettings {
            maximum_request_time: Duration::from_millis(50),
            ..DispatchSettings::default()
        };
        let dispatcher = Dispatcher::new(settings);
        let cancelled = Arc::new(Mutex::new(None));

        let seen = cancelled.clone();
        dispatcher.register(route("^/slow$"), move |ex: Exchange| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = Some(ex.cancellation());
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Outcome::respond("too late"))
            }
        });

        let response = dispatcher.dispatch(get("/slow"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Request timed out after 50ms");

        let token = cancelled.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
        assert_eq!(dispatcher.tracker().active_count(), 0);
    }

    #[tokio::test]
    async fn lifted_timeout_lets_handler_finish() {
        let settings = DispatchSettings {
            maximum_request_time: Duration::from_millis(30),
            ..DispatchSettings::default()
        };
        let dispatcher = Dispatcher::new(settings);
        dispatcher.register(route("^/export$"), |ex: Exchange| async move {
            ex.lift_response_timeout();
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok(Outcome::respond("done"))
        });

        let response = dispatcher.dispatch(get("/export"), client()).await;
        assert_eq!(body_text(response).await, "done");
    }

    #[tokio::test]
    async fn registration_during_traffic_is_visible_to_later_requests() {
        let dispatcher = Dispatcher::new(DispatchSettings::default());
        assert_eq!(dispatcher.dispatch(get("/late"), client()).await.status(), StatusCode::NOT_FOUND);

        dispatcher.register(route("^/late$"), |_ex: Exchange| async { Ok(Outcome::respond("here")) });
        let response = dispatcher.dispatch(get("/late"), client()).await;
        assert_eq!(body_text(response).await, "here");
    }
}
