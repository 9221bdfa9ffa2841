//! Route registry.
//!
//! # Responsibilities
//! - Store registered route handlers
//! - Keep them ordered by priority (descending, ties in registration order)
//! - Hand the dispatcher a consistent snapshot per scanning pass
//!
//! # Design Decisions
//! - Copy-on-write through `ArcSwap`: readers never block, and a dispatch
//!   that loaded a snapshot keeps it even if a route is registered meanwhile
//! - Stable sort after every insert, so equal priorities keep their order
//! - Removal is supported for tests and future config-driven reloads

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Method;
use futures_util::future::BoxFuture;

use crate::dispatch::{Exchange, HandlerResult};
use crate::routing::matcher::RouteSpec;

/// The work a route performs once it matched.
///
/// Implemented for any `Fn(Exchange) -> impl Future<Output = HandlerResult>`,
/// so plain async closures register directly.
pub trait RouteAction: Send + Sync {
    fn call(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RouteAction for F
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(exchange))
    }
}

/// Identifier handed out on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// A registered route.
pub struct RouteHandler {
    id: RouteId,
    spec: RouteSpec,
    action: Arc<dyn RouteAction>,
}

impl RouteHandler {
    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.spec.priority
    }

    pub fn pattern(&self) -> &str {
        self.spec.pattern.as_str()
    }

    pub fn matches(&self, method: &Method, target: &str) -> bool {
        self.spec.matches(method, target)
    }

    pub(crate) fn invoke(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult> {
        self.action.call(exchange)
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandler")
            .field("id", &self.id)
            .field("pattern", &self.spec.pattern.as_str())
            .field("methods", &self.spec.methods)
            .field("priority", &self.spec.priority)
            .finish()
    }
}

/// Ordered set of route handlers.
pub struct RouteRegistry {
    handlers: ArcSwap<Vec<Arc<RouteHandler>>>,
    next_id: AtomicU64,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a route. Never fails; the new handler is visible to every
    /// scanning pass that starts after this returns.
    pub fn register<A>(&self, spec: RouteSpec, action: A) -> RouteId
    where
        A: RouteAction + 'static,
    {
        let id = RouteId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler = Arc::new(RouteHandler {
            id,
            spec,
            action: Arc::new(action),
        });

        tracing::debug!(
            route = %id,
            pattern = handler.pattern(),
            priority = handler.priority(),
            "Route registered"
        );

        self.handlers.rcu(|current| {
            let mut next: Vec<Arc<RouteHandler>> = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&handler));
            next.sort_by(|a, b| b.priority().cmp(&a.priority()));
            next
        });

        id
    }

    /// Remove a route. Returns false if it was not registered.
    pub fn remove(&self, id: RouteId) -> bool {
        let previous = self.handlers.rcu(|current| {
            current
                .iter()
                .filter(|h| h.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|h| h.id == id)
    }

    /// The current ordered handler list.
    pub fn snapshot(&self) -> Arc<Vec<Arc<RouteHandler>>> {
        self.handlers.load_full()
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Outcome;

    fn spec(pattern: &str, priority: i32) -> RouteSpec {
        RouteSpec::new(pattern).unwrap().priority(priority)
    }

    async fn ok(_: Exchange) -> HandlerResult {
        Ok(Outcome::respond("ok"))
    }

    #[test]
    fn test_sorted_by_priority_descending() {
        let registry = RouteRegistry::new();
        registry.register(spec("^/a$", 0), ok);
        registry.register(spec("^/b$", -999), ok);
        registry.register(spec("^/c$", 5), ok);

        let order: Vec<_> = registry.snapshot().iter().map(|h| h.priority()).collect();
        assert_eq!(order, vec![5, 0, -999]);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let registry = RouteRegistry::new();
        let first = registry.register(spec("^/first$", 1), ok);
        let low = registry.register(spec("^/low$", 0), ok);
        let second = registry.register(spec("^/second$", 1), ok);
        let third = registry.register(spec("^/third$", 1), ok);

        let ids: Vec<_> = registry.snapshot().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![first, second, third, low]);
    }

    #[test]
    fn test_remove_preserves_order() {
        let registry = RouteRegistry::new();
        let a = registry.register(spec("^/a$", 3), ok);
        let b = registry.register(spec("^/b$", 2), ok);
        let c = registry.register(spec("^/c$", 1), ok);

        assert!(registry.remove(b));
        assert!(!registry.remove(b));

        let ids: Vec<_> = registry.snapshot().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_registration() {
        let registry = RouteRegistry::new();
        registry.register(spec("^/a$", 0), ok);

        let before = registry.snapshot();
        registry.register(spec("^/b$", 10), ok);

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
