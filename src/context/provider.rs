//! Context provider registry.
//!
//! Providers enrich a request's context (e.g. "is this request
//! authenticated") before any route handler runs. They execute once per
//! request, in registration order, and a failing provider never aborts the
//! request.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::dispatch::engine::panic_message;
use crate::dispatch::Exchange;

/// Populates request context through the exchange.
pub trait ProvideContext: Send + Sync {
    fn populate(&self, exchange: Exchange) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> ProvideContext for F
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn populate(&self, exchange: Exchange) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(exchange))
    }
}

/// A named provider.
#[derive(Clone)]
pub struct ContextProvider {
    name: String,
    populate: Arc<dyn ProvideContext>,
}

impl ContextProvider {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProvider").field("name", &self.name).finish()
    }
}

/// Ordered list of context providers.
pub struct ContextProviderRegistry {
    providers: ArcSwap<Vec<ContextProvider>>,
}

impl ContextProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a provider.
    pub fn register<P>(&self, name: impl Into<String>, populate: P)
    where
        P: ProvideContext + 'static,
    {
        let provider = ContextProvider {
            name: name.into(),
            populate: Arc::new(populate),
        };
        tracing::debug!(provider = %provider.name, "Context provider registered");

        self.providers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(provider.clone());
            next
        });
    }

    /// Run every provider in order. Failures are logged and skipped.
    ///
    /// Returns the number of providers that failed.
    pub async fn populate_all(&self, exchange: &Exchange) -> usize {
        let providers = self.providers.load_full();
        let mut failures = 0;

        for provider in providers.iter() {
            let result = AssertUnwindSafe(provider.populate.populate(exchange.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("provider panicked: {}", panic_message(panic.as_ref())))
                });
            if let Err(e) = result {
                failures += 1;
                tracing::error!(
                    provider = %provider.name,
                    error = %e,
                    "Context provider failed"
                );
            }
        }

        failures
    }

    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContextProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
