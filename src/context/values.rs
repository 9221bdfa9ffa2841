//! Per-request key/value context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Error type for context lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Required context value '{0}' is not present")]
    Missing(String),

    #[error("Context value '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Key '{0}' has already been initialized")]
    AlreadyInitialized(String),
}

type Value = Arc<dyn Any + Send + Sync>;

/// Values attached to one request by context providers and handlers.
///
/// Owned by a single `Exchange`; dropped with it when the response finalizes.
#[derive(Default)]
pub struct RequestContext {
    values: Mutex<HashMap<String, Value>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value.
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        let mut values = self.values.lock().expect("request context mutex poisoned");
        values.insert(key.into(), Arc::new(value));
    }

    /// Insert a value that must not already exist.
    pub fn init<T>(&self, key: impl Into<String>, value: T) -> Result<(), ContextError>
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        let mut values = self.values.lock().expect("request context mutex poisoned");
        if values.contains_key(&key) {
            return Err(ContextError::AlreadyInitialized(key));
        }
        values.insert(key, Arc::new(value));
        Ok(())
    }

    /// Look up a value. Absent keys and values of another type yield `None`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = {
            let values = self.values.lock().expect("request context mutex poisoned");
            values.get(key).cloned()?
        };
        value.downcast::<T>().ok()
    }

    /// Look up a value that must be present.
    pub fn get_required<T>(&self, key: &str) -> Result<Arc<T>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let value = {
            let values = self.values.lock().expect("request context mutex poisoned");
            values
                .get(key)
                .cloned()
                .ok_or_else(|| ContextError::Missing(key.to_string()))?
        };
        value.downcast::<T>().map_err(|_| ContextError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .expect("request context mutex poisoned")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.lock().expect("request context mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.lock().expect("request context mutex poisoned");
        f.debug_set().entries(values.keys()).finish()
    }
}
