//! Route matching logic.
//!
//! # Responsibilities
//! - Match the request target against a compiled regular expression
//! - Restrict routes to a set of HTTP verbs
//! - Combine both conditions with AND semantics
//!
//! # Design Decisions
//! - Patterns are compiled once at registration, never on the hot path
//! - Patterns see the full request target (path plus query string)
//! - Empty method constraint = any verb

use axum::http::Method;
use regex::Regex;

/// Error type for route construction.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled request-target pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, RoutingError> {
        Regex::new(pattern)
            .map(Self::from)
            .map_err(|source| RoutingError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, target: &str) -> bool {
        self.regex.is_match(target)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl From<Regex> for PathPattern {
    fn from(regex: Regex) -> Self {
        Self { regex }
    }
}

/// Which HTTP verbs a route accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MethodFilter {
    #[default]
    Any,
    Only(Vec<Method>),
}

impl MethodFilter {
    pub fn admits(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(methods) => methods.contains(method),
        }
    }

    fn push(&mut self, method: Method) {
        match self {
            MethodFilter::Any => *self = MethodFilter::Only(vec![method]),
            MethodFilter::Only(methods) => {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::Only(vec![method])
    }
}

impl From<Vec<Method>> for MethodFilter {
    fn from(methods: Vec<Method>) -> Self {
        if methods.is_empty() {
            MethodFilter::Any
        } else {
            MethodFilter::Only(methods)
        }
    }
}

impl<const N: usize> From<[Method; N]> for MethodFilter {
    fn from(methods: [Method; N]) -> Self {
        Vec::from(methods).into()
    }
}

/// Everything about a route except its action.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub(crate) pattern: PathPattern,
    pub(crate) methods: MethodFilter,
    pub(crate) priority: i32,
}

impl RouteSpec {
    /// Compile a route for the given regular expression.
    pub fn new(pattern: &str) -> Result<Self, RoutingError> {
        Ok(Self::from_pattern(PathPattern::new(pattern)?))
    }

    pub fn from_pattern(pattern: impl Into<PathPattern>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: MethodFilter::Any,
            priority: 0,
        }
    }

    /// Admit one more verb.
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Replace the verb constraint.
    pub fn methods(mut self, methods: impl Into<MethodFilter>) -> Self {
        self.methods = methods.into();
        self
    }

    /// Higher priorities are tried first. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, method: &Method, target: &str) -> bool {
        self.pattern.matches(target) && self.methods.admits(method)
    }
}
