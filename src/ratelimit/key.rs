//! Counter key derivation.

use std::fmt;

use super::request::RequestContext;
use super::strategy::LimitStrategy;
use crate::error::{Result, TurnstileError};

/// Namespace separating limiter counters from unrelated store data.
pub const KEY_NAMESPACE: &str = "turnstile";

/// Key that uniquely identifies one fixed-window counter.
///
/// Format: `turnstile:{prefix}:{identity}`. Two requests share a counter
/// exactly when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey(String);

impl CounterKey {
    /// Compose a key from a prefix and identity.
    pub fn new(prefix: &str, identity: &str) -> Self {
        Self(format!("{KEY_NAMESPACE}:{prefix}:{identity}"))
    }

    /// The key as sent to the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The prefix used when no strategy supplies one: `<method>:<path>`.
pub fn default_prefix(request: &RequestContext) -> String {
    request.route()
}

/// Derives counter keys, consulting the route strategy before the global one.
pub struct KeyBuilder<'a> {
    route: Option<&'a dyn LimitStrategy>,
    global: &'a dyn LimitStrategy,
}

impl<'a> KeyBuilder<'a> {
    /// Create a key builder for an optional route strategy and the global strategy.
    pub fn new(route: Option<&'a dyn LimitStrategy>, global: &'a dyn LimitStrategy) -> Self {
        Self { route, global }
    }

    /// Build the counter key for a request.
    ///
    /// Fails with [`TurnstileError::MissingIdentity`] when neither strategy
    /// can identify the caller; there is no default identity.
    pub fn build(&self, request: &RequestContext) -> Result<CounterKey> {
        let prefix = self
            .route
            .and_then(|strategy| strategy.prefix(request))
            .or_else(|| self.global.prefix(request))
            .unwrap_or_else(|| default_prefix(request));

        let identity = self
            .route
            .and_then(|strategy| strategy.identity(request))
            .or_else(|| self.global.identity(request))
            .ok_or_else(|| TurnstileError::MissingIdentity {
                route: request.route(),
            })?;

        Ok(CounterKey::new(&prefix, &identity))
    }
}
