//! Rate configuration and per-route resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::request::{Method, RequestContext};
use super::strategy::{LimitStrategy, StaticStrategy};
use crate::config::RouteConfig;
use crate::error::{Result, TurnstileError};

/// A limit of `limit` requests per `window` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateConfig {
    /// Maximum requests allowed in one window
    pub limit: u64,
    /// Window length in seconds
    pub window: u64,
}

impl RateConfig {
    /// Create a validated rate.
    pub fn new(limit: u64, window: u64) -> Result<Self> {
        let rate = Self { limit, window };
        rate.validate()?;
        Ok(rate)
    }

    /// Reject a zero limit or window.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.window == 0 {
            return Err(TurnstileError::InvalidRateConfig {
                limit: self.limit,
                window: self.window,
            });
        }
        Ok(())
    }
}

/// Rate limiting settings for a single route.
#[derive(Clone, Default)]
pub struct RoutePolicy {
    /// Whether requests on this route are counted at all.
    pub enabled: bool,
    /// Route-specific overrides of the global strategy.
    pub strategy: Option<Arc<dyn LimitStrategy>>,
}

impl RoutePolicy {
    /// An enabled route that uses the global strategy.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            strategy: None,
        }
    }

    /// A route that is never counted.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Attach a route-specific strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn LimitStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// The route strategy, if one is attached.
    pub fn strategy(&self) -> Option<&dyn LimitStrategy> {
        self.strategy.as_deref()
    }
}

impl std::fmt::Debug for RoutePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutePolicy")
            .field("enabled", &self.enabled)
            .field("strategy", &self.strategy.is_some())
            .finish()
    }
}

/// Route policies indexed by method and path template.
///
/// Routes absent from the table are not limited.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<(Method, String), RoutePolicy>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configured routes.
    ///
    /// Routes whose method is never limited and routes that are disabled
    /// are left out, so lookups for them fall through to "disabled".
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut table = Self::new();

        for route in routes {
            if !route.method.is_limitable() || !route.enabled {
                debug!(method = %route.method, path = %route.path, "Skipping unlimited route");
                continue;
            }

            let strategy = StaticStrategy {
                prefix: route.key_prefix.clone(),
                rate: route.rate()?,
            };
            table.insert(
                route.method,
                route.path.clone(),
                RoutePolicy::enabled().with_strategy(Arc::new(strategy)),
            );
        }

        Ok(table)
    }

    /// Register or replace the policy for a route.
    pub fn insert(&mut self, method: Method, path: impl Into<String>, policy: RoutePolicy) {
        self.routes.insert((method, path.into()), policy);
    }

    /// Look up the policy for a route.
    pub fn get(&self, method: Method, path: &str) -> Option<&RoutePolicy> {
        self.routes.get(&(method, path.to_string()))
    }

    /// Number of routes in the table.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Outcome of rate resolution for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The request is not subject to limiting.
    Disabled,
    /// The request is counted against this rate.
    Limited(RateConfig),
}

/// Resolves the applicable rate for a request.
pub struct RateResolver<'a> {
    route: Option<&'a RoutePolicy>,
    global: &'a dyn LimitStrategy,
}

impl<'a> RateResolver<'a> {
    /// Create a resolver for a route policy and the global strategy.
    pub fn new(route: Option<&'a RoutePolicy>, global: &'a dyn LimitStrategy) -> Self {
        Self { route, global }
    }

    /// Whether the request should be counted at all.
    ///
    /// The method filter is applied before the route's enable flag.
    pub fn is_enabled(&self, request: &RequestContext) -> bool {
        request.method.is_limitable() && self.route.is_some_and(|route| route.enabled)
    }

    /// Resolve the rate, preferring the route's override over the global default.
    pub fn resolve(&self, request: &RequestContext) -> Result<Resolution> {
        if !self.is_enabled(request) {
            return Ok(Resolution::Disabled);
        }

        let rate = self
            .route
            .and_then(RoutePolicy::strategy)
            .and_then(|strategy| strategy.rate(request))
            .or_else(|| self.global.rate(request))
            .ok_or_else(|| TurnstileError::MissingRate {
                route: request.route(),
            })?;

        rate.validate()?;
        Ok(Resolution::Limited(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::strategy::ConfiguredStrategy;

    fn global(rate: Option<RateConfig>) -> ConfiguredStrategy {
        ConfiguredStrategy {
            default_rate: rate,
            ..Default::default()
        }
    }

    fn request(method: Method) -> RequestContext {
        RequestContext::builder(method, "/testPost").build()
    }

    fn route_config(method: Method, enabled: bool, rate: Option<(u64, u64)>) -> RouteConfig {
        RouteConfig {
            method,
            path: "/testPost".to_string(),
            enabled,
            limit: rate.map(|r| r.0),
            window: rate.map(|r| r.1),
            key_prefix: None,
        }
    }

    #[test]
    fn test_rate_config_validation() {
        assert!(RateConfig::new(10, 60).is_ok());
        assert!(matches!(
            RateConfig::new(0, 60),
            Err(TurnstileError::InvalidRateConfig { limit: 0, window: 60 })
        ));
        assert!(matches!(
            RateConfig::new(10, 0),
            Err(TurnstileError::InvalidRateConfig { limit: 10, window: 0 })
        ));
    }

    #[test]
    fn test_default_rate_used_without_override() {
        let default = RateConfig::new(1, 60).unwrap();
        let global = global(Some(default));
        let policy = RoutePolicy::enabled();

        let resolution = RateResolver::new(Some(&policy), &global)
            .resolve(&request(Method::Post))
            .unwrap();

        assert_eq!(resolution, Resolution::Limited(default));
    }

    #[test]
    fn test_route_rate_overrides_default() {
        let global = global(Some(RateConfig::new(1, 60).unwrap()));
        let custom = RateConfig::new(1, 1).unwrap();
        let policy = RoutePolicy::enabled().with_strategy(Arc::new(StaticStrategy {
            prefix: None,
            rate: Some(custom),
        }));

        let resolution = RateResolver::new(Some(&policy), &global)
            .resolve(&request(Method::Get))
            .unwrap();

        assert_eq!(resolution, Resolution::Limited(custom));
    }

    #[test]
    fn test_unlisted_route_is_disabled() {
        let global = global(Some(RateConfig::new(1, 60).unwrap()));

        let resolution = RateResolver::new(None, &global).resolve(&request(Method::Get)).unwrap();

        assert_eq!(resolution, Resolution::Disabled);
    }

    #[test]
    fn test_disabled_route_is_disabled() {
        let global = global(Some(RateConfig::new(1, 60).unwrap()));
        let policy = RoutePolicy::disabled();

        let resolution = RateResolver::new(Some(&policy), &global)
            .resolve(&request(Method::Get))
            .unwrap();

        assert_eq!(resolution, Resolution::Disabled);
    }

    #[test]
    fn test_method_filter_wins_over_enabled_route() {
        let global = global(Some(RateConfig::new(1, 60).unwrap()));
        let policy = RoutePolicy::enabled();

        for method in [Method::Put, Method::Patch, Method::Head, Method::Options] {
            let resolution = RateResolver::new(Some(&policy), &global)
                .resolve(&request(method))
                .unwrap();
            assert_eq!(resolution, Resolution::Disabled, "{method} should not be limited");
        }
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let global = global(Some(RateConfig::new(1, 60).unwrap()));
        let policy = RoutePolicy::enabled().with_strategy(Arc::new(StaticStrategy {
            prefix: None,
            rate: Some(RateConfig { limit: 0, window: 60 }),
        }));

        let result = RateResolver::new(Some(&policy), &global).resolve(&request(Method::Get));

        assert!(matches!(result, Err(TurnstileError::InvalidRateConfig { .. })));
    }

    #[test]
    fn test_missing_rate_is_an_error() {
        let global = global(None);
        let policy = RoutePolicy::enabled();

        let result = RateResolver::new(Some(&policy), &global).resolve(&request(Method::Get));

        assert!(matches!(result, Err(TurnstileError::MissingRate { route }) if route == "get:/testPost"));
    }

    #[test]
    fn test_table_only_registers_limitable_methods() {
        let table = RouteTable::from_config(&[
            route_config(Method::Post, true, None),
            route_config(Method::Put, true, None),
        ])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.get(Method::Post, "/testPost").is_some());
        assert!(table.get(Method::Put, "/testPost").is_none());
    }

    #[test]
    fn test_table_ignores_disabled_routes() {
        let table = RouteTable::from_config(&[
            route_config(Method::Get, false, Some((1, 1))),
            route_config(Method::Post, true, None),
        ])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.get(Method::Get, "/testPost").is_none());
    }

    #[test]
    fn test_table_carries_route_rate() {
        let table = RouteTable::from_config(&[route_config(Method::Get, true, Some((1, 1)))]).unwrap();
        let policy = table.get(Method::Get, "/testPost").unwrap();

        let rate = policy.strategy().and_then(|s| s.rate(&request(Method::Get)));

        assert_eq!(rate, Some(RateConfig { limit: 1, window: 1 }));
    }
}
