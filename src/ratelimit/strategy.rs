//! Strategies that derive counter keys and rates from a request.

use serde::{Deserialize, Serialize};

use super::rate::RateConfig;
use super::request::RequestContext;

/// Capability set used to derive a counter key and rate for a request.
///
/// A limiter holds one global strategy and each route may carry its own.
/// Every method returns `None` when the strategy has no opinion, in which
/// case resolution falls through from route to global to the built-in
/// default. Only the prefix has a built-in default; identity and rate must
/// come from a strategy.
pub trait LimitStrategy: Send + Sync {
    /// Prefix distinguishing this counter, `<method>:<path>` when `None` everywhere.
    fn prefix(&self, _request: &RequestContext) -> Option<String> {
        None
    }

    /// Identity of the caller being counted.
    fn identity(&self, _request: &RequestContext) -> Option<String> {
        None
    }

    /// Limit and window to apply.
    fn rate(&self, _request: &RequestContext) -> Option<RateConfig> {
        None
    }
}

/// Where the caller identity is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The authenticated credentials identifier.
    #[default]
    Credentials,
    /// The value of a request header.
    Header(String),
    /// The peer IP address.
    RemoteAddr,
}

impl IdentitySource {
    /// Extract the identity from a request, if present.
    pub fn extract(&self, request: &RequestContext) -> Option<String> {
        match self {
            IdentitySource::Credentials => request.credentials.clone(),
            IdentitySource::Header(name) => request.header(name).map(str::to_string),
            IdentitySource::RemoteAddr => request.remote_addr.map(|ip| ip.to_string()),
        }
    }
}

/// Global strategy built from configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredStrategy {
    /// Identity source applied to every route.
    pub identity: IdentitySource,
    /// Fixed prefix replacing `<method>:<path>`.
    pub prefix: Option<String>,
    /// Default rate for routes without their own.
    pub default_rate: Option<RateConfig>,
}

impl LimitStrategy for ConfiguredStrategy {
    fn prefix(&self, _request: &RequestContext) -> Option<String> {
        self.prefix.clone()
    }

    fn identity(&self, request: &RequestContext) -> Option<String> {
        self.identity.extract(request)
    }

    fn rate(&self, _request: &RequestContext) -> Option<RateConfig> {
        self.default_rate
    }
}

/// Route-level override with fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticStrategy {
    /// Prefix override.
    pub prefix: Option<String>,
    /// Rate override.
    pub rate: Option<RateConfig>,
}

impl LimitStrategy for StaticStrategy {
    fn prefix(&self, _request: &RequestContext) -> Option<String> {
        self.prefix.clone()
    }

    fn rate(&self, _request: &RequestContext) -> Option<RateConfig> {
        self.rate
    }
}
