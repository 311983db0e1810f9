//! Admission decisions returned to the host.

use serde::Serialize;

use super::rate::RateConfig;
use crate::store::CounterSnapshot;

/// Response header carrying the remaining budget.
pub const HEADER_REMAINING: &str = "X-Rate-Limit-Remaining";
/// Response header carrying the configured limit.
pub const HEADER_LIMIT: &str = "X-Rate-Limit-Limit";
/// Response header carrying the reset time as Unix seconds.
pub const HEADER_RESET: &str = "X-Rate-Limit-Reset";

/// Budget state of one counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub limit: u64,
    pub window: u64,
    /// Count reported by the store after this request.
    pub current: u64,
    pub remaining: u64,
    /// Unix time in seconds at which the window ends.
    pub reset: u64,
    pub allowed: bool,
}

impl RateDecision {
    /// Compute the decision from the store's counter state.
    pub fn compute(rate: RateConfig, snapshot: CounterSnapshot, now: u64) -> Self {
        Self {
            limit: rate.limit,
            window: rate.window,
            current: snapshot.count,
            remaining: rate.limit.saturating_sub(snapshot.count),
            reset: now + snapshot.ttl,
            allowed: snapshot.count <= rate.limit,
        }
    }

    /// Header name/value pairs to attach to the response.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}

/// Result of asking the limiter about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// The request is not subject to limiting; the store was not touched.
    Skipped,
    /// The request was counted.
    Evaluated(RateDecision),
    /// The store failed; the request is let through without budget data.
    FailedOpen,
}

impl Decision {
    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        match self {
            Decision::Evaluated(rate) => rate.allowed,
            Decision::Skipped | Decision::FailedOpen => true,
        }
    }

    /// Budget data, present only when the request was actually counted.
    pub fn rate(&self) -> Option<&RateDecision> {
        match self {
            Decision::Evaluated(rate) => Some(rate),
            _ => None,
        }
    }

    /// Headers for the response; empty unless the request was counted.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        self.rate().map(|rate| rate.headers().to_vec()).unwrap_or_default()
    }
}
