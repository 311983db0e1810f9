//! Turnstile - Fixed-Window Rate Limiting
//!
//! This crate decides whether a request may proceed by counting it against
//! a fixed window held in a shared, TTL-capable store. The store performs
//! the increment and the first-request expiry as a single atomic operation,
//! so any number of limiter instances can share one set of counters without
//! coordinating with each other. Store outages fail open.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{Result, TurnstileError};
pub use ratelimit::{Decision, Limiter, RateConfig, RateDecision, RequestContext};
