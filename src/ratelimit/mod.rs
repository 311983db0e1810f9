//! Rate limiting logic: key derivation, rate resolution and decisions.

mod clock;
mod decision;
mod key;
mod limiter;
mod rate;
mod request;
mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, RateDecision, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
pub use key::{default_prefix, CounterKey, KeyBuilder, KEY_NAMESPACE};
pub use limiter::{Limiter, LimiterBuilder, StoreErrorHook, TimingHook};
pub use rate::{RateConfig, RateResolver, Resolution, RoutePolicy, RouteTable};
pub use request::{Method, RequestContext, RequestContextBuilder};
pub use strategy::{ConfiguredStrategy, IdentitySource, LimitStrategy, StaticStrategy};
