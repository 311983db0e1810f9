//! Fixed-window rate limiter.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::decision::{Decision, RateDecision};
use super::key::KeyBuilder;
use super::rate::{RateResolver, Resolution, RoutePolicy, RouteTable};
use super::request::{Method, RequestContext};
use super::strategy::{ConfiguredStrategy, LimitStrategy};
use crate::config::TurnstileConfig;
use crate::error::{Result, TurnstileError};
use crate::store::{CounterStore, ScriptHandle, StoreError};

/// Callback receiving the duration of each store call in milliseconds.
pub type TimingHook = Arc<dyn Fn(f64) + Send + Sync>;
/// Callback receiving each store failure.
pub type StoreErrorHook = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Turns request contexts into admission decisions.
///
/// The limiter keeps no per-request state: all counting happens in the
/// store, and the only mutable field is the script handle written once by
/// [`initialize`](Limiter::initialize). It can be shared freely across
/// tasks and called concurrently for the same key.
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    global: Arc<dyn LimitStrategy>,
    routes: RouteTable,
    clock: Arc<dyn Clock>,
    script: OnceLock<ScriptHandle>,
    on_timing: Option<TimingHook>,
    on_store_error: Option<StoreErrorHook>,
}

impl Limiter {
    /// Start building a limiter over the given store.
    pub fn builder(store: Arc<dyn CounterStore>) -> LimiterBuilder {
        LimiterBuilder::new(store)
    }

    /// Register the increment script with the store.
    ///
    /// Must succeed before the first call to [`decide`](Limiter::decide).
    /// Calling it again after a success is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.script.get().is_some() {
            return Ok(());
        }

        let handle = self
            .store
            .load_script()
            .await
            .map_err(TurnstileError::ScriptLoad)?;

        info!(script = %handle, routes = self.routes.len(), "Rate limiter initialized");
        if let Err(handle) = self.script.set(handle) {
            // A concurrent initialize stored its handle first; both name the same script.
            debug!(script = %handle, "Script handle already set, keeping the first");
        }
        Ok(())
    }

    /// Whether [`initialize`](Limiter::initialize) has completed.
    pub fn is_initialized(&self) -> bool {
        self.script.get().is_some()
    }

    /// Count the request and decide whether it may proceed.
    ///
    /// Requests on unlimited routes or methods return [`Decision::Skipped`]
    /// without touching the store. A store failure is reported to the error
    /// hook and yields [`Decision::FailedOpen`]. Configuration problems for
    /// the request's route are returned as errors.
    ///
    /// Once the store call has been issued the increment stands even if the
    /// caller goes away before the decision is returned.
    pub async fn decide(&self, request: &RequestContext) -> Result<Decision> {
        let script = self.script.get().ok_or(TurnstileError::NotInitialized)?;

        let route = self.routes.get(request.method, &request.path);
        let rate = match RateResolver::new(route, self.global.as_ref()).resolve(request)? {
            Resolution::Disabled => {
                trace!(route = %request.route(), "Route not rate limited");
                return Ok(Decision::Skipped);
            }
            Resolution::Limited(rate) => rate,
        };

        let key = KeyBuilder::new(route.and_then(RoutePolicy::strategy), self.global.as_ref())
            .build(request)?;

        let started = Instant::now();
        let result = self.store.increment(script, key.as_str(), rate.window).await;
        self.report_timing(started);

        match result {
            Ok(snapshot) => {
                let decision = RateDecision::compute(rate, snapshot, self.clock.now());

                trace!(
                    key = %key,
                    current = decision.current,
                    remaining = decision.remaining,
                    reset = decision.reset,
                    "Rate limit checked"
                );

                if !decision.allowed {
                    debug!(
                        key = %key,
                        current = decision.current,
                        limit = decision.limit,
                        "Rate limit exceeded"
                    );
                }

                Ok(Decision::Evaluated(decision))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store failed, allowing request");
                if let Some(hook) = &self.on_store_error {
                    hook(&e);
                }
                Ok(Decision::FailedOpen)
            }
        }
    }

    /// The route table this limiter consults.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn report_timing(&self, started: Instant) {
        if let Some(hook) = &self.on_timing {
            hook(started.elapsed().as_secs_f64() * 1_000.0);
        }
    }
}

/// Builder for [`Limiter`].
pub struct LimiterBuilder {
    store: Arc<dyn CounterStore>,
    global: Arc<dyn LimitStrategy>,
    routes: RouteTable,
    clock: Arc<dyn Clock>,
    on_timing: Option<TimingHook>,
    on_store_error: Option<StoreErrorHook>,
}

impl LimiterBuilder {
    fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            global: Arc::new(ConfiguredStrategy::default()),
            routes: RouteTable::new(),
            clock: Arc::new(SystemClock),
            on_timing: None,
            on_store_error: None,
        }
    }

    /// Apply the strategy and routes described by a configuration file.
    pub fn configure(self, config: &TurnstileConfig) -> Result<Self> {
        let strategy = config.strategy()?;
        let routes = RouteTable::from_config(&config.routes)?;
        Ok(self.strategy(Arc::new(strategy)).routes(routes))
    }

    /// Set the global strategy.
    pub fn strategy(mut self, strategy: Arc<dyn LimitStrategy>) -> Self {
        self.global = strategy;
        self
    }

    /// Replace the route table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Register a single route.
    pub fn route(mut self, method: Method, path: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes.insert(method, path, policy);
        self
    }

    /// Set the clock used for reset timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive the duration of every store call.
    pub fn on_timing<F>(mut self, hook: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on_timing = Some(Arc::new(hook));
        self
    }

    /// Receive every store failure.
    pub fn on_store_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.on_store_error = Some(Arc::new(hook));
        self
    }

    /// Build the limiter. It still needs [`Limiter::initialize`].
    pub fn build(self) -> Limiter {
        Limiter {
            store: self.store,
            global: self.global,
            routes: self.routes,
            clock: self.clock,
            script: OnceLock::new(),
            on_timing: self.on_timing,
            on_store_error: self.on_store_error,
        }
    }
}
