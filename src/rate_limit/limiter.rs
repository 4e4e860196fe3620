//! Owned admission controller: one store, its layer, and its evictor.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::rate_limit::eviction::{spawn_evictor, EvictorHandle};
use crate::rate_limit::key::ClientKey;
use crate::rate_limit::middleware::RateLimitLayer;
use crate::rate_limit::store::BucketStore;
use crate::rate_limit::Decision;
use crate::ConfigError;

/// Admission controller built from a [`RateLimitConfig`].
///
/// Construct it at startup, hand [`RateLimiter::layer`] to the server, and
/// call [`RateLimiter::shutdown`] on the way out.
///
/// # Examples
/// ```
/// use tollgate::{RateLimitConfig, RateLimiter};
///
/// let limiter = RateLimiter::new(RateLimitConfig::builder().capacity(2.0).build().unwrap());
/// let key = "10.0.0.1".into();
/// assert!(limiter.check(&key).is_admitted());
/// assert!(limiter.check(&key).is_admitted());
/// assert!(!limiter.check(&key).is_admitted());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<BucketStore>,
    config: RateLimitConfig,
    evictor: Option<EvictorHandle>,
}

impl RateLimiter {
    /// Create a limiter on the monotonic clock. Eviction is not started yet.
    pub fn new(config: RateLimitConfig) -> Self {
        let store = Arc::new(BucketStore::new(config.limits()));
        Self { store, config, evictor: None }
    }

    /// Create a limiter on a custom clock.
    pub fn with_clock<C: Clock + 'static>(config: RateLimitConfig, clock: C) -> Self {
        let store = Arc::new(BucketStore::new(config.limits()).with_clock(clock));
        Self { store, config, evictor: None }
    }

    /// Create a limiter and start the eviction its config asks for.
    ///
    /// Fails with [`ConfigError::NoRuntime`] when eviction is configured and
    /// there is no tokio runtime to run it on.
    pub fn start(config: RateLimitConfig) -> Result<Self, ConfigError> {
        let mut limiter = Self::new(config);
        limiter.start_eviction()?;
        Ok(limiter)
    }

    /// Start background eviction if the config enables it.
    ///
    /// Returns whether an evictor is running afterwards. Calling it again
    /// keeps the running evictor.
    pub fn start_eviction(&mut self) -> Result<bool, ConfigError> {
        if self.evictor.is_none() {
            if let Some(eviction) = self.config.eviction() {
                if Handle::try_current().is_err() {
                    return Err(ConfigError::NoRuntime);
                }
                self.evictor = Some(spawn_evictor(&self.store, eviction));
            }
        }
        Ok(self.evictor.is_some())
    }

    /// A middleware layer charging requests against this limiter's store.
    pub fn layer(&self) -> RateLimitLayer {
        RateLimitLayer::from_config(self.store.clone(), &self.config)
    }

    /// Admission check for an already-extracted key.
    pub fn check(&self, key: &ClientKey) -> Decision {
        self.store.check(key)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<BucketStore> {
        &self.store
    }

    /// The config this limiter was built from.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Stop eviction and drop all bucket state.
    ///
    /// Layers handed out earlier keep working against an empty store.
    pub async fn shutdown(self) {
        if let Some(evictor) = self.evictor {
            evictor.shutdown().await;
        }
        self.store.clear();
    }
}
