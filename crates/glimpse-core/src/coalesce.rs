//! Request coalescing and sampler concurrency limits
//!
//! Provides:
//! - One shared sampler call per fingerprint while it is in flight
//! - A bounded number of concurrent sampler calls across all lineages
//! - Coalescing statistics

use crate::error::BackendError;
use dashmap::DashMap;
use glimpse_cache::Fingerprint;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore, SemaphorePermit};

/// Default number of concurrent sampler calls
pub const DEFAULT_MAX_CONCURRENT_SAMPLES: usize = 5;

/// Value produced by [`Coalescer::run`]
#[derive(Debug, Clone)]
pub struct Coalesced {
    /// Sampled text
    pub value: Arc<str>,
    /// Whether another caller's in-flight call produced the value
    pub shared: bool,
}

/// Coalescing statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Calls that ran their own producer
    pub led: u64,
    /// Calls that reused another caller's result
    pub shared: u64,
    /// Fingerprints currently in flight
    pub in_flight: usize,
    /// Free sampler permits
    pub available_permits: usize,
}

/// Shares in-flight sampler work between identical requests
#[derive(Debug)]
pub struct Coalescer {
    /// In-flight slots keyed by fingerprint
    in_flight: DashMap<Fingerprint, Arc<OnceCell<Arc<str>>>>,
    /// Sampler call limiter
    permits: Semaphore,
    led: AtomicU64,
    shared: AtomicU64,
}

impl Coalescer {
    /// Create coalescer allowing `max_concurrent` sampler calls at once
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            in_flight: DashMap::new(),
            permits: Semaphore::new(max_concurrent.max(1)),
            led: AtomicU64::new(0),
            shared: AtomicU64::new(0),
        }
    }

    /// Wait for a sampler permit
    ///
    /// # Errors
    /// - `BackendError::Transport` if the limiter has been closed
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, BackendError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| BackendError::Transport("sampler limiter closed".to_string()))
    }

    /// Run `produce` unless an identical request is already in flight
    ///
    /// Callers arriving while a producer runs wait for its value. If that
    /// producer fails or is dropped, the next waiter runs its own.
    ///
    /// # Errors
    /// - Whatever `produce` returns for this caller
    pub async fn run<F, Fut, E>(&self, fingerprint: Fingerprint, produce: F) -> Result<Coalesced, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<str>, E>>,
    {
        let cell = {
            let entry = self
                .in_flight
                .entry(fingerprint)
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        let mut led = false;
        let result = cell
            .get_or_try_init(|| {
                led = true;
                produce()
            })
            .await
            .map(Arc::clone);

        self.in_flight
            .remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &cell));

        let value = result?;
        if led {
            self.led.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %fingerprint.short(), "joined in-flight sampler call");
        }
        Ok(Coalesced { value, shared: !led })
    }

    /// Snapshot of coalescing statistics
    #[must_use]
    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            led: self.led.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
            available_permits: self.permits.available_permits(),
        }
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_SAMPLES)
    }
}
