//! Bounded admission of upstream calls.
//!
//! A fixed number of generation calls may be outstanding system-wide (not
//! per client). When the cap is reached, new work is rejected immediately —
//! there is no queue, because queued callers would hold open HTTP requests
//! against an upstream that is already saturated.
//!
//! Cached and deduplicated requests never take a slot; only the single
//! producer of a new generation does.

use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

use crate::metrics::MetricsSink;
use crate::{HeimdallError, Result};

/// Default maximum concurrently in-flight upstream calls.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Caps the number of concurrently in-flight upstream calls.
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    metrics: Arc<MetricsSink>,
}

impl AdmissionController {
    /// Create a controller with the given slot count.
    pub fn new(max_in_flight: usize, metrics: Arc<MetricsSink>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_in_flight)),
            metrics,
        }
    }

    /// Try to claim an admission slot without waiting.
    ///
    /// Fails with [`HeimdallError::Busy`] when every slot is taken. On
    /// success the returned permit holds the slot and the in-flight gauge
    /// until dropped — every exit path (return, error, panic, cancellation)
    /// releases exactly once.
    pub fn try_enter(&self) -> Result<AdmissionPermit> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => {
                self.metrics.in_flight_entered();
                Ok(AdmissionPermit {
                    _permit: permit,
                    metrics: Arc::clone(&self.metrics),
                })
            }
            Err(TryAcquireError::NoPermits) => Err(HeimdallError::Busy),
            Err(TryAcquireError::Closed) => Err(HeimdallError::Internal(
                "admission semaphore closed".to_string(),
            )),
        }
    }

    /// Slots currently available.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// RAII admission slot. Dropping it releases the slot and decrements the
/// in-flight gauge.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    metrics: Arc<MetricsSink>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.metrics.in_flight_exited();
    }
}
