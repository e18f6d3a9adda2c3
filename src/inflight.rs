//! Single-flight coordination for identical in-flight generations.
//!
//! When several requests share a fingerprint while a generation for it is
//! already running, only the first issues an upstream call; the rest await
//! the same settled outcome — success or the original failure, never a
//! substitute.
//!
//! The producer runs on a detached task. A caller abandoning its request
//! (client disconnect) therefore cannot abort the upstream call: it
//! completes, populates the cache for followers, and releases its admission
//! permit when it settles.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{Mutex, watch};

use crate::cache::Fingerprint;
use crate::upstream::ImageBlob;
use crate::{HeimdallError, Result};

type Outcome = Result<ImageBlob>;
type Registry = Arc<Mutex<HashMap<Fingerprint, watch::Receiver<Option<Outcome>>>>>;

/// Deduplicates concurrent identical generation requests.
#[derive(Default)]
pub struct InflightCoordinator {
    inflight: Registry,
}

impl InflightCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await an existing in-flight generation for `fingerprint`, or become
    /// its sole producer.
    ///
    /// Returns the settled outcome and whether this caller joined an
    /// existing flight (`true` = deduped). Registration is atomic: two
    /// simultaneous callers cannot both become producers.
    ///
    /// The producer future is spawned detached; its panic is captured and
    /// surfaced to all waiters as an internal error, and the registry entry
    /// is removed on settlement no matter how the producer ended.
    pub async fn await_or_start<F>(
        &self,
        fingerprint: Fingerprint,
        producer: F,
    ) -> (Outcome, bool)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (rx, deduped) = {
            let mut inflight = self.inflight.lock().await;
            if let Some(rx) = inflight.get(&fingerprint) {
                (rx.clone(), true)
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(fingerprint.clone(), rx.clone());

                let registry = Arc::clone(&self.inflight);
                tokio::spawn(async move {
                    let outcome = std::panic::AssertUnwindSafe(producer)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(HeimdallError::Internal(
                                "generation task panicked".to_string(),
                            ))
                        });
                    // Deregister before publishing: a request arriving after
                    // settlement must start a fresh flight, not observe a
                    // finished one.
                    registry.lock().await.remove(&fingerprint);
                    let _ = tx.send(Some(outcome));
                });

                (rx, false)
            }
        };

        (Self::wait(rx).await, deduped)
    }

    /// Number of distinct fingerprints currently in flight.
    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    async fn wait(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without publishing; cannot happen with the
                // panic capture above, but fail closed rather than hang.
                return Err(HeimdallError::Internal(
                    "generation task dropped before settling".to_string(),
                ));
            }
        }
    }
}
