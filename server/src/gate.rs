//! Admission control for the shared synthesizer.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no synthesis slot became available within {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("synthesizer is shutting down")]
    Closed,
}

#[derive(Debug, Default)]
struct GateStats {
    acquired: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
    waiting: AtomicUsize,
}

/// Point-in-time view of the gate, served by `/metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub acquired_total: u64,
    pub released_total: u64,
    pub rejected_total: u64,
}

/// Bounded pool of synthesis slots.
#[derive(Debug)]
pub struct SynthesisGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    admission_timeout: Duration,
    stats: Arc<GateStats>,
}

impl SynthesisGate {
    pub fn new(capacity: usize, admission_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            admission_timeout,
            stats: Arc::new(GateStats::default()),
        }
    }

    /// Wait up to the admission deadline for a slot.
    pub async fn acquire(&self) -> Result<SynthesisSlot, AdmissionError> {
        let _waiting = WaitingGuard::enter(&self.stats.waiting);

        let permit = match tokio::time::timeout(
            self.admission_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AdmissionError::Closed),
            Err(_) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AdmissionError::Timeout(self.admission_timeout));
            }
        };

        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(SynthesisSlot {
            _permit: permit,
            stats: Arc::clone(&self.stats),
            acquired_at: Instant::now(),
        })
    }

    /// Stop handing out slots; pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let available = self.semaphore.available_permits();
        GateSnapshot {
            capacity: self.capacity,
            available,
            in_use: self.capacity.saturating_sub(available),
            waiting: self.stats.waiting.load(Ordering::Relaxed),
            acquired_total: self.stats.acquired.load(Ordering::Relaxed),
            released_total: self.stats.released.load(Ordering::Relaxed),
            rejected_total: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Permission to drive the synthesizer. Released exactly once, on drop.
#[derive(Debug)]
pub struct SynthesisSlot {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GateStats>,
    acquired_at: Instant,
}

impl Drop for SynthesisSlot {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        debug!(
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "synthesis slot released"
        );
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
