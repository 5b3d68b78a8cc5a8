//! Admission control
//!
//! Bounds the number of parts that are submitted but not yet finished,
//! independently of the worker pool. The pool's job queue is unbounded, so
//! without this gate a fast source could queue an unbounded number of
//! in-memory parts ahead of slow uploads.
//!
//! Each admitted part holds an [`AdmissionPermit`]; dropping the permit when
//! the part finishes (uploaded or fatal) frees the slot.

use super::UploadError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate over in-flight parts
#[derive(Clone)]
pub struct AdmissionController {
    /// One permit per admission slot
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
}

impl AdmissionController {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            high_water: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    ///
    /// Cancel safe: dropping the future before it resolves admits nothing.
    pub async fn acquire(&self) -> Result<AdmissionPermit, UploadError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| UploadError::Pool("admission gate closed".into()))?;
        Ok(self.admit(permit))
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        AdmissionPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Parts currently admitted
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest `in_flight` ever observed
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Slot held by one admitted part
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Runs before the semaphore permit is returned
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
