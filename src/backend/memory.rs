//! In-memory backend
//!
//! A complete object store held in process memory. Completed transactions
//! assemble their parts by part number into a stored object, exactly like a
//! remote store would.
//!
//! Besides `--dry-run` runs of the CLI it supports fault injection and call
//! accounting, so upload behavior can be exercised without a network:
//!
//! ```
//! use streamput::backend::memory::{Fault, MemoryBackend};
//!
//! let backend = MemoryBackend::new()
//!     .with_container("bucket")
//!     .fail_part(3, Fault::Always);
//! assert_eq!(backend.complete_calls(), 0);
//! ```

use super::credentials::Credentials;
use super::progress::report_progress;
use super::{BackendError, Connector, Container, PartReceipt, ProgressFn, Session, Transaction};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Injected failure behavior for one part number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail the first `n` attempts, then succeed
    FailTimes(u32),
    /// Fail every attempt
    Always,
}

#[derive(Default)]
struct MemoryState {
    containers: Mutex<HashMap<String, HashMap<String, Bytes>>>,
    faults: Mutex<HashMap<u32, Fault>>,
    attempts: Mutex<HashMap<u32, u32>>,
    part_delay: Mutex<Option<Duration>>,
    initiate_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    abort_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    late_parts: AtomicUsize,
    running_at_abort: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory object store
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty container
    pub fn with_container(self, name: &str) -> Self {
        lock(&self.state.containers)
            .entry(name.to_string())
            .or_default();
        self
    }

    /// Add an object (creating its container if needed)
    pub fn with_object(self, container: &str, key: &str, data: impl Into<Bytes>) -> Self {
        lock(&self.state.containers)
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
        self
    }

    /// Inject a fault for `part_number`
    pub fn fail_part(self, part_number: u32, fault: Fault) -> Self {
        lock(&self.state.faults).insert(part_number, fault);
        self
    }

    /// Hold every part upload for `delay` before accepting it
    pub fn with_part_delay(self, delay: Duration) -> Self {
        *lock(&self.state.part_delay) = Some(delay);
        self
    }

    /// Stored object, if any
    pub fn object(&self, container: &str, key: &str) -> Option<Bytes> {
        lock(&self.state.containers)
            .get(container)
            .and_then(|objects| objects.get(key).cloned())
    }

    /// Upload attempts made for `part_number`
    pub fn attempts(&self, part_number: u32) -> u32 {
        lock(&self.state.attempts)
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    /// Part numbers that saw at least one attempt, ascending
    pub fn attempted_parts(&self) -> Vec<u32> {
        let mut parts: Vec<u32> = lock(&self.state.attempts).keys().copied().collect();
        parts.sort_unstable();
        parts
    }

    pub fn initiate_calls(&self) -> usize {
        self.state.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.state.complete_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.state.abort_calls.load(Ordering::SeqCst)
    }

    /// Part uploads currently executing
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of part uploads that ever executed at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Parts that arrived after their transaction had already ended
    pub fn late_parts(&self) -> usize {
        self.state.late_parts.load(Ordering::SeqCst)
    }

    /// Part uploads still executing when `abort` was called, summed over
    /// every abort
    pub fn running_at_abort(&self) -> usize {
        self.state.running_at_abort.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(
        &self,
        credentials: &Credentials,
        _secure: bool,
    ) -> Result<Arc<dyn Session>, BackendError> {
        if credentials.access_key_id().is_empty() {
            return Err(BackendError::Credentials("empty access key".into()));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Session for MemoryBackend {
    async fn locate_container(&self, name: &str) -> Result<Arc<dyn Container>, BackendError> {
        if !lock(&self.state.containers).contains_key(name) {
            return Err(BackendError::ContainerNotFound(name.to_string()));
        }
        Ok(Arc::new(MemoryContainer {
            state: self.state.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemoryContainer {
    state: Arc<MemoryState>,
    name: String,
}

#[async_trait]
impl Container for MemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(lock(&self.state.containers)
            .get(&self.name)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn initiate(&self, key: &str) -> Result<Arc<dyn Transaction>, BackendError> {
        self.state.initiate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryTransaction {
            state: self.state.clone(),
            container: self.name.clone(),
            key: key.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            parts: Mutex::new(BTreeMap::new()),
            closed: Mutex::new(false),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<MemoryState>,
    container: String,
    key: String,
    id: String,
    parts: Mutex<BTreeMap<u32, Bytes>>,
    closed: Mutex<bool>,
}

/// Decrements the in-flight gauge when a part upload ends, however it ends
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(state: &'a MemoryState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(&state.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn upload_part(
        &self,
        part_number: u32,
        data: Bytes,
        progress: Option<ProgressFn>,
        max_callbacks: usize,
    ) -> Result<PartReceipt, BackendError> {
        let _in_flight = InFlight::enter(&self.state);

        let attempt = {
            let mut attempts = lock(&self.state.attempts);
            let count = attempts.entry(part_number).or_insert(0);
            *count += 1;
            *count
        };

        let delay = *lock(&self.state.part_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = lock(&self.state.faults).get(&part_number).copied();
        match fault {
            Some(Fault::Always) => {
                return Err(BackendError::Request(format!(
                    "injected failure for part {} (attempt {})",
                    part_number, attempt
                )))
            }
            Some(Fault::FailTimes(n)) if attempt <= n => {
                return Err(BackendError::Request(format!(
                    "injected failure for part {} (attempt {})",
                    part_number, attempt
                )))
            }
            _ => {}
        }

        report_progress(part_number, &data, progress.as_ref(), max_callbacks);

        if *lock(&self.closed) {
            self.state.late_parts.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Response(format!(
                "transaction {} is no longer open",
                self.id
            )));
        }

        let size = data.len() as u64;
        lock(&self.parts).insert(part_number, data);

        Ok(PartReceipt {
            part_number,
            etag: format!("\"{}-{}\"", self.id, part_number),
            size,
        })
    }

    async fn complete(&self, parts: Vec<PartReceipt>) -> Result<String, BackendError> {
        self.state.complete_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.closed) = true;

        let stored = lock(&self.parts);
        let mut object = BytesMut::new();
        for receipt in &parts {
            let data = stored.get(&receipt.part_number).ok_or_else(|| {
                BackendError::Response(format!("part {} was never uploaded", receipt.part_number))
            })?;
            object.extend_from_slice(data);
        }
        drop(stored);

        lock(&self.state.containers)
            .entry(self.container.clone())
            .or_default()
            .insert(self.key.clone(), object.freeze());

        Ok(format!("\"{}-{}\"", self.id, parts.len()))
    }

    async fn abort(&self) -> Result<(), BackendError> {
        self.state.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .running_at_abort
            .fetch_add(self.state.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
        *lock(&self.closed) = true;
        lock(&self.parts).clear();
        Ok(())
    }
}
