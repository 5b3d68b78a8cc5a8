//! Upload orchestrator
//!
//! Drives one upload session through its states:
//!
//! ```text
//! Initiating ──▶ Streaming ──▶ Finalizing ──▶ Completed
//!                    │              │
//!                    └──────────────┴───────▶ Aborted
//! ```
//!
//! - **Initiating**: connect, locate the container, refuse to overwrite an
//!   existing key unless `replace` is set, open the multipart transaction.
//! - **Streaming**: for every part, wait for an admission slot, then hand the
//!   part to the worker pool. Part numbers are assigned in source order.
//! - **Finalizing**: wait for every dispatched part, check the mailbox one
//!   last time, then commit.
//! - **Aborted**: the first fatal part error (or any other failure after the
//!   transaction was opened) aborts the transaction, stops the pool, and is
//!   returned to the caller unchanged.
//!
//! Exactly one terminal call (`complete` or `abort`) is issued per session.
//! The one exception is a failed `complete`: the transaction is then aborted
//! so the store does not keep orphaned parts.

use super::admission::{AdmissionController, AdmissionPermit};
use super::chunker::ChunkProducer;
use super::mailbox::{self, ErrorAggregator};
use super::part::PartUploader;
use super::pool::WorkerPool;
use super::{UploadError, UploadSummary};
use crate::backend::credentials::Credentials;
use crate::backend::{Connector, PartReceipt, ProgressFn, Transaction};
use crate::config::UploadConfig;
use crate::metrics;
use bytes::Bytes;
use futures::future::{self, BoxFuture};
use futures::{Future, Stream, StreamExt};
use std::io;
use std::sync::Arc;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiating,
    Streaming,
    Finalizing,
    Completed,
    Aborted,
}

/// Totals gathered while streaming
struct Dispatched {
    parts: u32,
    bytes: u64,
}

/// Streams byte sources into objects
pub struct Uploader {
    connector: Arc<dyn Connector>,
    config: UploadConfig,
    progress: Option<ProgressFn>,
}

impl Uploader {
    pub fn new(connector: Arc<dyn Connector>, config: UploadConfig) -> Self {
        Self {
            connector,
            config,
            progress: None,
        }
    }

    /// Report per-part transfer progress to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload everything `source` yields to `bucket`/`key`.
    ///
    /// On failure the original error is returned; a fatal part failure comes
    /// back as [`UploadError::Part`] carrying the part number, the worker,
    /// and the backend fault of the last attempt.
    pub async fn upload<S>(
        &self,
        credentials: &Credentials,
        bucket: &str,
        key: &str,
        source: S,
    ) -> Result<UploadSummary, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.upload_until(credentials, bucket, key, source, future::pending())
            .await
    }

    /// Like [`Uploader::upload`], but gives up once `shutdown` resolves.
    ///
    /// A shutdown after the transaction was opened takes the abort path:
    /// workers are stopped, the transaction is aborted, and
    /// [`UploadError::Cancelled`] is returned.
    #[tracing::instrument(
        name = "upload.session",
        skip(self, credentials, source, shutdown),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            upload.parallelism = self.config.parallelism,
            upload.part_size = self.config.part_size,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_until<S, F>(
        &self,
        credentials: &Credentials,
        bucket: &str,
        key: &str,
        source: S,
        shutdown: F,
    ) -> Result<UploadSummary, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
        F: Future<Output = ()> + Send,
    {
        self.config.validate()?;
        let mut shutdown: BoxFuture<'_, ()> = Box::pin(shutdown);

        let mut state = UploadState::Initiating;
        tracing::info!(?state, "Starting upload");

        let session = self.connector.connect(credentials, self.config.secure).await?;
        let container = session.locate_container(bucket).await?;
        if !self.config.replace && container.exists(key).await? {
            return Err(UploadError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let transaction = container.initiate(key).await?;
        let mut guard = AbortOnDrop::new(transaction.clone());
        tracing::Span::current().record("s3.upload_id", transaction.id());

        let (completions, mut aggregator) = mailbox::channel();
        let admission = AdmissionController::new(self.config.parallelism);
        let uploader = PartUploader::new(transaction.clone(), self.config.max_attempts)
            .with_progress(self.progress.clone(), self.config.progress_callbacks);
        let mut pool = WorkerPool::spawn(self.config.parallelism, uploader, completions);

        state = UploadState::Streaming;
        tracing::info!(?state, upload_id = %transaction.id(), "Multipart transaction open");

        let dispatched = match self
            .stream(&mut pool, &admission, &mut aggregator, source, &mut shutdown)
            .await
        {
            Ok(dispatched) => dispatched,
            Err(err) => {
                guard.disarm();
                return Err(abort(transaction.as_ref(), pool, err).await);
            }
        };

        let receipts = aggregator.into_receipts();
        if let Some(missing) = first_missing_part(&receipts, dispatched.parts) {
            let err = UploadError::Pool(format!("no completion received for part {}", missing));
            guard.disarm();
            return Err(abort(transaction.as_ref(), pool, err).await);
        }

        let etag = match transaction.complete(receipts).await {
            Ok(etag) => etag,
            Err(err) => {
                guard.disarm();
                return Err(abort(transaction.as_ref(), pool, err.into()).await);
            }
        };
        guard.disarm();

        state = UploadState::Completed;
        metrics::record_upload_completed(dispatched.parts);
        tracing::info!(
            ?state,
            parts = dispatched.parts,
            bytes = dispatched.bytes,
            etag = %etag,
            "Upload committed"
        );

        Ok(UploadSummary {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: transaction.id().to_string(),
            parts: dispatched.parts,
            bytes: dispatched.bytes,
            etag,
            peak_in_flight: admission.high_water(),
        })
    }

    /// Streaming and the wait for every dispatched part.
    ///
    /// `Ok` means every part was uploaded and the transaction can be
    /// committed.
    async fn stream<S>(
        &self,
        pool: &mut WorkerPool,
        admission: &AdmissionController,
        aggregator: &mut ErrorAggregator,
        source: S,
        shutdown: &mut BoxFuture<'_, ()>,
    ) -> Result<Dispatched, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let dispatched = self
            .dispatch(pool, admission, aggregator, source, shutdown)
            .await?;

        tracing::info!(
            state = ?UploadState::Finalizing,
            parts = dispatched.parts,
            "All parts dispatched"
        );

        tokio::select! {
            joined = pool.join() => joined?,
            _ = &mut *shutdown => return Err(UploadError::Cancelled),
        }
        aggregator.drain();
        if let Some(err) = aggregator.take_error() {
            return Err(err.into());
        }
        if dispatched.parts == 0 {
            return Err(UploadError::EmptySource);
        }
        Ok(dispatched)
    }

    /// Streaming loop: admit, then pull the next part and submit it.
    ///
    /// The slot is taken before the part is read so that at most
    /// `parallelism` parts are ever held in memory by the pool.
    async fn dispatch<S>(
        &self,
        pool: &WorkerPool,
        admission: &AdmissionController,
        aggregator: &mut ErrorAggregator,
        source: S,
        shutdown: &mut BoxFuture<'_, ()>,
    ) -> Result<Dispatched, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let chunks = ChunkProducer::new(source, self.config.part_size);
        futures::pin_mut!(chunks);

        let mut dispatched = Dispatched { parts: 0, bytes: 0 };
        loop {
            let permit = self.admit(admission, aggregator, shutdown).await?;
            let next = tokio::select! {
                next = chunks.next() => next,
                _ = &mut *shutdown => return Err(UploadError::Cancelled),
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            debug_assert_eq!(chunk.part_number, dispatched.parts + 1);
            if chunk.part_number > self.config.max_parts {
                return Err(UploadError::TooManyParts {
                    max_parts: self.config.max_parts,
                });
            }

            dispatched.parts = chunk.part_number;
            dispatched.bytes += chunk.data.len() as u64;
            tracing::debug!(
                part_number = chunk.part_number,
                bytes = chunk.data.len(),
                in_flight = admission.in_flight(),
                "Submitting part"
            );
            pool.submit(chunk, permit)?;
        }
        Ok(dispatched)
    }

    /// Wait for an admission slot while watching the mailbox.
    ///
    /// A fatal part error observed while waiting ends the session.
    async fn admit(
        &self,
        admission: &AdmissionController,
        aggregator: &mut ErrorAggregator,
        shutdown: &mut BoxFuture<'_, ()>,
    ) -> Result<AdmissionPermit, UploadError> {
        let poll_interval = self.config.poll_interval();
        loop {
            aggregator.drain();
            if let Some(err) = aggregator.take_error() {
                return Err(err.into());
            }

            tokio::select! {
                biased;

                open = aggregator.next() => {
                    if !open {
                        return Err(UploadError::Pool("all workers stopped".into()));
                    }
                }
                _ = &mut *shutdown => return Err(UploadError::Cancelled),
                permit = admission.acquire() => return permit,
                _ = tokio::time::sleep(poll_interval) => {
                    metrics::record_admission_wait();
                    tracing::debug!(
                        in_flight = admission.in_flight(),
                        capacity = admission.capacity(),
                        "Waiting for an admission slot"
                    );
                }
            }
        }
    }
}

/// Stop the pool, abort the transaction, and hand back `cause`.
///
/// Workers are fenced first so no part can reach the store after the abort.
/// A failing abort call is logged; the caller always receives `cause`.
async fn abort(transaction: &dyn Transaction, pool: WorkerPool, cause: UploadError) -> UploadError {
    tracing::error!(
        upload_id = %transaction.id(),
        error = %cause,
        "Aborting multipart transaction"
    );

    pool.terminate().await;
    if let Err(err) = transaction.abort().await {
        tracing::error!(
            upload_id = %transaction.id(),
            error = %err,
            "Failed to abort multipart transaction, orphaned parts may remain"
        );
    }

    metrics::record_upload_aborted();
    tracing::info!(state = ?UploadState::Aborted, upload_id = %transaction.id(), "Upload aborted");
    cause
}

/// Aborts a still-open transaction in the background when the upload future
/// is dropped before reaching a terminal call.
struct AbortOnDrop {
    transaction: Option<Arc<dyn Transaction>>,
}

impl AbortOnDrop {
    fn new(transaction: Arc<dyn Transaction>) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    fn disarm(&mut self) {
        self.transaction = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                upload_id = %transaction.id(),
                "Upload dropped outside a runtime, orphaned parts may remain"
            );
            return;
        };

        tracing::warn!(upload_id = %transaction.id(), "Upload dropped while open, aborting");
        runtime.spawn(async move {
            if let Err(err) = transaction.abort().await {
                tracing::error!(
                    upload_id = %transaction.id(),
                    error = %err,
                    "Failed to abort multipart transaction, orphaned parts may remain"
                );
            }
            metrics::record_upload_aborted();
        });
    }
}

/// First part number in `1..=parts` without a receipt
fn first_missing_part(receipts: &[PartReceipt], parts: u32) -> Option<u32> {
    (1..=parts).find(|part| {
        receipts
            .binary_search_by_key(part, |receipt| receipt.part_number)
            .is_err()
    })
}
