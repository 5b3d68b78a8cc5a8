//! Part uploader
//!
//! Uploads one part with a bounded number of attempts. Failed attempts are
//! retried immediately. The uploader never returns `Err`: a part that runs
//! out of attempts comes back as [`PartResult::Failed`] so the worker can
//! hand it to the orchestrator as a message.

use super::{Chunk, FatalPartError, WorkerId};
use crate::backend::{PartReceipt, ProgressFn, Transaction};
use crate::metrics;
use std::sync::Arc;

/// Outcome of one part's attempt sequence
#[derive(Debug)]
pub enum PartResult {
    Uploaded(PartReceipt),
    Failed(FatalPartError),
}

impl PartResult {
    pub fn part_number(&self) -> u32 {
        match self {
            PartResult::Uploaded(receipt) => receipt.part_number,
            PartResult::Failed(err) => err.part_number(),
        }
    }
}

/// Uploads parts into one transaction
#[derive(Clone)]
pub struct PartUploader {
    transaction: Arc<dyn Transaction>,
    max_attempts: u32,
    progress: Option<ProgressFn>,
    progress_callbacks: usize,
}

impl PartUploader {
    pub fn new(transaction: Arc<dyn Transaction>, max_attempts: u32) -> Self {
        Self {
            transaction,
            max_attempts: max_attempts.max(1),
            progress: None,
            progress_callbacks: 100,
        }
    }

    /// Forward `progress` to the backend, invoked at most `max_callbacks`
    /// times per part
    pub fn with_progress(mut self, progress: Option<ProgressFn>, max_callbacks: usize) -> Self {
        self.progress = progress;
        self.progress_callbacks = max_callbacks.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[tracing::instrument(
        name = "upload.part",
        skip(self, chunk, worker),
        fields(
            upload_id = %self.transaction.id(),
            part_number = chunk.part_number,
            upload.bytes = chunk.data.len(),
            worker = %worker
        )
    )]
    pub async fn upload(&self, worker: WorkerId, chunk: Chunk) -> PartResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .transaction
                .upload_part(
                    chunk.part_number,
                    chunk.data.clone(),
                    self.progress.clone(),
                    self.progress_callbacks,
                )
                .await;

            match result {
                Ok(receipt) => {
                    metrics::record_part_uploaded(receipt.size);
                    tracing::debug!(attempt, etag = %receipt.etag, "Uploaded part");
                    return PartResult::Uploaded(receipt);
                }
                Err(cause) if attempt < self.max_attempts => {
                    metrics::record_part_retry();
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %cause,
                        "Part attempt failed, retrying"
                    );
                }
                Err(cause) => {
                    metrics::record_part_fatal();
                    tracing::error!(attempts = attempt, error = %cause, "Part failed");
                    return PartResult::Failed(FatalPartError::new(
                        chunk.part_number,
                        worker,
                        attempt,
                        cause,
                    ));
                }
            }
        }
    }
}
