//! Fixed-size worker pool
//!
//! `size` long-lived tasks pull part jobs from one shared, unbounded queue.
//! Each job carries its admission permit; the worker posts the part result
//! to the mailbox and only then releases the permit.

use super::admission::AdmissionPermit;
use super::mailbox::CompletionSender;
use super::part::PartUploader;
use super::{Chunk, UploadError, WorkerId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

struct Job {
    chunk: Chunk,
    permit: AdmissionPermit,
}

/// Pool of part upload workers
///
/// Dropping the pool aborts every worker still running.
pub struct WorkerPool {
    queue: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) on the current runtime
    pub fn spawn(size: usize, uploader: PartUploader, completions: CompletionSender) -> Self {
        let (queue, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size.max(1))
            .map(|index| {
                let rx = rx.clone();
                let uploader = uploader.clone();
                let completions = completions.clone();
                tokio::spawn(async move {
                    let worker = WorkerId(index);
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(Job { chunk, permit }) = job else {
                            break;
                        };
                        let result = uploader.upload(worker, chunk).await;
                        completions.send(result);
                        drop(permit);
                    }
                    tracing::trace!(%worker, "Worker exiting");
                })
            })
            .collect();

        Self {
            queue: Some(queue),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a part for upload
    pub fn submit(&self, chunk: Chunk, permit: AdmissionPermit) -> Result<(), UploadError> {
        let closed = || UploadError::Pool("worker pool is no longer accepting parts".into());
        self.queue
            .as_ref()
            .ok_or_else(closed)?
            .send(Job { chunk, permit })
            .map_err(|_| closed())
    }

    /// Stop accepting parts and wait for every queued part to finish.
    ///
    /// Cancel safe: a worker is forgotten only once it has exited, so the
    /// ones still running are aborted when the pool is dropped.
    pub async fn join(&mut self) -> Result<(), UploadError> {
        self.queue = None;

        let mut failure = None;
        while let Some(handle) = self.workers.last_mut() {
            let joined = handle.await;
            self.workers.pop();
            if let Err(err) = joined {
                tracing::error!(error = %err, "Worker terminated abnormally");
                failure.get_or_insert(err);
            }
        }
        match failure {
            Some(err) => Err(UploadError::Pool(format!("worker terminated abnormally: {}", err))),
            None => Ok(()),
        }
    }

    /// Drop queued parts and cancel running ones, then wait until every
    /// worker has stopped.
    ///
    /// A running part is cancelled at its next suspension point, so after
    /// this returns no worker can post another result.
    pub async fn terminate(mut self) {
        self.queue = None;
        let workers = std::mem::take(&mut self.workers);

        for handle in &workers {
            handle.abort();
        }
        for handle in workers {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::error!(error = %err, "Worker terminated abnormally");
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            tracing::debug!(workers = self.workers.len(), "Worker pool dropped, aborting workers");
        }
        for handle in &self.workers {
            handle.abort();
        }
    }
}
