//! Completion mailbox
//!
//! Every dispatched part sends exactly one [`PartResult`] to the orchestrator
//! over an unbounded channel. The receiving side, [`ErrorAggregator`], keeps
//! the receipts of uploaded parts and the first fatal failure it sees. Later
//! failures are logged and dropped.

use super::part::PartResult;
use super::FatalPartError;
use crate::backend::PartReceipt;
use tokio::sync::mpsc;

/// Create a connected sender/aggregator pair
pub fn channel() -> (CompletionSender, ErrorAggregator) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CompletionSender { tx },
        ErrorAggregator {
            rx,
            receipts: Vec::new(),
            first_error: None,
            suppressed: 0,
        },
    )
}

/// Worker side of the mailbox
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<PartResult>,
}

impl CompletionSender {
    /// Post a part result. A result posted after the orchestrator has gone
    /// away is dropped.
    pub fn send(&self, result: PartResult) {
        if let Err(mpsc::error::SendError(result)) = self.tx.send(result) {
            tracing::debug!(
                part_number = result.part_number(),
                "Dropping completion posted after the upload ended"
            );
        }
    }
}

/// Orchestrator side of the mailbox
pub struct ErrorAggregator {
    rx: mpsc::UnboundedReceiver<PartResult>,
    receipts: Vec<PartReceipt>,
    first_error: Option<FatalPartError>,
    suppressed: usize,
}

impl ErrorAggregator {
    fn record(&mut self, result: PartResult) {
        match result {
            PartResult::Uploaded(receipt) => self.receipts.push(receipt),
            PartResult::Failed(err) if self.first_error.is_none() => {
                self.first_error = Some(err);
            }
            PartResult::Failed(err) => {
                self.suppressed += 1;
                tracing::warn!(error = %err, "Additional part failure after the first");
            }
        }
    }

    /// Record every result already waiting, without blocking
    pub fn drain(&mut self) {
        while let Ok(result) = self.rx.try_recv() {
            self.record(result);
        }
    }

    /// Wait for the next result and record it.
    ///
    /// Returns `false` once every sender is gone and the channel is empty.
    /// Cancel safe.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(result) => {
                self.record(result);
                true
            }
            None => false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.first_error.is_some()
    }

    /// Take the first fatal failure observed so far
    pub fn take_error(&mut self) -> Option<FatalPartError> {
        self.first_error.take()
    }

    /// Failures observed after the first one
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Parts uploaded so far
    pub fn uploaded(&self) -> usize {
        self.receipts.len()
    }

    /// Receipts ordered by part number
    pub fn into_receipts(self) -> Vec<PartReceipt> {
        let mut receipts = self.receipts;
        receipts.sort_by_key(|receipt| receipt.part_number);
        receipts
    }
}
