//! Upload module
//!
//! Streams a byte source into one object through a concurrent multipart
//! transaction.
//!
//! ```text
//! source ──▶ ChunkProducer ──▶ Uploader ──submit──▶ WorkerPool ──▶ PartUploader
//!                                 ▲   (admission permit)            │
//!                                 └──────── completions ◀───────────┘
//! ```
//!
//! - [`chunker`] - fixed-size parts from an unbounded byte stream
//! - [`part`] - one part with bounded local retry
//! - [`admission`] - caps parts in flight
//! - [`mailbox`] - completion channel, first fatal error wins
//! - [`pool`] - fixed-size worker pool
//! - [`orchestrator`] - session state machine (commit or abort)

use crate::backend::BackendError;
use crate::config::ConfigError;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

pub mod admission;
pub mod chunker;
pub mod mailbox;
pub mod orchestrator;
pub mod part;
pub mod pool;

pub use orchestrator::{UploadState, Uploader};

/// One part of the source: 1-indexed part number and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub part_number: u32,
    pub data: Bytes,
}

/// Identity of a pool worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A part that exhausted its attempt budget
#[derive(Error, Debug)]
#[error("part {part_number} failed after {attempts} attempts on {worker}: {cause}")]
pub struct FatalPartError {
    part_number: u32,
    worker: WorkerId,
    attempts: u32,
    #[source]
    cause: BackendError,
}

impl FatalPartError {
    pub fn new(part_number: u32, worker: WorkerId, attempts: u32, cause: BackendError) -> Self {
        Self {
            part_number,
            worker,
            attempts,
            cause,
        }
    }

    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The fault raised by the last attempt
    pub fn cause(&self) -> &BackendError {
        &self.cause
    }

    pub fn into_cause(self) -> BackendError {
        self.cause
    }
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Object '{key}' already exists in '{bucket}'")]
    AlreadyExists { bucket: String, key: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Source read error: {0}")]
    Source(#[from] std::io::Error),

    #[error("Source produced no data")]
    EmptySource,

    #[error(transparent)]
    Part(#[from] FatalPartError),

    #[error("Upload would exceed {max_parts} parts")]
    TooManyParts { max_parts: u32 },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    Pool(String),
}

impl UploadError {
    /// The fatal part failure behind this error, if that is what ended the upload
    pub fn as_part_error(&self) -> Option<&FatalPartError> {
        match self {
            UploadError::Part(err) => Some(err),
            _ => None,
        }
    }
}

/// Outcome of a committed upload
#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: u32,
    pub bytes: u64,
    pub etag: String,
    /// Highest number of parts that were admitted and not yet finished
    pub peak_in_flight: usize,
}
