//! Object store backend
//!
//! The uploader never talks to the network directly. It drives a remote
//! multipart transaction through the traits in this module:
//!
//! ```text
//! Connector ──connect──▶ Session ──locate_container──▶ Container
//!                                                          │
//!                                         exists / initiate│
//!                                                          ▼
//!                                                    Transaction
//!                                        upload_part / complete / abort
//! ```
//!
//! Two implementations ship with the crate:
//!
//! - [`s3::S3Connector`] - AWS S3 (and S3-compatible stores) via `aws-sdk-s3`
//! - [`memory::MemoryBackend`] - in-process store with fault injection

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

pub mod credentials;
pub mod memory;
pub mod progress;
pub mod s3;

use credentials::Credentials;

/// Progress callback: `(part_number, bytes_transferred, part_total_bytes)`.
///
/// Invoked by the backend while a part body is being transferred.
pub type ProgressFn = Arc<dyn Fn(u32, u64, u64) + Send + Sync>;

/// Backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Response error: {0}")]
    Response(String),
}

/// Receipt for a part the backend accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Entry point to an object store
#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate and open a session. `secure` selects TLS transport.
    async fn connect(
        &self,
        credentials: &Credentials,
        secure: bool,
    ) -> Result<Arc<dyn Session>, BackendError>;
}

/// An authenticated session
#[async_trait]
pub trait Session: Send + Sync {
    /// Resolve a container (bucket). Fails with `ContainerNotFound` if absent.
    async fn locate_container(&self, name: &str) -> Result<Arc<dyn Container>, BackendError>;
}

/// A resolved container (bucket)
#[async_trait]
pub trait Container: Send + Sync {
    fn name(&self) -> &str;

    /// Whether an object already exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Open a multipart transaction targeting `key`
    async fn initiate(&self, key: &str) -> Result<Arc<dyn Transaction>, BackendError>;
}

/// An open multipart transaction
///
/// Exactly one of [`Transaction::complete`] or [`Transaction::abort`] ends it.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Backend-assigned transaction identifier (the S3 upload id)
    fn id(&self) -> &str;

    fn key(&self) -> &str;

    /// Upload one part. `progress`, when given, is invoked at most
    /// `max_callbacks` times while the body is transferred.
    async fn upload_part(
        &self,
        part_number: u32,
        data: Bytes,
        progress: Option<ProgressFn>,
        max_callbacks: usize,
    ) -> Result<PartReceipt, BackendError>;

    /// Assemble the parts into the final object. `parts` is ordered by part
    /// number. Returns the ETag of the assembled object.
    async fn complete(&self, parts: Vec<PartReceipt>) -> Result<String, BackendError>;

    /// Discard the transaction and every part uploaded under it
    async fn abort(&self) -> Result<(), BackendError>;
}
