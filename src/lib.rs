//! Streamput Library
//!
//! Streams an arbitrarily large (possibly unbounded) byte source into a single
//! S3 object using a concurrent multipart upload.
//!
//! # Features
//!
//! - **Streaming**: The source length never needs to be known in advance
//! - **Bounded memory**: Admission control caps the number of parts in flight
//! - **Per-part retry**: Transient part failures are retried locally
//! - **All or nothing**: The multipart transaction is either committed or aborted
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamput::backend::{credentials::Credentials, s3::S3Connector};
//! use streamput::config::Config;
//! use streamput::upload::{chunker, Uploader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("streamput.yaml")?;
//!     let connector = Arc::new(S3Connector::new(&config.s3));
//!     let uploader = Uploader::new(connector, config.upload.clone());
//!
//!     let credentials = Credentials::new("access-key", "secret-key");
//!     let source = chunker::from_reader(tokio::io::stdin(), chunker::DEFAULT_READ_SIZE);
//!     let summary = uploader
//!         .upload(&credentials, "my-bucket", "backups/db.dump", source)
//!         .await?;
//!     println!("uploaded {} parts", summary.parts);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadError, UploadSummary, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
