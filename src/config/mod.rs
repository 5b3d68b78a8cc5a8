//! Configuration module for Streamput
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! upload:
//!   part_size: 8388608
//!   parallelism: 8
//!   max_attempts: 5
//! s3:
//!   region: "eu-west-1"
//!   endpoint: "${S3_ENDPOINT:-http://localhost:9000}"
//!   force_path_style: true
//!   access_key: "${AWS_ACCESS_KEY_ID}"
//!   secret_key: "${AWS_SECRET_ACCESS_KEY}"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
        .expect("env var pattern is valid");
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Smallest part S3 accepts for every part but the last
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Largest part S3 accepts
pub const MAX_PART_SIZE: usize = 5 * 1024 * 1024 * 1024;

/// Maximum parts allowed in one multipart upload
pub const MAX_PARTS: u32 = 10000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub s3: S3Config,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upload.validate()?;

        if let Some(ref endpoint) = self.s3.endpoint {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "s3.endpoint cannot be empty when set".into(),
                ));
            }
        }

        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "s3.region cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Upload engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Bytes per part. Every part except the last has exactly this size.
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Worker pool size and the cap on parts in flight
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Total attempts per part before the part is fatal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Parts allowed per upload. A source that needs more is aborted
    /// before the extra part is sent.
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,

    /// Maximum progress callback invocations per part
    #[serde(default = "default_progress_callbacks")]
    pub progress_callbacks: usize,

    /// Interval at which a blocked admission wait reports itself
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overwrite an existing object at the target key
    #[serde(default)]
    pub replace: bool,

    /// Use TLS to reach the backend
    #[serde(default = "default_secure")]
    pub secure: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            max_parts: default_max_parts(),
            progress_callbacks: default_progress_callbacks(),
            poll_interval_ms: default_poll_interval_ms(),
            replace: false,
            secure: default_secure(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.part_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.part_size must be at least 1 byte".into(),
            ));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "upload.parallelism must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_attempts must be at least 1".into(),
            ));
        }
        if self.max_parts == 0 || self.max_parts > MAX_PARTS {
            return Err(ConfigError::ValidationError(format!(
                "upload.max_parts must be between 1 and {}",
                MAX_PARTS
            )));
        }
        if self.progress_callbacks == 0 {
            return Err(ConfigError::ValidationError(
                "upload.progress_callbacks must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "upload.poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Check the part size against the limits S3 enforces.
    ///
    /// Kept apart from [`UploadConfig::validate`] because the in-memory
    /// backend takes parts of any size.
    pub fn check_store_limits(&self) -> Result<(), ConfigError> {
        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&self.part_size) {
            return Err(ConfigError::ValidationError(format!(
                "upload.part_size must be between {} and {} bytes for S3, got {}",
                MIN_PART_SIZE, MAX_PART_SIZE, self.part_size
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_part_size() -> usize {
    5242880 // 5MB
}

fn default_parallelism() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_parts() -> u32 {
    MAX_PARTS
}

fn default_progress_callbacks() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_secure() -> bool {
    true
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO and
    /// most S3-compatible stores
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            force_path_style: false,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
