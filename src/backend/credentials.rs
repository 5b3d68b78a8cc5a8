//! Credentials Module
//!
//! Resolves the access key pair used to open a backend session.
//!
//! Resolution order, first match wins:
//!
//! 1. Explicit values (command-line flags)
//! 2. `s3.access_key` / `s3.secret_key` from the configuration file
//! 3. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//!
//! # Example
//!
//! ```
//! use streamput::backend::credentials::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! ```

use crate::config::S3Config;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Access key pair for backend authentication
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Resolve credentials from explicit values, then configuration, then
    /// the environment.
    pub fn resolve(
        access_key: Option<String>,
        secret_key: Option<String>,
        config: &S3Config,
    ) -> Result<Self, CredentialsError> {
        let access_key = access_key
            .or_else(|| config.access_key.clone())
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials("access key not provided".into()))?;

        let secret_key = secret_key
            .or_else(|| config.secret_key.clone())
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials("secret key not provided".into()))?;

        Ok(match std::env::var("AWS_SESSION_TOKEN").ok() {
            Some(token) if !token.is_empty() => {
                Credentials::with_session_token(access_key, secret_key, token)
            }
            _ => Credentials::new(access_key, secret_key),
        })
    }
}
