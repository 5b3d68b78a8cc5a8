//! S3 backend
//!
//! Implements the backend traits on top of `aws-sdk-s3`.
//!
//! # Tracing
//!
//! Every S3 call is wrapped in a span:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | HeadBucket | `s3.head_bucket` | bucket |
//! | HeadObject | `s3.head_object` | bucket, key |
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count, etag |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` | bucket, upload_id |

use super::credentials::Credentials;
use super::progress::progress_body;
use super::{BackendError, Connector, Container, PartReceipt, ProgressFn, Session, Transaction};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::sync::Arc;

/// Opens S3 sessions
#[derive(Debug, Clone)]
pub struct S3Connector {
    region: String,
    endpoint: Option<String>,
    force_path_style: bool,
}

impl S3Connector {
    pub fn new(config: &S3Config) -> Self {
        Self {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            force_path_style: config.force_path_style,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint URL for the requested transport.
    ///
    /// Bare `host:port` endpoints get a scheme matching `secure`. Without a
    /// configured endpoint, insecure sessions use the regional plain-HTTP
    /// endpoint and secure sessions leave resolution to the SDK.
    pub fn endpoint_url(&self, secure: bool) -> Option<String> {
        let scheme = if secure { "https" } else { "http" };
        match &self.endpoint {
            Some(endpoint) => {
                let lower = endpoint.to_ascii_lowercase();
                if lower.starts_with("http://") || lower.starts_with("https://") {
                    Some(endpoint.clone())
                } else {
                    Some(format!("{}://{}", scheme, endpoint))
                }
            }
            None if !secure => Some(format!("http://s3.{}.amazonaws.com", self.region)),
            None => None,
        }
    }
}

#[async_trait]
impl Connector for S3Connector {
    #[tracing::instrument(
        name = "s3.connect",
        skip(self, credentials),
        fields(s3.region = %self.region, secure = secure),
        err
    )]
    async fn connect(
        &self,
        credentials: &Credentials,
        secure: bool,
    ) -> Result<Arc<dyn Session>, BackendError> {
        let sdk_credentials = aws_sdk_s3::config::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
            None, // expiration
            "streamput",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .credentials_provider(sdk_credentials);

        if let Some(endpoint) = self.endpoint_url(secure) {
            builder = builder.endpoint_url(endpoint);
        }
        if self.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Arc::new(S3Session {
            client: Client::from_conf(builder.build()),
        }))
    }
}

/// Authenticated S3 session
pub struct S3Session {
    client: Client,
}

#[async_trait]
impl Session for S3Session {
    #[tracing::instrument(name = "s3.head_bucket", skip(self), fields(s3.bucket = %name), err)]
    async fn locate_container(&self, name: &str) -> Result<Arc<dyn Container>, BackendError> {
        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(Arc::new(S3Bucket {
                client: self.client.clone(),
                bucket: name.to_string(),
            })),
            Err(err) if is_not_found(&err) => Err(BackendError::ContainerNotFound(name.to_string())),
            Err(err) => Err(map_sdk_error(err)),
        }
    }
}

/// A located S3 bucket
pub struct S3Bucket {
    client: Client,
    bucket: String,
}

#[async_trait]
impl Container for S3Bucket {
    fn name(&self) -> &str {
        &self.bucket
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_sdk_error(err)),
        }
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %key,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn initiate(&self, key: &str) -> Result<Arc<dyn Transaction>, BackendError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| BackendError::Response("CreateMultipartUpload returned no upload id".into()))?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        tracing::info!(upload_id = %upload_id, "CreateMultipartUpload completed");

        Ok(Arc::new(S3MultipartUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id,
        }))
    }
}

/// An open S3 multipart upload
pub struct S3MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
}

#[async_trait]
impl Transaction for S3MultipartUpload {
    fn id(&self) -> &str {
        &self.upload_id
    }

    fn key(&self) -> &str {
        &self.key
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, data, progress),
        fields(
            s3.bucket = %self.bucket,
            s3.upload_id = %self.upload_id,
            s3.part_number = part_number,
            upload.bytes = data.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        part_number: u32,
        data: Bytes,
        progress: Option<ProgressFn>,
        max_callbacks: usize,
    ) -> Result<PartReceipt, BackendError> {
        let size = data.len() as u64;
        let wire_part_number = i32::try_from(part_number)
            .map_err(|_| BackendError::Request(format!("part number {} out of range", part_number)))?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(wire_part_number)
            .content_length(size as i64)
            .body(progress_body(part_number, data, progress, max_callbacks))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let etag = output
            .e_tag()
            .ok_or_else(|| BackendError::Response(format!("UploadPart {} returned no ETag", part_number)))?
            .to_string();
        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(PartReceipt {
            part_number,
            etag,
            size,
        })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %self.bucket,
            s3.upload_id = %self.upload_id,
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn complete(&self, parts: Vec<PartReceipt>) -> Result<String, BackendError> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;

        let etag = output.e_tag().unwrap_or_default().to_string();
        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::info!(etag = %etag, parts = parts.len(), "CompleteMultipartUpload completed");

        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.upload_id = %self.upload_id),
        err
    )]
    async fn abort(&self) -> Result<(), BackendError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;

        tracing::info!(upload_id = %self.upload_id, "AbortMultipartUpload completed");
        Ok(())
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

fn map_sdk_error<E>(err: SdkError<E>) -> BackendError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(_) | SdkError::ResponseError(_) => {
            BackendError::Response(DisplayErrorContext(&err).to_string())
        }
        _ => BackendError::Request(DisplayErrorContext(&err).to_string()),
    }
}
