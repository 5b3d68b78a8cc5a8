//! Upload Flow Integration Tests
//!
//! Drives complete upload sessions against the in-memory backend.
//!
//! ## Test Coverage
//!
//! - Commit of a multi-part upload with progress reporting
//! - Abort on a fatal part, with the failing part identified
//! - Local retry of transient part failures
//! - Bound on parts in flight
//! - Existing object handling (refuse / replace)
//! - Missing container, empty source, failing source
//! - No worker activity after the session ends
//! - Cancellation mid-stream, by shutdown signal or by dropping the upload
//! - Part count limit

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use std::collections::BTreeSet;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use streamput::backend::credentials::Credentials;
    use streamput::backend::memory::{Fault, MemoryBackend};
    use streamput::backend::{BackendError, ProgressFn};
    use streamput::config::UploadConfig;
    use streamput::upload::chunker::from_bytes;
    use streamput::{UploadError, Uploader};

    const BUCKET: &str = "test-bucket";
    const KEY: &str = "backups/stream.bin";

    fn credentials() -> Credentials {
        Credentials::new("test-access", "test-secret")
    }

    fn config(part_size: usize, parallelism: usize) -> UploadConfig {
        UploadConfig {
            part_size,
            parallelism,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    fn uploader(backend: &MemoryBackend, config: UploadConfig) -> Uploader {
        Uploader::new(Arc::new(backend.clone()), config)
    }

    // ========================================================================
    // TEST: Successful sessions
    // ========================================================================

    #[tokio::test]
    async fn test_five_parts_commit_with_progress() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |part, sent, total| {
            sink.lock().unwrap().push((part, sent, total));
        });
        let data = payload(40);

        let summary = uploader(&backend, config(8, 2))
            .with_progress(progress)
            .upload(&credentials(), BUCKET, KEY, from_bytes(data.clone()))
            .await
            .unwrap();

        assert_eq!(summary.parts, 5);
        assert_eq!(summary.bytes, 40);
        assert_eq!(summary.key, KEY);
        assert_eq!(backend.object(BUCKET, KEY), Some(data));
        assert_eq!(backend.complete_calls(), 1);
        assert_eq!(backend.abort_calls(), 0);

        let seen = seen.lock().unwrap();
        let parts: BTreeSet<u32> = seen.iter().map(|(part, _, _)| *part).collect();
        assert_eq!(parts, (1..=5).collect::<BTreeSet<u32>>());
        assert!(seen.iter().all(|(_, sent, total)| sent <= total && *total == 8));
    }

    #[tokio::test]
    async fn test_part_numbers_are_contiguous_from_one() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let data = payload(7 * 16 - 5);

        let summary = uploader(&backend, config(16, 3))
            .upload(&credentials(), BUCKET, KEY, from_bytes(data.clone()))
            .await
            .unwrap();

        assert_eq!(summary.parts, 7);
        assert_eq!(backend.attempted_parts(), (1..=7).collect::<Vec<u32>>());
        assert_eq!(backend.object(BUCKET, KEY), Some(data));
    }

    #[tokio::test]
    async fn test_fragmented_source_is_reassembled() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let data = payload(1000);
        let fragments: Vec<io::Result<Bytes>> = data
            .chunks(37)
            .map(|fragment| Ok(Bytes::copy_from_slice(fragment)))
            .collect();

        let summary = uploader(&backend, config(100, 4))
            .upload(&credentials(), BUCKET, KEY, stream::iter(fragments))
            .await
            .unwrap();

        assert_eq!(summary.parts, 10);
        assert_eq!(backend.object(BUCKET, KEY), Some(data));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_locally() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .fail_part(2, Fault::FailTimes(2));

        let summary = uploader(&backend, config(4, 2))
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(12)))
            .await
            .unwrap();

        assert_eq!(summary.parts, 3);
        assert_eq!(backend.attempts(2), 3);
        assert_eq!(backend.complete_calls(), 1);
        assert_eq!(backend.abort_calls(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_parts_never_exceed_parallelism() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .with_part_delay(Duration::from_millis(20));

        let summary = uploader(&backend, config(4, 3))
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(48)))
            .await
            .unwrap();

        assert_eq!(summary.parts, 12);
        assert!(backend.max_in_flight() <= 3);
        assert!(summary.peak_in_flight <= 3);
        assert!(summary.peak_in_flight >= 1);
    }

    // ========================================================================
    // TEST: Failing sessions
    // ========================================================================

    #[tokio::test]
    async fn test_fatal_part_aborts_and_names_the_part() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .fail_part(3, Fault::Always);

        let err = uploader(&backend, config(8, 2))
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(40)))
            .await
            .unwrap_err();

        let part_err = err.as_part_error().expect("Expected a part error");
        assert_eq!(part_err.part_number(), 3);
        assert_eq!(part_err.attempts(), 5);
        assert!(err.to_string().contains("part 3"));

        assert_eq!(backend.attempts(3), 5);
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
        assert!(backend.object(BUCKET, KEY).is_none());
    }

    #[tokio::test]
    async fn test_no_worker_activity_after_abort() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .with_part_delay(Duration::from_millis(50))
            .fail_part(1, Fault::Always);

        let config = UploadConfig {
            max_attempts: 1,
            ..config(4, 3)
        };
        let err = uploader(&backend, config)
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(64)))
            .await
            .unwrap_err();
        assert_eq!(err.as_part_error().map(|e| e.part_number()), Some(1));

        assert_eq!(backend.in_flight(), 0);
        let attempted = backend.attempted_parts();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.attempted_parts(), attempted);
        assert_eq!(backend.in_flight(), 0);
        assert_eq!(backend.abort_calls(), 1);
    }

    #[tokio::test]
    async fn test_existing_object_is_refused_before_initiate() {
        let backend = MemoryBackend::new().with_object(BUCKET, KEY, "old");

        let err = uploader(&backend, config(8, 2))
            .upload(&credentials(), BUCKET, KEY, from_bytes("new"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::AlreadyExists { .. }));
        assert_eq!(backend.initiate_calls(), 0);
        assert_eq!(backend.object(BUCKET, KEY), Some(Bytes::from_static(b"old")));
    }

    #[tokio::test]
    async fn test_replace_overwrites_existing_object() {
        let backend = MemoryBackend::new().with_object(BUCKET, KEY, "old");
        let config = UploadConfig {
            replace: true,
            ..config(8, 2)
        };

        uploader(&backend, config)
            .upload(&credentials(), BUCKET, KEY, from_bytes("new contents"))
            .await
            .unwrap();

        assert_eq!(
            backend.object(BUCKET, KEY),
            Some(Bytes::from_static(b"new contents"))
        );
    }

    #[tokio::test]
    async fn test_missing_container() {
        let backend = MemoryBackend::new();

        let err = uploader(&backend, config(8, 2))
            .upload(&credentials(), BUCKET, KEY, from_bytes("data"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Backend(BackendError::ContainerNotFound(ref name)) if name == BUCKET
        ));
        assert_eq!(backend.initiate_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let backend = MemoryBackend::new().with_container(BUCKET);

        let err = uploader(&backend, config(8, 2))
            .upload(&Credentials::new("", "secret"), BUCKET, KEY, from_bytes("data"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Backend(BackendError::Credentials(_))));
        assert_eq!(backend.initiate_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_source_aborts() {
        let backend = MemoryBackend::new().with_container(BUCKET);

        let err = uploader(&backend, config(8, 2))
            .upload(&credentials(), BUCKET, KEY, stream::empty::<io::Result<Bytes>>())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::EmptySource));
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_source_error_aborts() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let fragments: Vec<io::Result<Bytes>> = vec![
            Ok(payload(20)),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away")),
        ];

        let err = uploader(&backend, config(8, 2))
            .upload(&credentials(), BUCKET, KEY, stream::iter(fragments))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Source(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
        assert_eq!(backend.in_flight(), 0);
    }

    // ========================================================================
    // TEST: Cancellation
    // ========================================================================

    /// Two parts, then a source that never yields again
    fn stalled_source(part_size: usize) -> impl futures::Stream<Item = io::Result<Bytes>> {
        stream::iter(vec![Ok(payload(2 * part_size))]).chain(stream::pending())
    }

    #[tokio::test]
    async fn test_shutdown_mid_stream_aborts() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .with_part_delay(Duration::from_secs(30));

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            uploader(&backend, config(4, 4)).upload_until(
                &credentials(),
                BUCKET,
                KEY,
                stalled_source(4),
                shutdown,
            ),
        )
        .await
        .expect("shutdown must end the upload");

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(backend.attempted_parts(), vec![1, 2]);
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
        assert_eq!(backend.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_workers_stop_before_abort_is_sent() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .with_part_delay(Duration::from_secs(30));

        let result = uploader(&backend, config(4, 2))
            .upload_until(
                &credentials(),
                BUCKET,
                KEY,
                stalled_source(4),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.running_at_abort(), 0);
        assert_eq!(backend.late_parts(), 0);
    }

    #[tokio::test]
    async fn test_dropped_upload_aborts_in_background() {
        let backend = MemoryBackend::new()
            .with_container(BUCKET)
            .with_part_delay(Duration::from_secs(30));

        let upload = uploader(&backend, config(4, 4));
        let elapsed = tokio::time::timeout(
            Duration::from_millis(100),
            upload.upload(&credentials(), BUCKET, KEY, stalled_source(4)),
        )
        .await;
        assert!(elapsed.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
        assert_eq!(backend.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_after_commit_is_ignored() {
        let backend = MemoryBackend::new().with_container(BUCKET);

        let summary = uploader(&backend, config(8, 2))
            .upload_until(
                &credentials(),
                BUCKET,
                KEY,
                from_bytes(payload(20)),
                tokio::time::sleep(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert_eq!(summary.parts, 3);
        assert_eq!(backend.abort_calls(), 0);
    }

    // ========================================================================
    // TEST: Part limit
    // ========================================================================

    #[tokio::test]
    async fn test_part_beyond_limit_aborts_without_sending() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let config = UploadConfig {
            max_parts: 3,
            ..config(4, 2)
        };

        let err = uploader(&backend, config)
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooManyParts { max_parts: 3 }));
        assert!(backend.attempted_parts().iter().all(|&part| part <= 3));
        assert_eq!(backend.abort_calls(), 1);
        assert_eq!(backend.complete_calls(), 0);
        assert!(backend.object(BUCKET, KEY).is_none());
    }

    #[tokio::test]
    async fn test_source_filling_exactly_the_limit_commits() {
        let backend = MemoryBackend::new().with_container(BUCKET);
        let config = UploadConfig {
            max_parts: 3,
            ..config(4, 2)
        };

        let summary = uploader(&backend, config)
            .upload(&credentials(), BUCKET, KEY, from_bytes(payload(12)))
            .await
            .unwrap();

        assert_eq!(summary.parts, 3);
        assert_eq!(backend.abort_calls(), 0);
    }
}
