//! Part transfer progress
//!
//! A part body is handed to the transport in at most `max_callbacks` slices.
//! The progress callback fires once per slice with the running byte count, so
//! a part reports progress no more than `max_callbacks` times.

use super::ProgressFn;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::StreamBody;
use std::convert::Infallible;

/// Split `data` into at most `max_callbacks` contiguous slices.
///
/// Slices share the underlying buffer; nothing is copied.
pub fn progress_slices(data: &Bytes, max_callbacks: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return Vec::new();
    }
    let max_callbacks = max_callbacks.max(1);
    let slice_len = data.len().div_ceil(max_callbacks);

    (0..data.len())
        .step_by(slice_len)
        .map(|start| data.slice(start..(start + slice_len).min(data.len())))
        .collect()
}

/// Drive `progress` over the slices of `data` without a transport.
///
/// Used by backends that accept a part in one step.
pub fn report_progress(
    part_number: u32,
    data: &Bytes,
    progress: Option<&ProgressFn>,
    max_callbacks: usize,
) {
    let Some(progress) = progress else {
        return;
    };
    let total = data.len() as u64;
    let mut sent = 0u64;
    for slice in progress_slices(data, max_callbacks) {
        sent += slice.len() as u64;
        progress(part_number, sent, total);
    }
}

/// Build a streamed request body for a part that reports progress as the
/// transport pulls each slice.
pub fn progress_body(
    part_number: u32,
    data: Bytes,
    progress: Option<ProgressFn>,
    max_callbacks: usize,
) -> ByteStream {
    let total = data.len() as u64;
    let mut sent = 0u64;
    let frames = progress_slices(&data, max_callbacks)
        .into_iter()
        .map(move |slice| {
            sent += slice.len() as u64;
            if let Some(progress) = &progress {
                progress(part_number, sent, total);
            }
            Ok::<_, Infallible>(Frame::data(slice))
        });

    ByteStream::from_body_1_x(StreamBody::new(futures::stream::iter(frames)))
}
