//! Chunk producer
//!
//! Turns a stream of arbitrarily sized byte fragments into numbered parts of
//! exactly `chunk_size` bytes. The final part holds whatever is left over and
//! is only emitted when non-empty. The source length is never needed up front.

use super::Chunk;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size used when pulling fragments from an `AsyncRead` source
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

pin_project! {
    /// Lazy, single-pass stream of [`Chunk`]s over a fragment stream
    pub struct ChunkProducer<S> {
        #[pin]
        source: S,
        buffer: BytesMut,
        chunk_size: usize,
        next_part: u32,
        exhausted: bool,
    }
}

impl<S> ChunkProducer<S> {
    /// `chunk_size` is clamped to at least one byte.
    pub fn new(source: S, chunk_size: usize) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            next_part: 1,
            exhausted: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<S> Stream for ChunkProducer<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if this.buffer.len() >= *this.chunk_size {
                let data = this.buffer.split_to(*this.chunk_size).freeze();
                return Poll::Ready(Some(Ok(next_chunk(this.next_part, data))));
            }

            if *this.exhausted {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let data = this.buffer.split().freeze();
                return Poll::Ready(Some(Ok(next_chunk(this.next_part, data))));
            }

            match ready!(this.source.as_mut().poll_next(cx)) {
                Some(Ok(fragment)) => this.buffer.extend_from_slice(&fragment),
                Some(Err(err)) => {
                    // A failed source never yields further parts
                    *this.exhausted = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => *this.exhausted = true,
            }
        }
    }
}

fn next_chunk(next_part: &mut u32, data: Bytes) -> Chunk {
    let part_number = *next_part;
    *next_part += 1;
    Chunk { part_number, data }
}

/// Fragment stream over an `AsyncRead` (stdin, a file, a socket)
pub fn from_reader<R>(reader: R, read_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    R: AsyncRead + Unpin + Send,
{
    let read_size = read_size.max(1);
    stream::unfold(Some(reader), move |reader| async move {
        let mut reader = reader?;
        let mut buffer = BytesMut::with_capacity(read_size);
        match reader.read_buf(&mut buffer).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buffer.freeze()), Some(reader))),
            Err(err) => Some((Err(err), None)),
        }
    })
}

/// Fragment stream holding a single literal buffer
pub fn from_bytes(data: impl Into<Bytes>) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::iter([Ok(data.into())])
}
