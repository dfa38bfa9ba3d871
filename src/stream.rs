use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{Response, IntoResponse};
use bytes::{Bytes, BytesMut};
use http_body::{Body, SizeHint, Frame};
use futures::Stream;
use pin_project::{pin_project, pinned_drop};
use tokio::io::ReadBuf;

use crate::RangeBody;

/// Default read size per chunk.
pub const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound for a single chunk, whatever was configured.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Response body stream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Seeks the body to `start`, then yields at most `length` bytes in chunks
/// of at most `chunk_size`. The body (and its file handle) is released when
/// the stream is dropped, whether or not it was read to completion.
#[pin_project(PinnedDrop)]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    offset: u64,
    chunk_size: usize,
    resource: Arc<str>,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            offset: start,
            chunk_size: IO_BUFFER_SIZE,
            resource: Arc::from(""),
            body,
        }
    }

    /// Sets the read size per chunk, clamped to `1..=MAX_CHUNK_SIZE`.
    pub(crate) fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Names the streamed resource in log output.
    pub(crate) fn resource(mut self, resource: impl Into<Arc<str>>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Number of bytes this stream yields in total.
    pub fn len(&self) -> u64 {
        self.length
    }
}

impl<B> std::fmt::Debug for RangedStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("state", &self.state)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("resource", &self.resource)
            .finish()
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
    Failed,
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for RangedStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        if let StreamState::Failed = *this.state {
            return Poll::Ready(None);
        }

        if let StreamState::Seek { start } = *this.state {
            match this.body.as_mut().start_seek(start) {
                Err(e) => { return fail(this.state, this.resource, *this.offset, e); }
                Ok(()) => {
                    let remaining = *this.length;
                    *this.state = StreamState::Seeking { remaining };
                }
            }
        }

        if let StreamState::Seeking { remaining } = *this.state {
            match this.body.as_mut().poll_complete(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return fail(this.state, this.resource, *this.offset, e); }
                Poll::Ready(Ok(())) => {
                    let buffer = allocate_buffer(*this.chunk_size, remaining);
                    *this.state = StreamState::Reading { buffer, remaining };
                }
            }
        }

        if let StreamState::Reading { buffer, remaining } = this.state {
            if *remaining == 0 {
                return Poll::Ready(None);
            }

            let uninit = buffer.spare_capacity_mut();

            // the smaller of the chunk size and the number of bytes remaining
            let nbytes = uninit.len()
                .min(*this.chunk_size)
                .min(usize::try_from(*remaining).unwrap_or(usize::MAX));

            let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

            match this.body.as_mut().poll_read(cx, &mut read_buf) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return fail(this.state, this.resource, *this.offset, e); }
                Poll::Ready(Ok(())) => {
                    match read_buf.filled().len() {
                        0 => {
                            // the source shrank underneath us, a short body
                            // would contradict the Content-Length already sent
                            let e = io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("source ended with {} bytes still expected", remaining),
                            );
                            return fail(this.state, this.resource, *this.offset, e);
                        }
                        n => {
                            // SAFETY: poll_read has filled the buffer with `n`
                            // additional bytes. `buffer.len` should always be
                            // 0 here, but include it for rigorous correctness
                            unsafe { buffer.set_len(buffer.len() + n); }

                            let read = n as u64;
                            *remaining -= read;
                            *this.offset += read;

                            let next = allocate_buffer(*this.chunk_size, *remaining);
                            let chunk = mem::replace(buffer, next);

                            return Poll::Ready(Some(Ok(chunk.freeze())));
                        }
                    }
                }
            }
        }

        unreachable!();
    }
}

#[pinned_drop]
impl<B> PinnedDrop for RangedStream<B> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        match this.state {
            StreamState::Seek { .. } => {}
            StreamState::Seeking { remaining } | StreamState::Reading { remaining, .. } if *remaining > 0 => {
                tracing::debug!(
                    resource = %this.resource,
                    offset = *this.offset,
                    remaining = *remaining,
                    "stream dropped before completion"
                );
            }
            _ => {}
        }
    }
}

fn fail(
    state: &mut StreamState,
    resource: &str,
    offset: u64,
    error: io::Error,
) -> Poll<Option<io::Result<Bytes>>> {
    tracing::error!(resource, offset, %error, "aborting ranged stream");
    *state = StreamState::Failed;
    Poll::Ready(Some(Err(error)))
}

fn allocate_buffer(chunk_size: usize, remaining: u64) -> BytesMut {
    let capacity = std::cmp::min(chunk_size as u64, remaining) as usize;
    BytesMut::with_capacity(capacity)
}
