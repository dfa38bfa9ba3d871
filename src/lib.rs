//! # video-stream
//!
//! HTTP range streaming of stored video files for [`axum`][1].
//!
//! The [`range`] module turns a raw `Range` header and a known length into a
//! [`Resolution`]. [`Ranged`] combines that with any body implementing the
//! [`RangeBody`] trait and answers `200`, `206` or `416` with the right
//! framing headers. The body is streamed in bounded chunks by
//! [`RangedStream`], so a large file is never buffered in memory.
//!
//! Any type implementing both [`AsyncRead`] and [`AsyncSeekStart`] can be
//! used through the [`KnownSize`] adapter struct. There is also special cased
//! support for [`tokio::fs::File`], see the [`KnownSize::file`] method.
//!
//! [`AsyncSeekStart`] is a trait defined by this crate which only allows
//! seeking from the start of a file. It is automatically implemented for any
//! type implementing [`AsyncSeek`].
//!
//! The [`routes`] module wires all of this into a router that resolves
//! file names beneath a [`StorageRoot`].
//!
//! ```no_run
//! use axum::http::HeaderMap;
//! use axum::response::{IntoResponse, Response};
//!
//! use video_stream::{ContentDescriptor, KnownSize, Ranged};
//!
//! async fn file(headers: HeaderMap) -> Response {
//!     let path = std::path::Path::new("clip.mp4");
//!     let metadata = tokio::fs::metadata(path).await.unwrap();
//!     let descriptor = ContentDescriptor::from_metadata(path, &metadata);
//!     let file = tokio::fs::File::open(path).await.unwrap();
//!     let body = KnownSize::sized(file, descriptor.total_length);
//!     let range = headers.get("range").and_then(|v| v.to_str().ok()).map(str::to_owned);
//!     Ranged::new(range, body, descriptor).into_response()
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

mod file;
mod stream;

pub mod config;
pub mod error;
pub mod guard;
pub mod range;
pub mod routes;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, ContentType, HeaderMapExt};
use tokio::io::{AsyncRead, AsyncSeek};

pub use config::Config;
pub use error::StreamError;
pub use file::{guess_mime, ContentDescriptor, KnownSize, FALLBACK_MIME};
pub use guard::{ResourceLocator, StorageRoot};
pub use range::{resolve, RangeSpec, Resolution, ResolvedInterval};
pub use stream::{RangedStream, IO_BUFFER_SIZE, MAX_CHUNK_SIZE};

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Streams never read past it even if the file grows afterwards.
    fn byte_size(&self) -> u64;
}

/// Per-route response policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    /// `max-age` of the `Cache-Control: public` directive.
    pub cache_max_age: Duration,
    /// Bytes read per body chunk, clamped to [`MAX_CHUNK_SIZE`].
    pub chunk_size: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        ServeOptions {
            cache_max_age: Duration::from_secs(86_400),
            chunk_size: IO_BUFFER_SIZE,
        }
    }
}

/// The main responder type. Implements [`IntoResponse`].
#[derive(Debug)]
pub struct Ranged<B: RangeBody + Send + 'static> {
    range: Option<String>,
    body: B,
    descriptor: ContentDescriptor,
    options: ServeOptions,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    /// Construct a ranged response over any type implementing [`RangeBody`]
    /// and the raw value of the request's `Range` header, if any.
    pub fn new(range: Option<String>, body: B, descriptor: ContentDescriptor) -> Self {
        Ranged { range, body, descriptor, options: ServeOptions::default() }
    }

    pub fn with_options(mut self, options: ServeOptions) -> Self {
        self.options = options;
        self
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. Returns [`RangeNotSatisfiable`] error if requested
    /// range in header was not satisfiable.
    pub fn try_respond(self) -> Result<RangedResponse<B>, RangeNotSatisfiable> {
        let total_bytes = self.body.byte_size();
        let headers = RepresentationHeaders::new(&self.descriptor, &self.options);

        match range::resolve(self.range.as_deref(), total_bytes) {
            Resolution::Full => {
                let stream = RangedStream::new(self.body, 0, total_bytes)
                    .chunk_size(self.options.chunk_size)
                    .resource(self.descriptor.filename);
                Ok(RangedResponse::Full {
                    content_length: ContentLength(total_bytes),
                    headers,
                    stream,
                })
            }
            Resolution::Partial(interval) => {
                let content_range = ContentRange::bytes(interval.start..=interval.end, total_bytes)
                    .expect("ContentRange::bytes cannot panic in this usage");
                let stream = RangedStream::new(self.body, interval.start, interval.len())
                    .chunk_size(self.options.chunk_size)
                    .resource(self.descriptor.filename);
                Ok(RangedResponse::Partial {
                    content_range,
                    content_length: ContentLength(interval.len()),
                    headers,
                    stream,
                })
            }
            Resolution::Unsatisfiable => {
                tracing::debug!(
                    resource = %self.descriptor.filename,
                    range = ?self.range,
                    total_bytes,
                    "range not satisfiable"
                );
                Err(RangeNotSatisfiable(ContentRange::unsatisfied_bytes(total_bytes)))
            }
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeNotSatisfiable(pub ContentRange);

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let header = TypedHeader(self.0);
        (status, header, ()).into_response()
    }
}

/// Headers shared by full and partial responses.
#[derive(Debug, Clone)]
pub struct RepresentationHeaders {
    pub content_type: ContentType,
    pub cache_control: HeaderValue,
    pub content_disposition: HeaderValue,
}

impl RepresentationHeaders {
    fn new(descriptor: &ContentDescriptor, options: &ServeOptions) -> Self {
        let cache_control = format!("public, max-age={}", options.cache_max_age.as_secs());
        RepresentationHeaders {
            content_type: ContentType::from(descriptor.mime_type.clone()),
            cache_control: HeaderValue::from_str(&cache_control)
                .unwrap_or(HeaderValue::from_static("public")),
            content_disposition: inline_disposition(&descriptor.filename),
        }
    }

    fn write(self, map: &mut HeaderMap) {
        map.typed_insert(self.content_type);
        map.typed_insert(AcceptRanges::bytes());
        map.insert(header::CACHE_CONTROL, self.cache_control);
        map.insert(header::CONTENT_DISPOSITION, self.content_disposition);
    }
}

/// `inline; filename="..."`, falling back to a bare `inline` when the name
/// can't be carried in a header value.
fn inline_disposition(filename: &str) -> HeaderValue {
    if filename.is_empty() {
        return HeaderValue::from_static("inline");
    }
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    HeaderValue::from_str(&format!("inline; filename=\"{escaped}\""))
        .unwrap_or(HeaderValue::from_static("inline"))
}

/// Data type containing computed headers and body for a range response. Implements [`IntoResponse`].
#[derive(Debug)]
pub enum RangedResponse<B> {
    /// No range requested, `200` with the whole resource.
    Full {
        content_length: ContentLength,
        headers: RepresentationHeaders,
        stream: RangedStream<B>,
    },
    /// A single satisfiable range, `206`.
    Partial {
        content_range: ContentRange,
        content_length: ContentLength,
        headers: RepresentationHeaders,
        stream: RangedStream<B>,
    },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let mut map = HeaderMap::new();

        use RangedResponse::*;
        let (status, stream) = match self {
            Full { content_length, headers, stream } => {
                headers.write(&mut map);
                map.typed_insert(content_length);
                (StatusCode::OK, stream)
            }
            Partial { content_range, content_length, headers, stream } => {
                headers.write(&mut map);
                map.typed_insert(content_length);
                map.typed_insert(content_range);
                (StatusCode::PARTIAL_CONTENT, stream)
            }
        };

        (status, map, stream).into_response()
    }
}
