use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use mime_guess::Mime;
use pin_project::pin_project;
use tokio::io::{ReadBuf, AsyncRead};

use crate::{RangeBody, AsyncSeekStart};

/// MIME type used when the extension doesn't tell us anything.
pub const FALLBACK_MIME: &str = "video/mp4";

/// Implements [`RangeBody`] for any [`AsyncRead`] and [`AsyncSeekStart`], constructed with a fixed byte size.
#[pin_project]
pub struct KnownSize<B: AsyncRead + AsyncSeekStart> {
    byte_size: u64,
    #[pin]
    body: B,
}

impl<B: AsyncRead + AsyncSeekStart> std::fmt::Debug for KnownSize<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnownSize")
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

impl KnownSize<tokio::fs::File> {
    /// Calls [`tokio::fs::File::metadata`] to determine file size.
    pub async fn file(file: tokio::fs::File) -> io::Result<KnownSize<tokio::fs::File>> {
        let byte_size = file.metadata().await?.len();
        Ok(KnownSize { byte_size, body: file })
    }
}

impl<B: AsyncRead + AsyncSeekStart> KnownSize<B> {
    /// Construct a [`KnownSize`] instance with a byte size supplied manually.
    ///
    /// Streams built over it never read past `byte_size`, even if the
    /// underlying source grows.
    pub fn sized(body: B, byte_size: u64) -> Self {
        KnownSize { byte_size, body }
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncRead for KnownSize<B> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        this.body.poll_read(cx, buf)
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncSeekStart for KnownSize<B> {
    fn start_seek(
        self: Pin<&mut Self>,
        position: u64,
    ) -> io::Result<()> {
        let this = self.project();
        this.body.start_seek(position)
    }

    fn poll_complete(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        this.body.poll_complete(cx)
    }
}

impl<B: AsyncRead + AsyncSeekStart> RangeBody for KnownSize<B> {
    fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

/// What a response needs to know about a file before streaming it.
///
/// Read fresh from the file system on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    /// Name used in `Content-Disposition`.
    pub filename: String,
    pub mime_type: Mime,
    pub total_length: u64,
    pub last_modified: Option<SystemTime>,
}

impl ContentDescriptor {
    /// Builds a descriptor from already-fetched metadata of `path`.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        ContentDescriptor {
            filename,
            mime_type: guess_mime(path),
            total_length: metadata.len(),
            last_modified: metadata.modified().ok(),
        }
    }

    /// Milliseconds since the Unix epoch of the last modification, `0` when
    /// the platform doesn't report it.
    pub fn last_modified_millis(&self) -> u64 {
        self.last_modified
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Guesses the MIME type of `path` from its extension.
pub fn guess_mime(path: &Path) -> Mime {
    mime_guess::from_path(path)
        .first()
        .unwrap_or_else(|| FALLBACK_MIME.parse().unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM))
}
