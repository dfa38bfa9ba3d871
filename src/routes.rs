//! HTTP surface: video streaming, video metadata and static files.

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::fs::File;

use crate::error::{StreamError, StreamResult};
use crate::guard::{ResourceLocator, StorageRoot};
use crate::{Config, ContentDescriptor, KnownSize, Ranged, ServeOptions};

/// Shared, immutable state of the router. Nothing per-request lives here.
#[derive(Debug, Clone)]
pub struct AppState {
    pub videos: StorageRoot,
    pub stream_options: ServeOptions,
    /// `None` disables the static file route.
    pub files: Option<(StorageRoot, ServeOptions)>,
}

impl AppState {
    /// Opens (and creates, if needed) the directories named by `config`.
    pub async fn from_config(config: &Config) -> std::io::Result<Self> {
        let videos = StorageRoot::open(config.video_root()).await?;
        let files = if config.files.enabled {
            Some((StorageRoot::open(&config.storage_root).await?, config.files_options()))
        } else {
            None
        };
        Ok(AppState { videos, stream_options: config.stream_options(), files })
    }
}

/// Metadata answer of the video-info route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified_epoch_millis: u64,
}

async fn health() {}

pub fn router(state: AppState, api_prefix: &str) -> Router {
    let files_enabled = state.files.is_some();

    let mut api = Router::new()
        .route("/stream/video/{filename}", get(stream_video))
        .route("/stream/video-info/{filename}", get(video_info));
    if files_enabled {
        api = api.route("/files/{*path}", get(get_file));
    }
    let api = api.with_state(Arc::new(state));

    let prefix = api_prefix.trim_end_matches('/');
    let router = if prefix.is_empty() {
        api
    } else if prefix.starts_with('/') {
        Router::new().nest(prefix, api)
    } else {
        Router::new().nest(&format!("/{prefix}"), api)
    };

    router
        .route("/health", get(health))
        .layer(middleware::from_fn(log_request))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    if path == "/health" {
        tracing::debug!(%method, %path, status, elapsed_ms, "request");
    } else {
        tracing::info!(%method, %path, status, elapsed_ms, "request");
    }
    response
}

fn range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

pub async fn stream_video(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> StreamResult<Response> {
    serve(&state.videos, &filename, range_header(&headers), &state.stream_options).await
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> StreamResult<Response> {
    let Some((root, options)) = &state.files else {
        return Err(StreamError::NotFound);
    };
    serve(root, &path, range_header(&headers), options).await
}

pub async fn video_info(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> StreamResult<Json<VideoInfo>> {
    let locator = state.videos.locate(&filename).await?;
    let descriptor = describe(&locator).await?;

    Ok(Json(VideoInfo {
        filename: locator.identifier,
        size: descriptor.total_length,
        content_type: descriptor.mime_type.to_string(),
        last_modified_epoch_millis: descriptor.last_modified_millis(),
    }))
}

/// Stats a located file; anything but a regular file is not found.
async fn describe(locator: &ResourceLocator) -> StreamResult<ContentDescriptor> {
    let metadata = match tokio::fs::metadata(&locator.path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StreamError::NotFound),
        Err(e) => return Err(StreamError::io(format!("stat {}", locator.path.display()), e)),
    };
    if !metadata.is_file() {
        return Err(StreamError::NotFound);
    }
    Ok(ContentDescriptor::from_metadata(FsPath::new(&locator.identifier), &metadata))
}

/// Guard, stat, open, then answer with the requested window.
pub async fn serve(
    root: &StorageRoot,
    identifier: &str,
    range: Option<String>,
    options: &ServeOptions,
) -> StreamResult<Response> {
    let locator = root.locate(identifier).await?;
    let descriptor = describe(&locator).await?;

    // the file may vanish between stat and open, that is a server error
    let file = File::open(&locator.path)
        .await
        .map_err(|e| StreamError::io(format!("open {}", locator.path.display()), e))?;
    let body = KnownSize::sized(file, descriptor.total_length);

    let response = Ranged::new(range, body, descriptor)
        .with_options(options.clone())
        .try_respond()?;
    Ok(response.into_response())
}
