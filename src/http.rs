// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP surface: feed reads, audio delivery and the processing trigger.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{error, info};

use crate::episode::enclosure_mime_type;
use crate::error::{ProcessError, StoreError};
use crate::feed::{FEED_CONTENT_TYPE, FeedCache};
use crate::process::Processor;
use crate::store::{StoreHandle, validate_key};

/// Default timeout for feed reads and file lookups
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a processing pass triggered over HTTP
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(55 * 60);

/// Default lifetime of pre-signed download URLs
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// How published audio under the media prefix is handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FileDelivery {
    /// Stream the object bytes through the server
    #[default]
    Stream,
    /// Redirect to a pre-signed store URL
    Redirect,
}

/// Shared state behind every handler
pub struct AppState {
    pub store: StoreHandle,
    pub cache: Arc<FeedCache>,
    pub processor: Arc<Processor>,
    pub delivery: FileDelivery,
    pub signed_url_ttl: Duration,
    pub read_timeout: Duration,
    pub process_timeout: Duration,
}

impl AppState {
    /// State with default delivery and timeouts
    pub fn new(store: StoreHandle, cache: Arc<FeedCache>, processor: Arc<Processor>) -> Self {
        Self {
            store,
            cache,
            processor,
            delivery: FileDelivery::default(),
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }
}

/// Error returned by a handler, rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the router serving every endpoint
///
/// Audio is served at `/{media_prefix}{*path}`, which is the path part of
/// every enclosure URL the processor publishes, nested keys included.
pub fn router(state: Arc<AppState>) -> Router {
    let files_route = format!("/{}{{*path}}", state.processor.options().media_prefix);

    Router::new()
        .route("/health", get(health))
        .route("/", get(feed))
        .route("/feed", get(feed))
        .route("/index.xml", get(feed))
        .route(&files_route, get(file))
        .route("/process", post(process))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn feed(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let content = tokio::time::timeout(state.read_timeout, state.cache.read())
        .await
        .map_err(|_| ApiError::internal(format!("Feed read timed out after {:?}", state.read_timeout)))??;

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(FEED_CONTENT_TYPE))],
        content,
    )
        .into_response())
}

/// Map a path below the media prefix to its object key
fn media_key(media_prefix: &str, path: &str) -> Result<String, ApiError> {
    let key = format!("{media_prefix}{path}");
    validate_key(&key).map_err(|_| ApiError::bad_request(format!("Invalid file path: {path}")))?;
    Ok(key)
}

async fn file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let options = state.processor.options();
    let key = media_key(&options.media_prefix, &path)?;
    let timed_out = || ApiError::internal(format!("Lookup of {key} timed out"));

    match state.delivery {
        FileDelivery::Redirect => {
            let url = tokio::time::timeout(
                state.read_timeout,
                state.store.signed_url(&key, state.signed_url_ttl),
            )
            .await
            .map_err(|_| timed_out())??;

            let location = HeaderValue::from_str(url.as_str())
                .map_err(|e| ApiError::internal(format!("Unusable signed URL: {e}")))?;
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
        FileDelivery::Stream => {
            let opened = tokio::time::timeout(state.read_timeout, state.store.open(&key))
                .await
                .map_err(|_| timed_out())??;

            let content_type = enclosure_mime_type(&key, options.feed.detect_mime_type);
            Ok((
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                    (header::CONTENT_LENGTH, HeaderValue::from(opened.size)),
                ],
                Body::from_stream(opened.body),
            )
                .into_response())
        }
    }
}

/// Run a processing pass
///
/// The pass runs on its own task, so a client that hangs up does not cancel
/// it halfway through.
async fn process(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let processor = state.processor.clone();
    let limit = state.process_timeout;
    let pass = tokio::spawn(async move {
        tokio::time::timeout(limit, processor.run())
            .await
            .unwrap_or(Err(ProcessError::TimedOut(limit)))
    });

    let result = pass
        .await
        .map_err(|e| ApiError::internal(format!("Processing task failed: {e}")))??;

    info!(
        promoted = result.promoted,
        published = result.published,
        skipped = result.skipped,
        "Processing pass finished"
    );
    Ok(Json(json!({ "status": "processing completed" })).into_response())
}
