//! HTTP routes for the file server.

use std::io;
use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use super::mime::content_type;
use crate::registry::{FileId, FileListing, SharedRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
}

/// Errors answered to a single download request.
///
/// None of these affect the listener or other requests.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("File not found: {0}")]
    NotRegistered(FileId),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        match &self {
            TransferError::NotRegistered(id) => {
                warn!(id = %id, "Download requested for unknown file");
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            TransferError::Read { path, source } => {
                error!(path = %path.display(), error = %source, "Failed to read shared file");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The shared file could not be read",
                )
                    .into_response()
            }
            TransferError::Response(e) => {
                error!(error = %e, "Failed to build download response");
                (StatusCode::INTERNAL_SERVER_ERROR, "Transfer failed").into_response()
            }
        }
    }
}

/// Build the router with all routes.
pub fn build_router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/file/:id", get(download_handler))
        .route("/files", get(list_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { registry })
}

/// Handler streaming a shared file as an attachment.
async fn download_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, TransferError> {
    let id = FileId::from(id);

    // Release the lock before touching the filesystem.
    let file = {
        let registry = state.registry.read().await;
        registry.get(&id).cloned()
    }
    .ok_or_else(|| TransferError::NotRegistered(id.clone()))?;

    let read_error = |source: io::Error| TransferError::Read {
        path: file.source_path.clone(),
        source,
    };

    let handle = File::open(&file.source_path).await.map_err(read_error)?;
    let metadata = handle.metadata().await.map_err(read_error)?;
    if !metadata.is_file() {
        return Err(read_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    debug!(id = %id, name = %file.display_name, size = metadata.len(), "Serving file");

    let body = Body::from_stream(ReaderStream::new(handle));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&file.display_name))
        .header(header::CONTENT_LENGTH, metadata.len().to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&file.display_name),
        )
        .body(body)?;

    Ok(response)
}

/// Handler listing every shared file.
async fn list_handler(State(state): State<AppState>) -> Json<Vec<FileListing>> {
    let registry = state.registry.read().await;
    Json(registry.list())
}

/// Build an `attachment` disposition for `name`.
///
/// Non-ASCII names get an ASCII `filename` fallback plus an RFC 5987
/// `filename*` parameter carrying the UTF-8 name.
pub fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c.is_ascii() { c } else { '_' })
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect();

    if name.is_ascii() {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let encoded: String = name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
