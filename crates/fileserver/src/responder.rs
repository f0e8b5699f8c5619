//! Per-request transfer state machine
//!
//! A request moves through `Authorized -> Directory | FileOpen` and ends in
//! one of the terminal responses: full file, byte range, directory listing
//! or an error. Range arithmetic lives in [`crate::range`]; this module only
//! decides which branch runs and pairs each transfer with its log events.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::Response,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

use crate::body::TransferBody;
use crate::error::ServeError;
use crate::listing;
use crate::range::{self, RangeSpec};
use crate::state::{ServerState, INDEX_DOCUMENT};
use crate::transfer_log::{TransferEvent, TransferStatus};

/// Intermediate states of a request
#[derive(Debug)]
enum Stage {
    /// Token accepted, path not yet inspected
    Authorized { path: PathBuf, logical: String },
    Directory { path: PathBuf, logical: String },
    FileOpen { path: PathBuf, logical: String },
}

/// Everything the terminal branches need about the request
struct Transfer<'a> {
    state: &'a ServerState,
    client: String,
    request_path: &'a str,
    range: Option<RangeSpec>,
    /// `HEAD` requests get the headers only and are not logged as transfers
    head_only: bool,
}

/// Axum handler for every `GET`/`HEAD` request
pub async fn transfer(
    State(state): State<ServerState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match respond(&state, client, method == Method::HEAD, &uri, &headers).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(client = %client.ip(), "Request rejected: {}", err);
            err.into_response_with_redirect(state.not_found_redirect())
        }
    }
}

async fn respond(
    state: &ServerState,
    client: SocketAddr,
    head_only: bool,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Response, ServeError> {
    let resource = state
        .authorizer()
        .authorize_and_translate(uri.path())
        .ok_or(ServeError::NotFound)?;

    // Parsed before touching the filesystem so a bad header costs nothing
    let range_header = headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ServeError::BadRequest("range header is not ASCII"))
        })
        .transpose()?;
    let range = range::parse(range_header)?;

    let transfer = Transfer {
        state,
        client: client.ip().to_string(),
        request_path: uri.path(),
        range,
        head_only,
    };

    let mut stage = Stage::Authorized {
        logical: resource.logical_path(),
        path: resource.filesystem_path,
    };

    loop {
        stage = match stage {
            Stage::Authorized { path, logical } => {
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .map_err(|_| ServeError::NotFound)?;
                if metadata.is_dir() {
                    Stage::Directory { path, logical }
                } else {
                    Stage::FileOpen { path, logical }
                }
            }
            Stage::Directory { path, logical } => {
                let index = path.join(INDEX_DOCUMENT);
                if is_file(&index).await {
                    Stage::FileOpen {
                        path: index,
                        logical: format!("{}/{}", logical.trim_end_matches('/'), INDEX_DOCUMENT),
                    }
                } else {
                    return transfer.listing(&path).await;
                }
            }
            Stage::FileOpen { path, logical } => {
                let file = File::open(&path).await.map_err(|_| ServeError::NotFound)?;
                let metadata = file.metadata().await.map_err(|_| ServeError::NotFound)?;
                if !metadata.is_file() {
                    return Err(ServeError::NotFound);
                }
                let length = metadata.len();

                return match transfer.range {
                    Some(spec) => transfer.partial(file, &path, logical, length, spec).await,
                    None => transfer.full(file, &path, logical, length),
                };
            }
        };
    }
}

impl Transfer<'_> {
    /// `200 OK` with the whole file
    fn full(
        &self,
        file: File,
        path: &Path,
        logical: String,
        length: u64,
    ) -> Result<Response, ServeError> {
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        let body = if self.head_only {
            Body::empty()
        } else {
            self.state.record(TransferEvent::new(
                logical.as_str(),
                TransferStatus::Start,
                self.client.as_str(),
            ));
            let completion =
                TransferEvent::new(logical, TransferStatus::Complete, self.client.as_str());
            Body::from_stream(TransferBody::new(
                file,
                length,
                self.state.transfer_log().clone(),
                completion,
            ))
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime_type.as_ref())
            .header(header::CONTENT_LENGTH, length)
            .header(header::ACCEPT_RANGES, "bytes");

        if self.state.is_attachment(path) {
            builder = builder.header(header::CONTENT_DISPOSITION, attachment_disposition(path));
        }

        builder
            .body(body)
            .map_err(|e| ServeError::Internal(format!("Failed to build response: {}", e)))
    }

    /// `206 Partial Content` with the resolved byte window
    async fn partial(
        &self,
        mut file: File,
        path: &Path,
        logical: String,
        length: u64,
        spec: RangeSpec,
    ) -> Result<Response, ServeError> {
        let window = spec
            .resolve(length)
            .map_err(|_| ServeError::RangeNotSatisfiable(length))?;

        let body = if self.head_only {
            Body::empty()
        } else {
            file.seek(std::io::SeekFrom::Start(window.start))
                .await
                .map_err(|_| ServeError::NotFound)?;

            self.state.record(
                TransferEvent::new(logical.as_str(), TransferStatus::RangeStart, self.client.as_str())
                    .with_range(window.start, window.end),
            );

            let completion =
                TransferEvent::new(logical, TransferStatus::RangeComplete, self.client.as_str())
                    .with_range(window.start, window.end);
            Body::from_stream(TransferBody::new(
                file,
                window.len(),
                self.state.transfer_log().clone(),
                completion,
            ))
        };

        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, mime_type.as_ref())
            .header(header::CONTENT_LENGTH, window.len())
            .header(header::CONTENT_RANGE, window.content_range(length))
            .header(header::ACCEPT_RANGES, "bytes")
            .body(body)
            .map_err(|e| ServeError::Internal(format!("Failed to build response: {}", e)))
    }

    /// `200 OK` with an HTML listing of `dir`
    async fn listing(&self, dir: &Path) -> Result<Response, ServeError> {
        let entries = listing::read_entries(dir).await.map_err(|e| {
            tracing::debug!("Failed to list directory: {}", e);
            ServeError::NotFound
        })?;
        let html = listing::render(self.request_path, &entries);

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CONTENT_LENGTH, html.len())
            .body(Body::from(html))
            .map_err(|e| ServeError::Internal(format!("Failed to build response: {}", e)))
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// `attachment; filename="<name>"` with quotes and backslashes escaped
fn attachment_disposition(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{}\"", escaped)
}
