//! HTTPS server wiring: router, tracing and TLS listener

use axum::{body::Body, http::Request, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::path::Path;
use tower_http::trace::TraceLayer;

use crate::responder::transfer;
use crate::state::ServerState;

/// File server API for managing the HTTPS server
#[derive(Clone)]
pub struct FileServerApi {
    state: ServerState,
}

impl FileServerApi {
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    /// Create the axum router with all routes configured
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(transfer))
            .route("/*path", get(transfer))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %redact_token(request.uri().path()),
                )
            }))
    }

    /// Serve over TLS until `handle` is told to shut down
    ///
    /// # Arguments
    /// * `addr` - Address to bind to
    /// * `tls` - Certificate and key material
    /// * `handle` - Shutdown handle shared with the process lifecycle
    pub async fn serve_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        handle: Handle,
    ) -> crate::Result<()> {
        tracing::info!("File server listening on {}", addr);

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router().into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("File server stopped");
        Ok(())
    }
}

/// Load a PEM certificate chain and private key
pub async fn load_tls(certfile: &Path, keyfile: &Path) -> crate::Result<RustlsConfig> {
    let config = RustlsConfig::from_pem_file(certfile, keyfile).await?;
    tracing::info!(
        cert = %certfile.display(),
        key = %keyfile.display(),
        "Loaded TLS certificate"
    );
    Ok(config)
}

/// Replace the first path segment (the capability token) for log output
pub fn redact_token(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.split_once('/') {
        Some((_, rest)) => format!("/<token>/{}", rest),
        None => "/<token>".to_string(),
    }
}
