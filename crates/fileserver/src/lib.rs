//! HTTPS file server guarded by a capability token
//!
//! This crate serves two fixed directory trees to clients that present the
//! token as the first URL path segment, answers byte-range requests and
//! records every transfer in a SQLite-backed log.

mod authorizer;
mod body;
mod config;
mod error;
mod listing;
mod range;
mod responder;
mod server;
mod state;
mod token;
mod transfer_log;

pub use authorizer::{PathAuthorizer, ResourcePath, Root};
pub use config::{ConfigError, ServerConfig};
pub use error::ServeError;
pub use range::{parse as parse_range, ByteRange, RangeError, RangeSpec};
pub use server::{load_tls, redact_token, FileServerApi};
pub use state::ServerState;
pub use token::CapabilityToken;
pub use transfer_log::{TransferEvent, TransferLog, TransferLogError, TransferStatus};

pub use axum_server::Handle;

/// Result type alias for file server operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
