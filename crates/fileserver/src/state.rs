//! Shared, read-only context handed to every request

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::authorizer::PathAuthorizer;
use crate::config::ServerConfig;
use crate::token::CapabilityToken;
use crate::transfer_log::{TransferEvent, TransferLog};

/// Name of the document served in place of a directory listing
pub const INDEX_DOCUMENT: &str = "index.html";

struct Settings {
    authorizer: PathAuthorizer,
    attachment_extensions: HashSet<String>,
    not_found_redirect: Option<String>,
}

/// Lowercase an extension and strip its leading dot; `None` when nothing is left
pub(crate) fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Server state shared by all request handlers
///
/// Everything except the transfer log is immutable after construction.
#[derive(Clone)]
pub struct ServerState {
    settings: Arc<Settings>,
    transfer_log: TransferLog,
}

impl ServerState {
    /// Create new server state
    ///
    /// # Arguments
    /// * `authorizer` - Token check and root mapping
    /// * `attachment_extensions` - Extensions forced to download, with or without the dot
    /// * `not_found_redirect` - Redirect target used instead of a bare 404
    /// * `transfer_log` - Open transfer log
    pub fn new(
        authorizer: PathAuthorizer,
        attachment_extensions: HashSet<String>,
        not_found_redirect: Option<String>,
        transfer_log: TransferLog,
    ) -> Self {
        Self {
            settings: Arc::new(Settings {
                authorizer,
                attachment_extensions: attachment_extensions
                    .iter()
                    .filter_map(|ext| normalize_extension(ext))
                    .collect(),
                not_found_redirect,
            }),
            transfer_log,
        }
    }

    /// Build state from a loaded configuration
    pub fn from_config(config: &ServerConfig, token: CapabilityToken, transfer_log: TransferLog) -> Self {
        let authorizer = PathAuthorizer::new(
            token,
            config.public_root.clone(),
            config.resources_root.clone(),
        );
        Self::new(
            authorizer,
            config.attachment_extensions(),
            config.not_found_redirect(),
            transfer_log,
        )
    }

    pub fn authorizer(&self) -> &PathAuthorizer {
        &self.settings.authorizer
    }

    pub fn not_found_redirect(&self) -> Option<&str> {
        self.settings.not_found_redirect.as_deref()
    }

    pub fn transfer_log(&self) -> &TransferLog {
        &self.transfer_log
    }

    /// Whether a file should be sent with `Content-Disposition: attachment`
    pub fn is_attachment(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.settings.attachment_extensions.contains(&ext))
    }

    /// Submit a transfer event; a closed log is reported and otherwise ignored
    pub fn record(&self, event: TransferEvent) {
        if let Err(e) = self.transfer_log.record(event) {
            tracing::warn!("Transfer event dropped: {}", e);
        }
    }
}
