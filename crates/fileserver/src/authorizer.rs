//! Capability-token check and mapping of request paths onto the served trees

use std::path::{Component, Path, PathBuf};

use crate::token::CapabilityToken;

/// Path segment that selects the resources tree
const RESOURCES_SEGMENT: &str = "resources";

/// Which sandboxed tree a request resolves into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Public,
    Resources,
}

/// A request path that passed the token check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    /// Selected tree
    pub root: Root,
    /// Path below the selected root, containing only normal components
    pub relative: PathBuf,
    /// `root directory + relative`
    pub filesystem_path: PathBuf,
}

impl ResourcePath {
    /// Token-free path used when recording transfers, e.g. `/resources/a.png`
    pub fn logical_path(&self) -> String {
        let relative = self.relative.to_string_lossy();
        match (self.root, relative.is_empty()) {
            (Root::Public, true) => "/".to_string(),
            (Root::Public, false) => format!("/{}", relative),
            (Root::Resources, true) => format!("/{}/", RESOURCES_SEGMENT),
            (Root::Resources, false) => format!("/{}/{}", RESOURCES_SEGMENT, relative),
        }
    }
}

/// Validates the capability token and translates request paths
#[derive(Debug, Clone)]
pub struct PathAuthorizer {
    token: CapabilityToken,
    public_root: PathBuf,
    resources_root: PathBuf,
}

impl PathAuthorizer {
    /// Create an authorizer over two fixed roots
    ///
    /// # Arguments
    /// * `token` - Capability token expected as the first path segment
    /// * `public_root` - Directory served for ordinary paths
    /// * `resources_root` - Directory served below `/resources/`
    pub fn new(token: CapabilityToken, public_root: PathBuf, resources_root: PathBuf) -> Self {
        Self {
            token,
            public_root,
            resources_root,
        }
    }

    pub fn root_dir(&self, root: Root) -> &Path {
        match root {
            Root::Public => &self.public_root,
            Root::Resources => &self.resources_root,
        }
    }

    /// Translate a raw request path (no query string) into a filesystem path
    ///
    /// Returns `None` when the token is missing or wrong, when the remainder
    /// is not valid percent-encoded UTF-8, or when it tries to climb out of
    /// its root. Callers must treat `None` exactly like a missing resource.
    pub fn authorize_and_translate(&self, request_path: &str) -> Option<ResourcePath> {
        let trimmed = request_path.trim_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let candidate = parts.next().unwrap_or_default();
        if !self.token.matches(candidate) {
            return None;
        }

        let Some(rest) = parts.next() else {
            return Some(self.resolve(Root::Public, PathBuf::new()));
        };

        let decoded = urlencoding::decode(rest).ok()?;
        let decoded = decoded.trim_matches('/');
        let mut segments = decoded.splitn(2, '/');

        if segments.next() == Some(RESOURCES_SEGMENT) {
            let remainder = segments.next().unwrap_or_default();
            let relative = confine(remainder)?;
            Some(self.resolve(Root::Resources, relative))
        } else {
            let relative = confine(decoded)?;
            Some(self.resolve(Root::Public, relative))
        }
    }

    fn resolve(&self, root: Root, relative: PathBuf) -> ResourcePath {
        let base = self.root_dir(root);
        let filesystem_path = if relative.as_os_str().is_empty() {
            base.to_path_buf()
        } else {
            base.join(&relative)
        };
        ResourcePath {
            root,
            relative,
            filesystem_path,
        }
    }
}

/// Rebuild a decoded path from its normal components only
///
/// `.` and empty segments are skipped; `..`, root or drive prefixes reject
/// the whole path.
fn confine(decoded: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(decoded).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}
