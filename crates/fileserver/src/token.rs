//! Capability token guarding every served URL

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of random bytes behind a token (96 hex characters once encoded)
const TOKEN_BYTES: usize = 48;

/// Secret, URL-safe string that must lead every request path
///
/// Generated once at startup and never written to any log sink. The only
/// way to read the raw value is [`CapabilityToken::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityToken(String);

impl CapabilityToken {
    /// Generate a fresh token from the OS random number generator
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an existing token value
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Check a candidate path segment against the token
    ///
    /// Both sides are hashed first so the comparison does not short-circuit
    /// on a prefix shared with the secret.
    pub fn matches(&self, candidate: &str) -> bool {
        digest(&self.0) == digest(candidate)
    }

    /// Raw token value, for building the share URL
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CapabilityToken(<redacted>)")
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}
