//! Plugin identity digests.
//!
//! The identity of a plugin covers everything that can change its behavior:
//! the sanitized source, the options string handed to the factory and the
//! entry point used to obtain the factory.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::source::SourceBundle;

const REPOSITORY_DOMAIN: &[u8] = b"repository:";

/// Lowercase hex SHA-256 digest used as the plugin cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PluginIdentity(String);

impl PluginIdentity {
    /// Hashes the bundle contents, sorted so retrieval order does not matter.
    pub fn from_bundle(bundle: &SourceBundle, options: &str, entry_point: &str) -> Self {
        let mut contents: Vec<&str> = bundle.files().iter().map(|f| f.content.as_str()).collect();
        contents.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(contents.join("\n").as_bytes());
        hasher.update(options.as_bytes());
        hasher.update(entry_point.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Uses a repository's precomputed fingerprint in place of the contents.
    pub fn from_repository_identity(identity: &str, options: &str, entry_point: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(REPOSITORY_DOMAIN);
        for part in [identity, options, entry_point] {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
