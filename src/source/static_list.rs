//! In-memory source list.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{SourceBundle, SourceFile, SourceRepository};
use crate::Result;

/// Import path of a static bundle, relative to the host's working directory.
pub const STATIC_IMPORT_PATH: &str = "./plugin";

const STATIC_DIR: &str = "plugin";

/// Wraps already loaded file contents; every entry is one source file of a
/// single package.
#[derive(Debug, Clone)]
pub struct StaticRepository {
    sources: Vec<String>,
    extension: String,
    identity: String,
}

impl StaticRepository {
    pub fn new(sources: Vec<String>) -> Self {
        let identity = list_identity(&sources);
        Self {
            sources,
            extension: "go".to_string(),
            identity,
        }
    }

    /// Extension used for the synthetic file names, `go` by default.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

impl FromIterator<String> for StaticRepository {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Order-independent fingerprint of the list.
fn list_identity(sources: &[String]) -> String {
    let mut sorted: Vec<&str> = sources.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for source in sorted {
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[async_trait]
impl SourceRepository for StaticRepository {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_code(&self) -> Result<SourceBundle> {
        let files = self
            .sources
            .iter()
            .enumerate()
            .map(|(i, src)| {
                let path = format!("{STATIC_DIR}/{i}.{}", self.extension);
                SourceFile::new(path, src.clone())
            })
            .collect();
        Ok(SourceBundle::new(files, STATIC_IMPORT_PATH))
    }

    fn identity(&self) -> Option<&str> {
        Some(&self.identity)
    }
}
