//! In-memory file tree.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{Error, Result};

/// Files keyed by `/`-separated relative path, iterated in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl VirtualTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let path = path.into();
        let path = path.trim_start_matches("./").trim_start_matches('/');
        self.files.insert(path.to_string(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Re-roots the tree at `dir`. `"/"` and `""` return a copy of the whole tree.
    pub fn subtree(&self, dir: &str) -> Self {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return self.clone();
        }

        let prefix = format!("{dir}/");
        let files = self
            .files
            .iter()
            .filter_map(|(path, data)| {
                path.strip_prefix(&prefix)
                    .map(|rel| (rel.to_string(), data.clone()))
            })
            .collect();
        Self { files }
    }

    /// Reads every regular file below `root`. Symlinks are not followed.
    pub async fn from_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut tree = Self::new();
        let mut pending = vec![root.to_path_buf()];
        let fail = |path: &Path, e: std::io::Error| {
            Error::retrieval(
                root.display().to_string(),
                format!("{}: {e}", path.display()),
            )
        };

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| fail(&dir, e))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| fail(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| fail(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let data = tokio::fs::read(&path).await.map_err(|e| fail(&path, e))?;
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                tree.insert(rel, data);
            }
        }

        Ok(tree)
    }
}
