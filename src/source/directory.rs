//! Module directory backend.

use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{ModuleLayout, SourceBundle, SourceFile, SourceRepository, VirtualTree};
use crate::{Error, Result};

/// Root of the virtual module tree handed to the host; files land under
/// `{MODULE_ROOT}/src/{module}/`.
pub const MODULE_ROOT: &str = "modroot";

fn module_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^module +([^\s]+) *$").expect("valid module regex"))
}

fn ignored_paths() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"^\.git/",
            r"(^|/)vendor/(.+/)?dynplug/",
            r"(^|/)vendor/(.+/)?dynplug-host/",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid ignore regex"))
        .collect()
    })
}

fn is_ignored(path: &str) -> bool {
    ignored_paths().iter().any(|rx| rx.is_match(path))
}

pub(crate) fn extract_module(manifest: &str) -> Option<&str> {
    module_regex()
        .captures(manifest)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// A module rooted at a directory whose manifest declares `module NAME`.
///
/// The tree is read once at construction; [`get_code`](SourceRepository::get_code)
/// only clones the prepared file list.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    name: String,
    module: String,
    files: Vec<SourceFile>,
    identity: String,
}

impl DirectoryRepository {
    /// Reads the module at `dir` from disk.
    pub async fn open(dir: impl AsRef<Path>, layout: &ModuleLayout) -> Result<Self> {
        let dir = dir.as_ref();
        let tree = VirtualTree::from_dir(dir).await?;
        Self::build(format!("dir:{}", dir.display()), &tree, layout)
    }

    /// Builds the module from an in-memory tree rooted at the module directory.
    pub fn from_tree(tree: &VirtualTree, layout: &ModuleLayout) -> Result<Self> {
        Self::build("dir:<memory>".to_string(), tree, layout)
    }

    pub(crate) fn build(name: String, tree: &VirtualTree, layout: &ModuleLayout) -> Result<Self> {
        let manifest_file = layout.manifest_file.as_str();
        let manifest = tree.get(manifest_file).ok_or_else(|| {
            Error::invalid_module(manifest_file, "manifest not found at module root")
        })?;
        let manifest = std::str::from_utf8(manifest)
            .map_err(|_| Error::invalid_module(manifest_file, "manifest is not valid UTF-8"))?;
        let module = extract_module(manifest)
            .ok_or_else(|| Error::invalid_module(manifest_file, "could not get module name"))?
            .to_string();

        let src_root = format!("{MODULE_ROOT}/src/{module}");
        let mut hasher = Sha256::new();
        let mut files = Vec::with_capacity(tree.len());

        for (path, data) in tree.iter() {
            if is_ignored(path) {
                continue;
            }
            hasher.update(data);

            let file_path = format!("{src_root}/{path}");
            match std::str::from_utf8(data) {
                Ok(content) => files.push(SourceFile::new(file_path, content)),
                Err(_) if layout.is_source(&SourceFile::new(file_path, "")) => {
                    return Err(Error::invalid_module(path, "source file is not valid UTF-8"));
                }
                Err(_) => {
                    tracing::debug!(repository = %name, path, "Skipping non-text file");
                }
            }
        }

        tracing::debug!(
            repository = %name,
            module = %module,
            files = files.len(),
            "Module directory loaded"
        );

        Ok(Self {
            name,
            module,
            files,
            identity: hex::encode(hasher.finalize()),
        })
    }

    /// Module name declared by the manifest; also the import path.
    pub fn module(&self) -> &str {
        &self.module
    }
}

#[async_trait]
impl SourceRepository for DirectoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_code(&self) -> Result<SourceBundle> {
        let bundle = SourceBundle::new(self.files.clone(), self.module.clone());
        Ok(bundle.with_module_root(MODULE_ROOT))
    }

    fn identity(&self) -> Option<&str> {
        Some(&self.identity)
    }
}
