//! Plugin source acquisition.
//!
//! A [`SourceRepository`] produces a [`SourceBundle`]: the files of one
//! loadable package plus the import path the host should use for it.
//! Three backends are provided:
//!
//! - [`StaticRepository`]: an in-memory list of file contents
//! - [`DirectoryRepository`]: a module directory on disk or in a [`VirtualTree`]
//! - [`GitRepository`]: a shallow clone of a remote branch or tag
//!
//! ```rust,no_run
//! use dynplug::source::{DirectoryRepository, ModuleLayout, SourceRepository};
//!
//! # async fn example() -> Result<(), dynplug::Error> {
//! let repo = DirectoryRepository::open("./plugins/users", &ModuleLayout::default()).await?;
//! let bundle = repo.get_code().await?;
//! println!("{} files for {}", bundle.len(), bundle.import_path());
//! # Ok(())
//! # }
//! ```

mod directory;
mod git;
mod static_list;
mod tree;

pub use directory::{DirectoryRepository, MODULE_ROOT};
pub use git::{CloneCache, GitAuth, GitRepository, GitSourceConfig};
pub use static_list::{STATIC_IMPORT_PATH, StaticRepository};
pub use tree::VirtualTree;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One file of a plugin package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path inside the virtual filesystem handed to the host.
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }

    /// Directory part of the virtual path, empty for root files.
    pub fn dir(&self) -> &str {
        self.path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }
}

/// Immutable set of files representing one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBundle {
    files: Vec<SourceFile>,
    import_path: String,
    module_root: Option<String>,
}

impl SourceBundle {
    pub fn new(files: Vec<SourceFile>, import_path: impl Into<String>) -> Self {
        Self {
            files,
            import_path: import_path.into(),
            module_root: None,
        }
    }

    /// Sets the root the host resolves module imports under.
    pub fn with_module_root(mut self, root: impl Into<String>) -> Self {
        self.module_root = Some(root.into());
        self
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<SourceFile> {
        self.files
    }

    pub fn import_path(&self) -> &str {
        &self.import_path
    }

    pub fn module_root(&self) -> Option<&str> {
        self.module_root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Replaces the file set, keeping import path and module root.
    pub(crate) fn with_files(self, files: Vec<SourceFile>) -> Self {
        Self { files, ..self }
    }
}

/// How a plugin module is laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleLayout {
    /// File at the module root declaring `module NAME`.
    pub manifest_file: String,
    /// Extension of files carrying a `package NAME` declaration.
    pub source_extension: String,
    /// Package-name suffix marking test-only files.
    pub test_suffix: String,
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self {
            manifest_file: "go.mod".to_string(),
            source_extension: "go".to_string(),
            test_suffix: "_test".to_string(),
        }
    }
}

impl ModuleLayout {
    pub fn is_source(&self, file: &SourceFile) -> bool {
        file.extension() == Some(self.source_extension.as_str())
    }
}

/// Supplies plugin source code from some backend.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Backend name for logging and error context.
    fn name(&self) -> &str;

    /// Materializes the bundle. Cheap for every provided backend.
    async fn get_code(&self) -> Result<SourceBundle>;

    /// Precomputed content fingerprint, when the backend has one.
    fn identity(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_extension() {
        assert_eq!(SourceFile::new("plugin/0.go", "").extension(), Some("go"));
        assert_eq!(SourceFile::new("a/b/go.mod", "").extension(), Some("mod"));
        assert_eq!(SourceFile::new("Makefile", "").extension(), None);
        assert_eq!(SourceFile::new("dir/.hidden", "").extension(), None);
    }

    #[test]
    fn test_source_file_dir() {
        assert_eq!(SourceFile::new("plugin/0.go", "").dir(), "plugin");
        assert_eq!(SourceFile::new("a/b/c.go", "").dir(), "a/b");
        assert_eq!(SourceFile::new("main.go", "").dir(), "");
    }

    #[test]
    fn test_bundle_accessors() {
        let files = vec![SourceFile::new("plugin/0.go", "package tf")];
        let bundle = SourceBundle::new(files, "./plugin").with_module_root("modroot");

        assert_eq!(bundle.len(), 1);
        assert!(!bundle.is_empty());
        assert_eq!(bundle.import_path(), "./plugin");
        assert_eq!(bundle.module_root(), Some("modroot"));

        let replaced = bundle.with_files(Vec::new());
        assert!(replaced.is_empty());
        assert_eq!(replaced.import_path(), "./plugin");
    }

    #[test]
    fn test_layout_defaults() {
        let layout = ModuleLayout::default();
        assert!(layout.is_source(&SourceFile::new("plugin/0.go", "")));
        assert!(!layout.is_source(&SourceFile::new("go.mod", "")));
        assert_eq!(layout.test_suffix, "_test");
    }
}
