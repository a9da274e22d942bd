//! Dynamic-code host contract.
//!
//! The engine never executes plugin source itself. It hands a sanitized
//! bundle to a [`CodeHost`], which creates one isolated [`HostInstance`] per
//! load. The loader then makes symbol tables importable, imports the bundle
//! under an alias and evaluates `alias.EntryPoint`. The resulting
//! [`HostValue`] is either one of the two recognized factory shapes or an
//! opaque value that the loader reports as a signature mismatch.

mod native;

pub use native::NativeHost;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;

use crate::api::{DataSourceFactory, ResourceFactory};
use crate::source::SourceBundle;

/// Import path of the engine API surface exposed to plugins.
pub const SUPPORT_PACKAGE: &str = "dynplug/api/v1";

/// Read-only file tree mounted into a host instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFs {
    files: BTreeMap<String, String>,
    module_root: Option<String>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Files whose parent directory is exactly `dir`.
    pub fn dir_entries<'a>(
        &'a self,
        dir: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.files.iter().filter_map(move |(path, content)| {
            let parent = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            (parent == dir).then_some((path.as_str(), content.as_str()))
        })
    }

    /// Directory module imports are resolved under, if the bundle came from a module.
    pub fn module_root(&self) -> Option<&str> {
        self.module_root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl From<&SourceBundle> for VirtualFs {
    fn from(bundle: &SourceBundle) -> Self {
        Self {
            files: bundle
                .files()
                .iter()
                .map(|f| (f.path.clone(), f.content.clone()))
                .collect(),
            module_root: bundle.module_root().map(str::to_string),
        }
    }
}

/// Importable packages and the names they export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    packages: BTreeMap<String, BTreeSet<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbols<I, S>(mut self, package: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages
            .entry(package.into())
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// The engine API every plugin can import.
    pub fn support() -> Self {
        Self::new().with_symbols(
            SUPPORT_PACKAGE,
            [
                "ResourcePlugin",
                "DataSourcePlugin",
                "NewResourcePluginFunc",
                "NewDataSourcePluginFunc",
            ],
        )
    }

    pub fn merge(&mut self, other: &SymbolTable) {
        for (package, names) in &other.packages {
            self.packages
                .entry(package.clone())
                .or_default()
                .extend(names.iter().cloned());
        }
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn exports(&self, package: &str) -> Option<&BTreeSet<String>> {
        self.packages.get(package)
    }

    pub fn contains(&self, package: &str, name: &str) -> bool {
        self.packages
            .get(package)
            .is_some_and(|names| names.contains(name))
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Result of evaluating an expression in a host instance.
#[derive(Clone)]
pub enum HostValue {
    ResourceFactory(ResourceFactory),
    DataSourceFactory(DataSourceFactory),
    /// Anything else; `type_name` is the host's description of its type.
    Opaque { type_name: String },
}

impl HostValue {
    pub fn type_name(&self) -> &str {
        match self {
            Self::ResourceFactory(_) => crate::api::PluginKind::Resource.signature(),
            Self::DataSourceFactory(_) => crate::api::PluginKind::DataSource.signature(),
            Self::Opaque { type_name } => type_name,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostValue").field(&self.type_name()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("could not create host instance: {0}")]
    Instantiate(String),

    #[error("could not register symbols: {0}")]
    Symbols(String),

    #[error("could not import {path}: {message}")]
    Import { path: String, message: String },

    #[error("undefined: {expression}")]
    UndefinedSymbol { expression: String },

    #[error("could not evaluate {expression}: {message}")]
    Eval { expression: String, message: String },
}

/// Factory for isolated interpreter instances.
pub trait CodeHost: Send + Sync {
    fn name(&self) -> &str;

    /// Creates a fresh instance with `fs` mounted. Instances never share
    /// namespaces.
    fn instantiate(&self, fs: VirtualFs) -> Result<Box<dyn HostInstance>, HostError>;
}

#[async_trait]
pub trait HostInstance: Send {
    /// Makes the packages in `symbols` importable.
    async fn use_symbols(&mut self, symbols: &SymbolTable) -> Result<(), HostError>;

    /// Imports the package at `path` under `alias`.
    async fn import(&mut self, path: &str, alias: &str) -> Result<(), HostError>;

    /// Evaluates an expression such as `alias.Symbol`.
    async fn eval(&mut self, expression: &str) -> Result<HostValue, HostError>;
}
