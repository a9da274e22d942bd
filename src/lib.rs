//! # dynplug
//!
//! Dynamic plugin engine for infrastructure-orchestration tools.
//!
//! A plugin is a bundle of source files that a dynamic-code host can import
//! at runtime. The engine fetches the bundle from a [`SourceRepository`],
//! sanitizes it, fingerprints it together with the runtime options and the
//! requested entry point, and hands back a ready-to-call plugin instance.
//! Instances are cached per fingerprint for the lifetime of the [`Engine`],
//! and concurrent first requests for the same fingerprint construct the
//! plugin exactly once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dynplug::host::NativeHost;
//! use dynplug::source::StaticRepository;
//! use dynplug::{Engine, PluginRequest};
//!
//! # async fn example(host: NativeHost) -> Result<(), dynplug::Error> {
//! let engine = Engine::new(Arc::new(host));
//!
//! let repository = StaticRepository::new(vec![
//!     "package tf\n\nfunc NewResourcePlugin(opts string) (Plugin, error) { return noop{}, nil }\n"
//!         .to_string(),
//! ]);
//!
//! let plugin = engine
//!     .new_resource_plugin(PluginRequest::new(repository).options("{}"))
//!     .await?;
//! let id = plugin.create("{}").await.map_err(|e| dynplug::Error::InvalidConfig(e.to_string()))?;
//! println!("created {id}");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod host;
pub mod identity;
pub mod loader;
pub mod observability;
pub mod provider;
pub mod sanitize;
pub mod source;
pub mod testing;

pub use api::{
    BoxError, DEFAULT_DATA_SOURCE_ENTRY_POINT, DEFAULT_RESOURCE_ENTRY_POINT, DataSourceFactory,
    DataSourcePlugin, Factory, PluginKind, PluginResult, ResourceFactory, ResourcePlugin,
};
pub use cache::{PluginCache, SingleFlight};
pub use config::{ConfigBuilder, ConfigError, ConfigProvider, ConfigProviderExt};
pub use engine::{Engine, EngineBuilder, EngineConfig, PluginRequest};
pub use host::{CodeHost, HostError, HostInstance, HostValue, NativeHost, SymbolTable, VirtualFs};
pub use identity::PluginIdentity;
pub use loader::{DataSourceShape, DynamicLoader, FactoryShape, ResourceShape};
pub use observability::{EngineMetrics, LoadSpan, MetricsSummary};
pub use provider::{
    PluginDeclaration, PluginRegistry, ProviderConfig, ResourceState, SourceCodeDeclaration,
};
pub use sanitize::sanitize;
pub use source::{
    CloneCache, DirectoryRepository, GitAuth, GitRepository, GitSourceConfig, ModuleLayout,
    SourceBundle, SourceFile, SourceRepository, StaticRepository, VirtualTree,
};

/// Error type for dynplug operations.
///
/// Every variant names the stage that failed so callers can tell a broken
/// plugin source apart from a flaky network or a misconfigured adapter.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Backend I/O failed while retrieving plugin source.
    #[error("Source retrieval failed for {repository}: {message}")]
    Retrieval { repository: String, message: String },

    /// Module manifest is missing or cannot be parsed.
    #[error("Invalid module at {path}: {reason}")]
    InvalidModule { path: String, reason: String },

    /// A source file has no usable package declaration.
    #[error("Invalid package in {path}: {reason}")]
    InvalidPackage { path: String, reason: String },

    /// The host could not mount or import the bundle.
    #[error("Could not import plugin package {import_path}: {message}")]
    Import {
        import_path: String,
        message: String,
    },

    /// The requested entry point does not exist in the imported package.
    #[error("Entry point '{entry_point}' not found in {import_path}")]
    SymbolNotFound {
        entry_point: String,
        import_path: String,
    },

    /// The entry point exists but is not a factory of the expected shape.
    #[error("Entry point '{entry_point}' is not a {expected} factory (found {found})")]
    SignatureMismatch {
        entry_point: String,
        expected: PluginKind,
        found: String,
    },

    /// The factory ran and returned an error.
    #[error("Could not create {kind} plugin with '{entry_point}': {source}")]
    PluginConstruction {
        kind: PluginKind,
        entry_point: String,
        #[source]
        source: BoxError,
    },

    /// A declared plugin failed to load while configuring the adapter.
    #[error("Could not load {kind} plugin '{plugin_id}': {source}")]
    PluginLoad {
        kind: PluginKind,
        plugin_id: String,
        #[source]
        source: Box<Error>,
    },

    /// The adapter was asked for a plugin id that was never registered.
    #[error("{kind} plugin '{plugin_id}' is not loaded")]
    PluginMissing { kind: PluginKind, plugin_id: String },

    /// A plugin operation returned an error.
    #[error("Plugin '{plugin_id}' failed on {operation}: {source}")]
    PluginOperation {
        plugin_id: String,
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// A resource create returned no identifier.
    #[error("Plugin '{plugin_id}' returned an empty ID on resource creation")]
    EmptyResourceId { plugin_id: String },

    /// Packed resource identifier could not be split.
    #[error("Invalid resource ID format: {id} (expected <PLUGIN ID>/<RESOURCE ID>)")]
    InvalidResourceId { id: String },

    /// Attributes payload is not a JSON object.
    #[error("Invalid attributes: {reason}")]
    InvalidAttributes { reason: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network or filesystem failures that may succeed on retry
    Transient,
    /// Malformed plugin source; fix the source before retrying
    InvalidSource,
    /// The host rejected the bundle or the entry point
    Load,
    /// The plugin's own factory or operation failed
    Plugin,
    /// Adapter-level misuse (unknown plugin, bad ids, bad config)
    Adapter,
    /// Internal errors (IO, JSON)
    Internal,
}

impl Error {
    pub fn retrieval(repository: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Retrieval {
            repository: repository.into(),
            message: message.into(),
        }
    }

    pub fn invalid_package(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPackage {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_module(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidModule {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Retrieval { .. } => ErrorCategory::Transient,

            Error::PluginLoad { source, .. } => source.category(),

            Error::InvalidModule { .. } | Error::InvalidPackage { .. } => {
                ErrorCategory::InvalidSource
            }

            Error::Import { .. }
            | Error::SymbolNotFound { .. }
            | Error::SignatureMismatch { .. } => ErrorCategory::Load,

            Error::PluginConstruction { .. }
            | Error::PluginOperation { .. }
            | Error::EmptyResourceId { .. } => ErrorCategory::Plugin,

            Error::PluginMissing { .. }
            | Error::InvalidResourceId { .. }
            | Error::InvalidAttributes { .. }
            | Error::InvalidConfig(_) => ErrorCategory::Adapter,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_invalid_source(&self) -> bool {
        self.category() == ErrorCategory::InvalidSource
    }

    pub fn is_load_error(&self) -> bool {
        self.category() == ErrorCategory::Load
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::InvalidConfig(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Env(e) => Error::InvalidConfig(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SymbolNotFound {
            entry_point: "NewResourcePlugin".to_string(),
            import_path: "./plugin".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("NewResourcePlugin"));
        assert!(msg.contains("./plugin"));

        let err = Error::SignatureMismatch {
            entry_point: "NewDataSourcePlugin".to_string(),
            expected: PluginKind::DataSource,
            found: "func(string) (ResourcePlugin, error)".to_string(),
        };
        assert!(err.to_string().contains("data source"));
    }

    #[test]
    fn test_error_categories() {
        assert!(Error::retrieval("git", "connection reset").is_retryable());
        assert!(Error::invalid_package("plugin/0.go", "no package").is_invalid_source());
        assert!(Error::invalid_module("go.mod", "missing").is_invalid_source());
        assert!(
            Error::Import {
                import_path: "./plugin".into(),
                message: "syntax".into()
            }
            .is_load_error()
        );

        let construction = Error::PluginConstruction {
            kind: PluginKind::Resource,
            entry_point: "NewResourcePlugin".into(),
            source: "boom".into(),
        };
        assert_eq!(construction.category(), ErrorCategory::Plugin);
        assert!(!construction.is_retryable());

        let missing = Error::PluginMissing {
            kind: PluginKind::Resource,
            plugin_id: "users".into(),
        };
        assert_eq!(missing.category(), ErrorCategory::Adapter);
    }

    #[test]
    fn test_plugin_load_inherits_category() {
        let err = Error::PluginLoad {
            kind: PluginKind::DataSource,
            plugin_id: "users".into(),
            source: Box::new(Error::retrieval("git", "timeout")),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("'users'"));
    }

    #[test]
    fn test_construction_error_keeps_source() {
        use std::error::Error as _;

        let err = Error::PluginConstruction {
            kind: PluginKind::Resource,
            entry_point: "NewResourcePlugin".into(),
            source: "token missing".into(),
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("token missing"));
    }

    #[test]
    fn test_config_error_conversion() {
        let config_err = config::ConfigError::InvalidValue {
            key: "engine.clone_timeout_secs".to_string(),
            message: "expected an integer".to_string(),
        };
        let err: Error = config_err.into();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
