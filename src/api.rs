//! Plugin capability surface.
//!
//! These are the two shapes a dynamically loaded plugin can take. The
//! engine never looks inside the payloads: attributes, ids, arguments and
//! results are opaque strings (usually JSON objects) that only the plugin
//! interprets.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error returned by third-party plugin code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a plugin operation or factory call.
pub type PluginResult<T> = std::result::Result<T, BoxError>;

/// Factory symbol looked up for resource plugins when none is configured.
pub const DEFAULT_RESOURCE_ENTRY_POINT: &str = "NewResourcePlugin";

/// Factory symbol looked up for data source plugins when none is configured.
pub const DEFAULT_DATA_SOURCE_ENTRY_POINT: &str = "NewDataSourcePlugin";

/// Stateful plugin managing an externally tracked resource.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Creates the resource and returns the id that tracks it from now on.
    async fn create(&self, attributes: &str) -> PluginResult<String>;

    /// Reads the current attributes of the resource, used to detect drift.
    async fn read(&self, id: &str) -> PluginResult<String>;

    /// Updates the resource. `prior_attributes` are the attributes applied last time.
    async fn update(&self, id: &str, attributes: &str, prior_attributes: &str)
    -> PluginResult<()>;

    async fn delete(&self, id: &str) -> PluginResult<()>;
}

/// Stateless plugin answering read-only queries.
#[async_trait]
pub trait DataSourcePlugin: Send + Sync {
    async fn read(&self, arguments: &str) -> PluginResult<String>;
}

/// A resolved entry point: takes the opaque options string and builds an instance.
pub type Factory<P> = Arc<dyn Fn(&str) -> PluginResult<Arc<P>> + Send + Sync>;

pub type ResourceFactory = Factory<dyn ResourcePlugin>;

pub type DataSourceFactory = Factory<dyn DataSourcePlugin>;

/// The two plugin kinds the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Resource,
    DataSource,
}

impl PluginKind {
    pub fn default_entry_point(self) -> &'static str {
        match self {
            Self::Resource => DEFAULT_RESOURCE_ENTRY_POINT,
            Self::DataSource => DEFAULT_DATA_SOURCE_ENTRY_POINT,
        }
    }

    /// Call signature the host must expose for this kind's factory.
    pub fn signature(self) -> &'static str {
        match self {
            Self::Resource => "func(string) (ResourcePlugin, error)",
            Self::DataSource => "func(string) (DataSourcePlugin, error)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::DataSource => "data source",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
