//! Helpers for testing plugins through the same path the provider uses.
//!
//! Loading a plugin through an [`Engine`] instead of calling its factory
//! directly surfaces unsupported constructs and loader problems in the
//! plugin's own test suite.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dynplug::{Engine, NativeHost};
//!
//! # async fn example(host: NativeHost) -> Result<(), dynplug::Error> {
//! let engine = Engine::new(Arc::new(host));
//! let plugin = dynplug::testing::new_test_resource_plugin(&engine, "./plugin", "{}").await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{DataSourcePlugin, ResourcePlugin};
use crate::engine::{Engine, PluginRequest};
use crate::source::StaticRepository;
use crate::{Error, Result};

/// Loads the resource plugin whose files sit directly in `plugin_dir`.
///
/// Only one directory level is read; every file with the engine's source
/// extension becomes part of the plugin.
pub async fn new_test_resource_plugin(
    engine: &Engine,
    plugin_dir: impl AsRef<Path>,
    options: &str,
) -> Result<Arc<dyn ResourcePlugin>> {
    let request = plugin_request(engine, plugin_dir.as_ref(), options).await?;
    engine.new_resource_plugin(request).await
}

/// Data source counterpart of [`new_test_resource_plugin`].
pub async fn new_test_data_source_plugin(
    engine: &Engine,
    plugin_dir: impl AsRef<Path>,
    options: &str,
) -> Result<Arc<dyn DataSourcePlugin>> {
    let request = plugin_request(engine, plugin_dir.as_ref(), options).await?;
    engine.new_data_source_plugin(request).await
}

async fn plugin_request(engine: &Engine, dir: &Path, options: &str) -> Result<PluginRequest> {
    let fail = |path: &Path, e: std::io::Error| {
        Error::retrieval(
            dir.display().to_string(),
            format!("{}: {e}", path.display()),
        )
    };
    let extension = engine.config().layout.source_extension.as_str();

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| fail(dir, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| fail(dir, e))? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| fail(&path, e))?;
        if file_type.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| fail(path, e))?;
        sources.push(source);
    }

    tracing::debug!(dir = %dir.display(), files = sources.len(), "Loading test plugin");
    Ok(PluginRequest::new(StaticRepository::new(sources)).options(options))
}
