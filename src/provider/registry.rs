//! Loaded plugins keyed by declared id, plus the resource lifecycle on top.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::attributes::{equivalent_json, must_json_object};
use super::id::{pack_id, unpack_id};
use super::{PluginDeclaration, ProviderConfig};
use crate::api::{DataSourcePlugin, PluginKind, ResourcePlugin};
use crate::config::ConfigProvider;
use crate::engine::{Engine, PluginRequest};
use crate::{Error, Result};

/// State the orchestration tool persists for one managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Packed `<plugin id>/<resource id>`.
    pub id: String,
    pub plugin_id: String,
    pub resource_id: String,
    pub attributes: String,
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    resources: HashMap<String, Arc<dyn ResourcePlugin>>,
    data_sources: HashMap<String, Arc<dyn DataSourcePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(
        mut self,
        plugin_id: impl Into<String>,
        plugin: Arc<dyn ResourcePlugin>,
    ) -> Self {
        self.resources.insert(plugin_id.into(), plugin);
        self
    }

    pub fn with_data_source(
        mut self,
        plugin_id: impl Into<String>,
        plugin: Arc<dyn DataSourcePlugin>,
    ) -> Self {
        self.data_sources.insert(plugin_id.into(), plugin);
        self
    }

    /// Loads every declared plugin concurrently.
    pub async fn configure(
        engine: &Engine,
        config: &ProviderConfig,
        settings: &dyn ConfigProvider,
    ) -> Result<Self> {
        Self::configure_with(engine, config, settings, &CancellationToken::new()).await
    }

    /// Like [`PluginRegistry::configure`]; cancelling `cancel` aborts pending clones.
    ///
    /// The first failure wins and names the plugin id it came from.
    pub async fn configure_with(
        engine: &Engine,
        config: &ProviderConfig,
        settings: &dyn ConfigProvider,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let resources = config.resource_plugins_v1.iter().map(|(id, decl)| async move {
            let plugin = load_declared(
                engine,
                PluginKind::Resource,
                id,
                decl,
                settings,
                cancel,
                |request| engine.new_resource_plugin(request),
            )
            .await?;
            Ok::<_, Error>((id.clone(), plugin))
        });
        let data_sources = config.data_source_plugins_v1.iter().map(|(id, decl)| async move {
            let plugin = load_declared(
                engine,
                PluginKind::DataSource,
                id,
                decl,
                settings,
                cancel,
                |request| engine.new_data_source_plugin(request),
            )
            .await?;
            Ok::<_, Error>((id.clone(), plugin))
        });

        let (resources, data_sources) =
            futures::try_join!(try_join_all(resources), try_join_all(data_sources))?;
        info!(
            resources = resources.len(),
            data_sources = data_sources.len(),
            "Plugin registry configured"
        );
        Ok(Self {
            resources: resources.into_iter().collect(),
            data_sources: data_sources.into_iter().collect(),
        })
    }

    pub fn resource(&self, plugin_id: &str) -> Result<&Arc<dyn ResourcePlugin>> {
        self.resources
            .get(plugin_id)
            .ok_or_else(|| Error::PluginMissing {
                kind: PluginKind::Resource,
                plugin_id: plugin_id.to_string(),
            })
    }

    pub fn data_source(&self, plugin_id: &str) -> Result<&Arc<dyn DataSourcePlugin>> {
        self.data_sources
            .get(plugin_id)
            .ok_or_else(|| Error::PluginMissing {
                kind: PluginKind::DataSource,
                plugin_id: plugin_id.to_string(),
            })
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn data_source_ids(&self) -> impl Iterator<Item = &str> {
        self.data_sources.keys().map(String::as_str)
    }

    pub async fn create_resource(
        &self,
        plugin_id: &str,
        attributes: &str,
    ) -> Result<ResourceState> {
        must_json_object(attributes)?;
        let plugin = self.resource(plugin_id)?;

        let resource_id = plugin
            .create(attributes)
            .await
            .map_err(|source| operation_error(plugin_id, "create", source))?;
        if resource_id.is_empty() {
            return Err(Error::EmptyResourceId {
                plugin_id: plugin_id.to_string(),
            });
        }

        debug!(plugin_id, resource_id = %resource_id, "Resource created");
        Ok(ResourceState {
            id: pack_id(plugin_id, &resource_id),
            plugin_id: plugin_id.to_string(),
            resource_id,
            attributes: attributes.to_string(),
        })
    }

    /// Refreshes the stored attributes from the plugin.
    pub async fn read_resource(&self, id: &str) -> Result<ResourceState> {
        let (plugin_id, resource_id) = unpack_id(id)?;
        let plugin = self.resource(plugin_id)?;

        let attributes = plugin
            .read(resource_id)
            .await
            .map_err(|source| operation_error(plugin_id, "read", source))?;
        Ok(ResourceState {
            id: id.to_string(),
            plugin_id: plugin_id.to_string(),
            resource_id: resource_id.to_string(),
            attributes,
        })
    }

    /// Applies `attributes`, skipping the plugin when they match `prior_attributes`.
    pub async fn update_resource(
        &self,
        id: &str,
        attributes: &str,
        prior_attributes: &str,
    ) -> Result<ResourceState> {
        must_json_object(attributes)?;
        let (plugin_id, resource_id) = unpack_id(id)?;
        let plugin = self.resource(plugin_id)?;

        if equivalent_json(attributes, prior_attributes) {
            debug!(
                plugin_id,
                resource_id,
                "Attributes unchanged, skipping update"
            );
        } else {
            plugin
                .update(resource_id, attributes, prior_attributes)
                .await
                .map_err(|source| operation_error(plugin_id, "update", source))?;
        }

        Ok(ResourceState {
            id: id.to_string(),
            plugin_id: plugin_id.to_string(),
            resource_id: resource_id.to_string(),
            attributes: attributes.to_string(),
        })
    }

    pub async fn delete_resource(&self, id: &str) -> Result<()> {
        let (plugin_id, resource_id) = unpack_id(id)?;
        let plugin = self.resource(plugin_id)?;

        plugin
            .delete(resource_id)
            .await
            .map_err(|source| operation_error(plugin_id, "delete", source))
    }

    pub async fn read_data_source(&self, plugin_id: &str, arguments: &str) -> Result<String> {
        must_json_object(arguments)?;
        let plugin = self.data_source(plugin_id)?;

        plugin
            .read(arguments)
            .await
            .map_err(|source| operation_error(plugin_id, "read", source))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut resources: Vec<_> = self.resources.keys().collect();
        let mut data_sources: Vec<_> = self.data_sources.keys().collect();
        resources.sort();
        data_sources.sort();
        f.debug_struct("PluginRegistry")
            .field("resources", &resources)
            .field("data_sources", &data_sources)
            .finish()
    }
}

fn operation_error(plugin_id: &str, operation: &'static str, source: crate::BoxError) -> Error {
    Error::PluginOperation {
        plugin_id: plugin_id.to_string(),
        operation,
        source,
    }
}

async fn load_declared<P, F, Fut>(
    engine: &Engine,
    kind: PluginKind,
    plugin_id: &str,
    declaration: &PluginDeclaration,
    settings: &dyn ConfigProvider,
    cancel: &CancellationToken,
    load: F,
) -> Result<Arc<P>>
where
    P: ?Sized,
    F: FnOnce(PluginRequest) -> Fut,
    Fut: std::future::Future<Output = Result<Arc<P>>>,
{
    let wrap = |source: Error| Error::PluginLoad {
        kind,
        plugin_id: plugin_id.to_string(),
        source: Box::new(source),
    };

    let configuration = declaration.configuration.expose_secret();
    must_json_object(configuration).map_err(wrap)?;

    let repository = declaration
        .source_code
        .open(engine, settings, cancel)
        .await
        .map_err(wrap)?;

    let mut request = PluginRequest::from_arc(repository).options(configuration);
    if let Some(factory_name) = declaration.factory_name() {
        request = request.entry_point(factory_name);
    }
    load(request).await.map_err(wrap)
}
