//! Drives a [`CodeHost`] to turn a sanitized bundle into a typed factory.
//!
//! Both plugin kinds share one code path; [`FactoryShape`] picks the
//! expected factory variant and the cache partition.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{DataSourcePlugin, Factory, PluginKind, ResourcePlugin};
use crate::cache::{PluginCache, SingleFlight};
use crate::host::{CodeHost, HostError, HostValue, SymbolTable, VirtualFs};
use crate::identity::PluginIdentity;
use crate::source::SourceBundle;
use crate::{Error, Result};

/// Alias the plugin package is imported under inside the host.
pub const PLUGIN_ALIAS: &str = "plugin";

/// One of the two factory shapes a resolved entry point may have.
pub trait FactoryShape: Send + Sync + 'static {
    type Plugin: ?Sized + Send + Sync + 'static;

    const KIND: PluginKind;

    /// Type-asserts a host value, handing it back unchanged on mismatch.
    fn assert_factory(value: HostValue) -> std::result::Result<Factory<Self::Plugin>, HostValue>;

    /// Cache partition holding instances of this kind.
    fn slot(cache: &PluginCache) -> &SingleFlight<PluginIdentity, Arc<Self::Plugin>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceShape;

impl FactoryShape for ResourceShape {
    type Plugin = dyn ResourcePlugin;

    const KIND: PluginKind = PluginKind::Resource;

    fn assert_factory(value: HostValue) -> std::result::Result<Factory<Self::Plugin>, HostValue> {
        match value {
            HostValue::ResourceFactory(factory) => Ok(factory),
            other => Err(other),
        }
    }

    fn slot(cache: &PluginCache) -> &SingleFlight<PluginIdentity, Arc<Self::Plugin>> {
        &cache.resources
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataSourceShape;

impl FactoryShape for DataSourceShape {
    type Plugin = dyn DataSourcePlugin;

    const KIND: PluginKind = PluginKind::DataSource;

    fn assert_factory(value: HostValue) -> std::result::Result<Factory<Self::Plugin>, HostValue> {
        match value {
            HostValue::DataSourceFactory(factory) => Ok(factory),
            other => Err(other),
        }
    }

    fn slot(cache: &PluginCache) -> &SingleFlight<PluginIdentity, Arc<Self::Plugin>> {
        &cache.data_sources
    }
}

/// Loads entry points from bundles, one isolated host instance per load.
pub struct DynamicLoader {
    host: Arc<dyn CodeHost>,
    std_symbols: SymbolTable,
    support_symbols: SymbolTable,
}

impl DynamicLoader {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self {
            host,
            std_symbols: SymbolTable::new(),
            support_symbols: SymbolTable::support(),
        }
    }

    /// Standard library surface made importable in every instance.
    pub fn with_std_symbols(mut self, symbols: SymbolTable) -> Self {
        self.std_symbols = symbols;
        self
    }

    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    /// Imports `bundle` and resolves `entry_point` to a factory of shape `S`.
    pub async fn load<S: FactoryShape>(
        &self,
        bundle: &SourceBundle,
        entry_point: &str,
    ) -> Result<Factory<S::Plugin>> {
        let import_path = bundle.import_path();
        let import_error = |e: HostError| Error::Import {
            import_path: import_path.to_string(),
            message: e.to_string(),
        };

        let mut instance = self
            .host
            .instantiate(VirtualFs::from(bundle))
            .map_err(import_error)?;
        instance
            .use_symbols(&self.std_symbols)
            .await
            .map_err(import_error)?;
        instance
            .use_symbols(&self.support_symbols)
            .await
            .map_err(import_error)?;
        instance
            .import(import_path, PLUGIN_ALIAS)
            .await
            .map_err(import_error)?;

        let expression = format!("{PLUGIN_ALIAS}.{entry_point}");
        let value = match instance.eval(&expression).await {
            Ok(value) => value,
            Err(HostError::UndefinedSymbol { .. }) => {
                return Err(Error::SymbolNotFound {
                    entry_point: entry_point.to_string(),
                    import_path: import_path.to_string(),
                });
            }
            Err(HostError::Eval { message, .. }) => {
                warn!(entry_point, import_path, %message, "Entry point did not resolve");
                return Err(Error::SymbolNotFound {
                    entry_point: entry_point.to_string(),
                    import_path: import_path.to_string(),
                });
            }
            Err(e) => return Err(import_error(e)),
        };

        match S::assert_factory(value) {
            Ok(factory) => {
                debug!(
                    host = self.host.name(),
                    kind = %S::KIND,
                    entry_point,
                    import_path,
                    "Resolved plugin factory"
                );
                Ok(factory)
            }
            Err(value) => Err(Error::SignatureMismatch {
                entry_point: entry_point.to_string(),
                expected: S::KIND,
                found: value.type_name().to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for DynamicLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLoader")
            .field("host", &self.host.name())
            .field("std_packages", &self.std_symbols.packages().count())
            .finish()
    }
}
