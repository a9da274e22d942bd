//! Engine facade: fetch, sanitize, fingerprint, then load once per identity.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{Instrument, debug, info, warn};

use crate::api::{DataSourcePlugin, ResourcePlugin};
use crate::cache::PluginCache;
use crate::config::{
    CLONE_TIMEOUT_KEY, ConfigProvider, ConfigProviderExt, MANIFEST_FILE_KEY, SOURCE_EXTENSION_KEY,
    TEST_SUFFIX_KEY,
};
use crate::host::{CodeHost, SymbolTable};
use crate::identity::PluginIdentity;
use crate::loader::{DataSourceShape, DynamicLoader, FactoryShape, ResourceShape};
use crate::observability::{EngineMetrics, LoadOutcome, LoadSpan};
use crate::sanitize::sanitize;
use crate::source::{CloneCache, ModuleLayout, SourceBundle, SourceRepository};
use crate::{Error, Result};

/// Engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layout: ModuleLayout,
    /// Upper bound for one remote clone.
    #[serde(with = "duration_secs")]
    pub clone_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: ModuleLayout::default(),
            clone_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Overlays values found in `settings` on the defaults.
    pub async fn from_provider(settings: &dyn ConfigProvider) -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = settings.get::<u64>(CLONE_TIMEOUT_KEY).await? {
            config.clone_timeout = Duration::from_secs(secs);
        }
        if let Some(manifest) = settings.get_string(MANIFEST_FILE_KEY).await? {
            config.layout.manifest_file = manifest;
        }
        if let Some(extension) = settings.get_string(SOURCE_EXTENSION_KEY).await? {
            config.layout.source_extension = extension;
        }
        if let Some(suffix) = settings.get_string(TEST_SUFFIX_KEY).await? {
            config.layout.test_suffix = suffix;
        }
        Ok(config)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Inputs of one engine call.
#[derive(Clone)]
pub struct PluginRequest {
    repository: Arc<dyn SourceRepository>,
    options: String,
    entry_point: Option<String>,
}

impl PluginRequest {
    pub fn new(repository: impl SourceRepository + 'static) -> Self {
        Self::from_arc(Arc::new(repository))
    }

    pub fn from_arc(repository: Arc<dyn SourceRepository>) -> Self {
        Self {
            repository,
            options: String::new(),
            entry_point: None,
        }
    }

    /// Opaque string handed verbatim to the factory.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Factory symbol to resolve instead of the kind's default.
    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn repository(&self) -> &dyn SourceRepository {
        self.repository.as_ref()
    }
}

impl std::fmt::Debug for PluginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRequest")
            .field("repository", &self.repository.name())
            .field("options_len", &self.options.len())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

pub struct EngineBuilder {
    host: Arc<dyn CodeHost>,
    config: EngineConfig,
    std_symbols: SymbolTable,
    clone_cache: Option<Arc<CloneCache>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn layout(mut self, layout: ModuleLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Standard library surface every host instance gets.
    pub fn std_symbols(mut self, symbols: SymbolTable) -> Self {
        self.std_symbols = symbols;
        self
    }

    pub fn clone_cache(mut self, cache: Arc<CloneCache>) -> Self {
        self.clone_cache = Some(cache);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            loader: DynamicLoader::new(self.host).with_std_symbols(self.std_symbols),
            cache: PluginCache::new(),
            clone_cache: self.clone_cache.unwrap_or_default(),
            metrics: Arc::new(EngineMetrics::new()),
            config: self.config,
        }
    }
}

/// Builds plugin instances and keeps them for the engine's lifetime.
///
/// Equal `(repository identity, options, entry point)` inputs return the
/// same instance, comparable with [`Arc::ptr_eq`]. Cached instances are
/// never refreshed: a repository whose backing store changes after the
/// first load keeps serving the instance built from the old content as
/// long as its reported identity is unchanged.
///
/// The plugin cache is private to the engine. Instances built through one
/// host are never handed out by an engine wired to another.
pub struct Engine {
    loader: DynamicLoader,
    cache: PluginCache,
    clone_cache: Arc<CloneCache>,
    metrics: Arc<EngineMetrics>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self::builder(host).build()
    }

    pub fn builder(host: Arc<dyn CodeHost>) -> EngineBuilder {
        EngineBuilder {
            host,
            config: EngineConfig::default(),
            std_symbols: SymbolTable::new(),
            clone_cache: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &PluginCache {
        &self.cache
    }

    /// Clone cache git repositories created for this engine should use.
    pub fn clone_cache(&self) -> &CloneCache {
        &self.clone_cache
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Defaults the entry point to `NewResourcePlugin`.
    pub async fn new_resource_plugin(
        &self,
        request: PluginRequest,
    ) -> Result<Arc<dyn ResourcePlugin>> {
        self.load::<ResourceShape>(request).await
    }

    /// Defaults the entry point to `NewDataSourcePlugin`.
    pub async fn new_data_source_plugin(
        &self,
        request: PluginRequest,
    ) -> Result<Arc<dyn DataSourcePlugin>> {
        self.load::<DataSourceShape>(request).await
    }

    /// Loads a plugin of shape `S`, reusing the cached instance when one exists.
    pub async fn load<S: FactoryShape>(&self, request: PluginRequest) -> Result<Arc<S::Plugin>> {
        self.metrics.record_request(S::KIND);
        let entry_point = request
            .entry_point
            .as_deref()
            .unwrap_or(S::KIND.default_entry_point());
        let repository = request.repository.as_ref();

        let bundle = repository.get_code().await.inspect_err(|e| {
            if e.is_retryable() {
                self.metrics.record_retrieval_failure();
            }
        })?;
        let bundle = sanitize(bundle, &self.config.layout)?;

        let identity = match repository.identity() {
            Some(id) => {
                PluginIdentity::from_repository_identity(id, &request.options, entry_point)
            }
            None => PluginIdentity::from_bundle(&bundle, &request.options, entry_point),
        };

        let slot = S::slot(&self.cache);
        if let Some(plugin) = slot.get(&identity) {
            self.metrics.record_lookup(true);
            debug!(
                kind = %S::KIND,
                repository = repository.name(),
                digest = identity.short(),
                "Plugin cache hit"
            );
            return Ok(plugin);
        }

        let (plugin, constructed) = slot
            .get_or_try_init(identity.clone(), || {
                self.construct::<S>(&bundle, entry_point, &request.options, &identity)
            })
            .await?;
        self.metrics.record_lookup(!constructed);
        Ok(plugin)
    }

    async fn construct<S: FactoryShape>(
        &self,
        bundle: &SourceBundle,
        entry_point: &str,
        options: &str,
        identity: &PluginIdentity,
    ) -> Result<Arc<S::Plugin>> {
        let span = LoadSpan::new(S::KIND, entry_point, identity);
        span.record_import_path(bundle.import_path());
        self.metrics.record_load_start();

        let result = async {
            let factory = self.loader.load::<S>(bundle, entry_point).await?;
            factory(options).map_err(|source| Error::PluginConstruction {
                kind: S::KIND,
                entry_point: entry_point.to_string(),
                source,
            })
        }
        .instrument(span.span().clone())
        .await;

        let outcome = match &result {
            Ok(_) => LoadOutcome::Loaded,
            Err(Error::PluginConstruction { .. }) => LoadOutcome::ConstructionFailed,
            Err(_) => LoadOutcome::LoadFailed,
        };
        let latency_ms = span.finish(result.is_ok());
        self.metrics.record_load_end(outcome, latency_ms);

        match &result {
            Ok(_) => info!(
                kind = %S::KIND,
                entry_point,
                import_path = bundle.import_path(),
                digest = identity.short(),
                files = bundle.len(),
                latency_ms,
                "Plugin loaded"
            ),
            Err(e) => warn!(
                kind = %S::KIND,
                entry_point,
                digest = identity.short(),
                error = %e,
                "Plugin load failed"
            ),
        }
        result
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("loader", &self.loader)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}
