//! Engine Tests
//!
//! End-to-end loading through the public API: static and directory
//! repositories, the native host, the plugin cache and the provider registry.
//!
//! Run: cargo nextest run --test engine_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dynplug::{
    DataSourcePlugin, Engine, NativeHost, PluginRequest, PluginResult, ResourcePlugin,
    StaticRepository,
};

const RESOURCE_SOURCE: &str = "package tf\n\n\
    func NewResourcePlugin(opts string) (ResourcePlugin, error) {\n\
    \treturn noop{}, nil\n}\n";

const DATA_SOURCE_SOURCE: &str = "package tf\n\n\
    func NewDataSourcePlugin(opts string) (DataSourcePlugin, error) {\n\
    \treturn echo{}, nil\n}\n";

/// Resource plugin whose create returns an empty id.
struct Noop;

#[async_trait]
impl ResourcePlugin for Noop {
    async fn create(&self, _attributes: &str) -> PluginResult<String> {
        Ok(String::new())
    }

    async fn read(&self, _id: &str) -> PluginResult<String> {
        Ok("{}".to_string())
    }

    async fn update(&self, _id: &str, _attributes: &str, _prior: &str) -> PluginResult<()> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> PluginResult<()> {
        Ok(())
    }
}

/// Data source plugin echoing its options and arguments.
struct Echo {
    options: String,
}

#[async_trait]
impl DataSourcePlugin for Echo {
    async fn read(&self, arguments: &str) -> PluginResult<String> {
        Ok(format!("{{\"options\":{},\"arguments\":{arguments}}}", self.options))
    }
}

/// Host with both default factories registered, counting constructions.
fn counting_host(constructions: Arc<AtomicUsize>) -> NativeHost {
    let resources = constructions.clone();
    NativeHost::new()
        .resource("NewResourcePlugin", move |_| {
            resources.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Noop) as Arc<dyn ResourcePlugin>)
        })
        .data_source("NewDataSourcePlugin", move |options| {
            constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Echo {
                options: options.to_string(),
            }) as Arc<dyn DataSourcePlugin>)
        })
}

/// Data source host whose factory blocks its worker thread for `delay`.
fn slow_host(constructions: Arc<AtomicUsize>, delay: Duration) -> NativeHost {
    NativeHost::new().data_source("NewDataSourcePlugin", move |options| {
        constructions.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(delay);
        Ok(Arc::new(Echo {
            options: options.to_string(),
        }) as Arc<dyn DataSourcePlugin>)
    })
}

fn static_request(source: &str) -> PluginRequest {
    PluginRequest::new(StaticRepository::new(vec![source.to_string()]))
}

// =============================================================================
// Caching
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_equal_inputs_share_instance() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(Arc::new(counting_host(constructions.clone())));

        let a = engine
            .new_resource_plugin(static_request(RESOURCE_SOURCE).options("{}"))
            .await
            .unwrap();
        let b = engine
            .new_resource_plugin(static_request(RESOURCE_SOURCE).options("{}"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache().resource_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_requests_construct_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let host = slow_host(constructions.clone(), Duration::from_millis(50));
        let engine = Arc::new(Engine::new(Arc::new(host)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let request = static_request(DATA_SOURCE_SOURCE).options(r#"{"k":1}"#);
                    engine.new_data_source_plugin(request).await
                })
            })
            .collect();

        let mut plugins = Vec::new();
        for handle in handles {
            plugins.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(plugins.len(), 16);
        assert!(plugins.iter().all(|p| Arc::ptr_eq(p, &plugins[0])));
        assert_eq!(constructions.load(Ordering::SeqCst), 1);

        let summary = engine.metrics().summary();
        assert_eq!(summary.total_requests, 16);
        assert_eq!(summary.total_loads, 1);
        assert_eq!(summary.cache_misses, 1);
        assert_eq!(summary.cache_hits, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_distinct_identities_construct_in_parallel() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(150);
        let engine = Arc::new(Engine::new(Arc::new(slow_host(constructions.clone(), delay))));

        let started = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let options = format!("{{\"n\":{i}}}");
                    let request = static_request(DATA_SOURCE_SOURCE).options(options);
                    engine.new_data_source_plugin(request).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let elapsed = started.elapsed();

        assert_eq!(constructions.load(Ordering::SeqCst), 4);
        assert_eq!(engine.cache().data_source_count(), 4);
        // Serialized builds would take at least four delays.
        assert!(elapsed < delay * 3, "builds were serialized: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_distinct_inputs_get_distinct_instances() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(Arc::new(counting_host(constructions.clone())));

        let base = engine
            .new_data_source_plugin(static_request(DATA_SOURCE_SOURCE).options("{}"))
            .await
            .unwrap();
        let other_options = engine
            .new_data_source_plugin(static_request(DATA_SOURCE_SOURCE).options(r#"{"x":1}"#))
            .await
            .unwrap();
        let other_source = engine
            .new_data_source_plugin(
                static_request(&format!("{DATA_SOURCE_SOURCE}\n// revision 2\n")).options("{}"),
            )
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&base, &other_options));
        assert!(!Arc::ptr_eq(&base, &other_source));
        assert_eq!(constructions.load(Ordering::SeqCst), 3);
        assert_eq!(engine.cache().data_source_count(), 3);

        let out = other_options.read(r#"{"q":2}"#).await.unwrap();
        assert_eq!(out, r#"{"options":{"x":1},"arguments":{"q":2}}"#);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let host = NativeHost::new().resource("NewResourcePlugin", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("upstream unavailable".into());
            }
            Ok(Arc::new(Noop) as Arc<dyn ResourcePlugin>)
        });
        let engine = Engine::new(Arc::new(host));

        let err = engine
            .new_resource_plugin(static_request(RESOURCE_SOURCE))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, dynplug::Error::PluginConstruction { .. }));
        assert!(err.to_string().contains("upstream unavailable"));
        assert!(engine.cache().is_empty());

        engine
            .new_resource_plugin(static_request(RESOURCE_SOURCE))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(engine.metrics().summary().failed_constructions, 1);
    }

    #[tokio::test]
    async fn test_kinds_use_separate_partitions() {
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));
        let both = format!("{RESOURCE_SOURCE}\nfunc NewDataSourcePlugin(opts string) {{}}\n");

        let resource = static_request(&both);
        engine.new_resource_plugin(resource).await.unwrap();
        let data_source = static_request(&both);
        engine.new_data_source_plugin(data_source).await.unwrap();

        assert_eq!(engine.cache().resource_count(), 1);
        assert_eq!(engine.cache().data_source_count(), 1);
    }
}

// =============================================================================
// Loading
// =============================================================================

mod load_tests {
    use super::*;
    use dynplug::{Error, PluginKind};

    #[tokio::test]
    async fn test_resource_plugin_create_returns_plugin_id() {
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));
        let plugin = engine
            .new_resource_plugin(static_request(RESOURCE_SOURCE).options("{}"))
            .await
            .unwrap();

        assert_eq!(plugin.create("{}").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_package_never_reaches_host() {
        let host = Arc::new(counting_host(Arc::new(AtomicUsize::new(0))));
        let engine = Engine::new(host.clone());

        let err = engine
            .new_resource_plugin(static_request("func NewResourcePlugin(opts string) {}\n"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::InvalidPackage { .. }));
        assert!(err.is_invalid_source());
        assert_eq!(host.instances_created(), 0);
    }

    #[tokio::test]
    async fn test_test_files_are_excluded() {
        let host = Arc::new(counting_host(Arc::new(AtomicUsize::new(0))));
        let engine = Engine::new(host.clone());
        let repository = StaticRepository::new(vec![
            RESOURCE_SOURCE.to_string(),
            "package tf_test\n\nfunc TestCreate(t *testing.T) {}\n".to_string(),
        ]);

        let plugin = engine
            .new_resource_plugin(PluginRequest::new(repository))
            .await
            .unwrap();
        assert_eq!(plugin.read("1").await.unwrap(), "{}");
        assert_eq!(host.instances_created(), 1);
    }

    #[tokio::test]
    async fn test_only_test_files_is_invalid() {
        let engine = Engine::new(Arc::new(NativeHost::new()));
        let err = engine
            .new_resource_plugin(static_request("package tf_test\n"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPackage { .. }));
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));
        let err = engine
            .new_resource_plugin(static_request("package tf\n\nfunc helper() {}\n"))
            .await
            .err()
            .unwrap();

        match err {
            Error::SymbolNotFound { entry_point, .. } => {
                assert_eq!(entry_point, "NewResourcePlugin")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_factory_shape() {
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));
        let err = engine
            .new_resource_plugin(
                static_request(DATA_SOURCE_SOURCE).entry_point("NewDataSourcePlugin"),
            )
            .await
            .err()
            .unwrap();

        match err {
            Error::SignatureMismatch { expected, found, .. } => {
                assert_eq!(expected, PluginKind::Resource);
                assert!(found.contains("DataSourcePlugin"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_custom_entry_point() {
        let host = NativeHost::new().data_source("NewLookup", |_| {
            Ok(Arc::new(Echo {
                options: "null".to_string(),
            }) as Arc<dyn DataSourcePlugin>)
        });
        let engine = Engine::new(Arc::new(host));
        let source = "package lookup\n\nfunc NewLookup(opts string) (DataSourcePlugin, error) {}\n";

        let plugin = engine
            .new_data_source_plugin(static_request(source).entry_point("NewLookup"))
            .await
            .unwrap();
        assert_eq!(
            plugin.read("{}").await.unwrap(),
            r#"{"options":null,"arguments":{}}"#
        );

        let err = engine
            .new_data_source_plugin(static_request(source))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::SymbolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_directory_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/users\n").unwrap();
        std::fs::write(dir.path().join("users.go"), RESOURCE_SOURCE).unwrap();
        std::fs::write(dir.path().join("users_test.go"), "package tf_test\n").unwrap();

        let layout = dynplug::ModuleLayout::default();
        let repository = dynplug::DirectoryRepository::open(dir.path(), &layout)
            .await
            .unwrap();
        assert_eq!(repository.module(), "example.com/users");

        let constructions = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(Arc::new(counting_host(constructions.clone())));
        let repository: Arc<dyn dynplug::SourceRepository> = Arc::new(repository);

        let a = engine
            .new_resource_plugin(PluginRequest::from_arc(repository.clone()))
            .await
            .unwrap();
        let b = engine
            .new_resource_plugin(PluginRequest::from_arc(repository))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_testing_helper_loads_plugin_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.go"), RESOURCE_SOURCE).unwrap();
        std::fs::write(dir.path().join("plugin_test.go"), "package tf_test\n").unwrap();

        let host = Arc::new(counting_host(Arc::new(AtomicUsize::new(0))));
        let engine = Engine::new(host.clone());
        let plugin = dynplug::testing::new_test_resource_plugin(&engine, dir.path(), "{}")
            .await
            .unwrap();

        assert_eq!(plugin.read("1").await.unwrap(), "{}");
        assert_eq!(host.instances_created(), 1);
        assert_eq!(engine.cache().resource_count(), 1);
    }

    #[tokio::test]
    async fn test_directory_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.go"), RESOURCE_SOURCE).unwrap();

        let err = dynplug::DirectoryRepository::open(dir.path(), &dynplug::ModuleLayout::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidModule { .. }));
    }
}

// =============================================================================
// Provider registry
// =============================================================================

mod registry_tests {
    use super::*;
    use dynplug::config::MemoryConfigProvider;
    use dynplug::{Error, PluginRegistry, ProviderConfig};

    fn write_module(root: &std::path::Path, module: &str, source: &str) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("go.mod"), format!("module {module}\n")).unwrap();
        std::fs::write(root.join("plugin.go"), source).unwrap();
    }

    fn declaration(dir: &std::path::Path, configuration: &str) -> serde_json::Value {
        serde_json::json!({
            "source_code": { "dir": dir.display().to_string() },
            "configuration": configuration,
        })
    }

    #[tokio::test]
    async fn test_configure_and_run_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let users = root.path().join("users");
        let lookup = root.path().join("lookup");
        write_module(&users, "users", RESOURCE_SOURCE);
        write_module(&lookup, "lookup", DATA_SOURCE_SOURCE);

        let raw = serde_json::json!({
            "resource_plugins_v1": { "users": declaration(&users, "{}") },
            "data_source_plugins_v1": { "lookup": declaration(&lookup, r#"{"region":"eu"}"#) },
        });
        let config = ProviderConfig::from_json(&raw.to_string()).unwrap();

        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));
        let registry = PluginRegistry::configure(&engine, &config, &MemoryConfigProvider::new())
            .await
            .unwrap();

        assert_eq!(registry.resource_ids().collect::<Vec<_>>(), vec!["users"]);
        let out = registry.read_data_source("lookup", r#"{"q":1}"#).await.unwrap();
        assert_eq!(out, r#"{"options":{"region":"eu"},"arguments":{"q":1}}"#);

        // Noop returns an empty id.
        let err = registry.create_resource("users", "{}").await.unwrap_err();
        assert!(matches!(err, Error::EmptyResourceId { .. }));

        let state = registry.read_resource("users/1").await.unwrap();
        assert_eq!(state.attributes, "{}");
        registry.delete_resource("users/1").await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_rejects_non_object_configuration() {
        let root = tempfile::tempdir().unwrap();
        write_module(root.path(), "users", RESOURCE_SOURCE);

        let raw = serde_json::json!({
            "resource_plugins_v1": { "users": declaration(root.path(), "[1]") },
        });
        let config = ProviderConfig::from_json(&raw.to_string()).unwrap();
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));

        let err = PluginRegistry::configure(&engine, &config, &MemoryConfigProvider::new())
            .await
            .unwrap_err();
        match &err {
            Error::PluginLoad { plugin_id, source, .. } => {
                assert_eq!(plugin_id, "users");
                assert!(matches!(**source, Error::InvalidAttributes { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_configure_reports_failing_plugin() {
        let root = tempfile::tempdir().unwrap();
        write_module(root.path(), "broken", "package broken\n");

        let raw = serde_json::json!({
            "resource_plugins_v1": { "broken": declaration(root.path(), "{}") },
        });
        let config = ProviderConfig::from_json(&raw.to_string()).unwrap();
        let engine = Engine::new(Arc::new(counting_host(Arc::new(AtomicUsize::new(0)))));

        let err = PluginRegistry::configure(&engine, &config, &MemoryConfigProvider::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'broken'"));
        assert!(err.is_load_error());
    }
}
