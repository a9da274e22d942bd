//! In-process host for precompiled plugins.
//!
//! `NativeHost` reads the mounted sources only to discover what a package
//! declares. Functions are bound to natively registered factories by name,
//! so a bundle declaring `func NewResourcePlugin(` resolves to the factory
//! registered as `NewResourcePlugin`. Embedders use it to ship plugins
//! compiled into the binary behind the same loading and caching path as
//! interpreted ones.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use regex::Regex;

use super::{CodeHost, HostError, HostInstance, HostValue, SymbolTable, VirtualFs};
use crate::api::{
    DataSourceFactory, DataSourcePlugin, PluginResult, ResourceFactory, ResourcePlugin,
};
use crate::sanitize::package_name;

#[derive(Default)]
pub struct NativeHost {
    resources: HashMap<String, ResourceFactory>,
    data_sources: HashMap<String, DataSourceFactory>,
    instances: AtomicUsize,
}

impl NativeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a resource plugin factory.
    pub fn resource<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> PluginResult<Arc<dyn ResourcePlugin>> + Send + Sync + 'static,
    {
        self.resources.insert(name.into(), Arc::new(factory));
        self
    }

    /// Binds `name` to a data source plugin factory.
    pub fn data_source<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> PluginResult<Arc<dyn DataSourcePlugin>> + Send + Sync + 'static,
    {
        self.data_sources.insert(name.into(), Arc::new(factory));
        self
    }

    /// Number of instances created so far.
    pub fn instances_created(&self) -> usize {
        self.instances.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resources: Vec<_> = self.resources.keys().collect();
        let data_sources: Vec<_> = self.data_sources.keys().collect();
        f.debug_struct("NativeHost")
            .field("resources", &resources)
            .field("data_sources", &data_sources)
            .finish()
    }
}

impl CodeHost for NativeHost {
    fn name(&self) -> &str {
        "native"
    }

    fn instantiate(&self, fs: VirtualFs) -> Result<Box<dyn HostInstance>, HostError> {
        self.instances.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NativeInstance {
            fs,
            resources: self.resources.clone(),
            data_sources: self.data_sources.clone(),
            symbols: SymbolTable::new(),
            imports: HashMap::new(),
        }))
    }
}

enum Imported {
    Source { sources: Vec<String> },
    Symbols { package: String },
}

struct NativeInstance {
    fs: VirtualFs,
    resources: HashMap<String, ResourceFactory>,
    data_sources: HashMap<String, DataSourceFactory>,
    symbols: SymbolTable,
    imports: HashMap<String, Imported>,
}

impl NativeInstance {
    fn source_dir(&self, path: &str) -> String {
        if let Some(rel) = path.strip_prefix("./") {
            return rel.trim_end_matches('/').to_string();
        }
        match self.fs.module_root() {
            Some(root) => format!("{root}/src/{path}"),
            None => path.to_string(),
        }
    }

    fn import_sources(&self, path: &str) -> Result<Vec<String>, HostError> {
        let dir = self.source_dir(path);
        let fail = |message: String| HostError::Import {
            path: path.to_string(),
            message,
        };

        let mut packages = BTreeSet::new();
        let mut sources = Vec::new();
        for (file, content) in self.fs.dir_entries(&dir) {
            let Some(package) = package_name(content) else {
                continue;
            };
            packages.insert(package.to_string());
            sources.push(content.to_string());
            tracing::trace!(file, package, "Native host read source");
        }

        match packages.len() {
            0 => Err(fail(format!("no source files in {dir}"))),
            1 => Ok(sources),
            _ => Err(fail(format!(
                "found packages {} in {dir}",
                packages.into_iter().collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Kind of top-level declaration of `name` in `source`, if any.
fn declaration(source: &str, name: &str) -> Option<&'static str> {
    let name = regex::escape(name);
    let func = Regex::new(&format!(r"(?m)^func +{name} *\(")).ok()?;
    if func.is_match(source) {
        return Some("func");
    }
    let var = Regex::new(&format!(r"(?m)^(var|const) +{name}\b")).ok()?;
    var.captures(source)
        .and_then(|c| c.get(1))
        .map(|m| if m.as_str() == "var" { "var" } else { "const" })
}

#[async_trait]
impl HostInstance for NativeInstance {
    async fn use_symbols(&mut self, symbols: &SymbolTable) -> Result<(), HostError> {
        self.symbols.merge(symbols);
        Ok(())
    }

    async fn import(&mut self, path: &str, alias: &str) -> Result<(), HostError> {
        if self.imports.contains_key(alias) {
            return Err(HostError::Import {
                path: path.to_string(),
                message: format!("{alias} redeclared in this block"),
            });
        }

        let imported = if self.symbols.exports(path).is_some() {
            Imported::Symbols {
                package: path.to_string(),
            }
        } else {
            Imported::Source {
                sources: self.import_sources(path)?,
            }
        };
        self.imports.insert(alias.to_string(), imported);
        Ok(())
    }

    async fn eval(&mut self, expression: &str) -> Result<HostValue, HostError> {
        let Some((alias, name)) = expression.split_once('.') else {
            return Err(HostError::Eval {
                expression: expression.to_string(),
                message: "expected a selector expression".to_string(),
            });
        };
        if !is_identifier(name) {
            return Err(HostError::Eval {
                expression: expression.to_string(),
                message: format!("invalid identifier {name:?}"),
            });
        }
        let undefined = || HostError::UndefinedSymbol {
            expression: expression.to_string(),
        };

        match self.imports.get(alias).ok_or_else(undefined)? {
            Imported::Symbols { package } => {
                if self.symbols.contains(package, name) {
                    Ok(HostValue::Opaque {
                        type_name: format!("{package}.{name}"),
                    })
                } else {
                    Err(undefined())
                }
            }
            Imported::Source { sources } => {
                let kind = sources
                    .iter()
                    .find_map(|src| declaration(src, name))
                    .ok_or_else(undefined)?;
                if kind != "func" {
                    return Ok(HostValue::Opaque {
                        type_name: kind.to_string(),
                    });
                }

                if let Some(factory) = self.resources.get(name) {
                    Ok(HostValue::ResourceFactory(factory.clone()))
                } else if let Some(factory) = self.data_sources.get(name) {
                    Ok(HostValue::DataSourceFactory(factory.clone()))
                } else {
                    Err(HostError::Eval {
                        expression: expression.to_string(),
                        message: format!("no native implementation registered for {name}"),
                    })
                }
            }
        }
    }
}
