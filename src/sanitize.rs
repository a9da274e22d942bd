//! Bundle sanitization ahead of loading.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::source::{ModuleLayout, SourceBundle};
use crate::{Error, Result};

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^package +(\S+) *$").expect("valid package regex"))
}

/// Extracts the name from the first `package NAME` line.
pub(crate) fn package_name(source: &str) -> Option<&str> {
    package_regex()
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Drops test packages and validates package declarations.
///
/// Only files with the layout's source extension are inspected; manifests
/// and data files pass through untouched. Every source file must declare a
/// package, and after test packages are removed all source files in one
/// directory must agree on it. Relative order of the kept files is preserved.
pub fn sanitize(bundle: SourceBundle, layout: &ModuleLayout) -> Result<SourceBundle> {
    let mut packages: BTreeMap<String, String> = BTreeMap::new();
    let mut kept = Vec::with_capacity(bundle.len());
    let mut dropped = 0usize;
    let mut sources = 0usize;

    for file in bundle.files() {
        if !layout.is_source(file) {
            kept.push(file.clone());
            continue;
        }

        let package = package_name(&file.content)
            .ok_or_else(|| Error::invalid_package(&file.path, "could not get package name"))?;

        if package.ends_with(&layout.test_suffix) {
            debug!(path = %file.path, package, "Dropping test package file");
            dropped += 1;
            continue;
        }

        match packages.get(file.dir()) {
            Some(existing) if existing != package => {
                return Err(Error::invalid_package(
                    &file.path,
                    format!("found package {package}, directory already declares {existing}"),
                ));
            }
            Some(_) => {}
            None => {
                packages.insert(file.dir().to_string(), package.to_string());
            }
        }

        sources += 1;
        kept.push(file.clone());
    }

    if sources == 0 {
        return Err(Error::invalid_package(
            bundle.import_path(),
            "no non-test source files in bundle",
        ));
    }

    if dropped > 0 {
        debug!(import_path = %bundle.import_path(), dropped, kept = kept.len(), "Sanitized bundle");
    }

    Ok(bundle.with_files(kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;

    fn static_bundle(sources: &[&str]) -> SourceBundle {
        let files = sources
            .iter()
            .enumerate()
            .map(|(i, s)| SourceFile::new(format!("plugin/{i}.go"), *s))
            .collect();
        SourceBundle::new(files, "./plugin")
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("package tf\n"), Some("tf"));
        let commented = "// c\n\npackage users   \n\nfunc A() {}";
        assert_eq!(package_name(commented), Some("users"));
        assert_eq!(package_name("package tf_test"), Some("tf_test"));
        assert_eq!(package_name("func A() {}"), None);
        assert_eq!(package_name(" package tf"), None);
    }

    #[test]
    fn test_drops_test_files() {
        let bundle = static_bundle(&[
            "package tf\nfunc NewResourcePlugin() {}",
            "package tf_test\nfunc TestX() {}",
            "package tf\nfunc helper() {}",
        ]);

        let sanitized = sanitize(bundle, &ModuleLayout::default()).unwrap();
        let paths: Vec<_> = sanitized.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["plugin/0.go", "plugin/2.go"]);
        assert_eq!(sanitized.import_path(), "./plugin");
    }

    #[test]
    fn test_missing_package_fails() {
        let bundle = static_bundle(&["package tf", "func orphan() {}"]);
        let err = sanitize(bundle, &ModuleLayout::default()).unwrap_err();
        match err {
            Error::InvalidPackage { path, .. } => assert_eq!(path, "plugin/1.go"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_conflicting_packages_fail() {
        let bundle = static_bundle(&["package tf", "package other"]);
        let err = sanitize(bundle, &ModuleLayout::default()).unwrap_err();
        assert!(err.is_invalid_source());
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_only_test_files_fails() {
        let bundle = static_bundle(&["package tf_test"]);
        assert!(sanitize(bundle, &ModuleLayout::default()).is_err());
    }

    #[test]
    fn test_module_layout_passthrough() {
        let bundle = SourceBundle::new(
            vec![
                SourceFile::new("modroot/src/users/go.mod", "module users\n"),
                SourceFile::new("modroot/src/users/users.go", "package users\n"),
                SourceFile::new("modroot/src/users/users_test.go", "package users_test\n"),
                SourceFile::new("modroot/src/users/client/client.go", "package client\n"),
                SourceFile::new("modroot/src/users/README", "no package here"),
            ],
            "users",
        )
        .with_module_root("modroot");

        let sanitized = sanitize(bundle, &ModuleLayout::default()).unwrap();
        let paths: Vec<_> = sanitized.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "modroot/src/users/go.mod",
                "modroot/src/users/users.go",
                "modroot/src/users/client/client.go",
                "modroot/src/users/README",
            ]
        );
        assert_eq!(sanitized.module_root(), Some("modroot"));
    }
}
