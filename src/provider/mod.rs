//! Orchestration-tool adapter.
//!
//! Turns a provider configuration block into loaded plugins and maps the
//! tool's resource lifecycle onto them. The declaration format mirrors the
//! provider schema:
//!
//! ```json
//! {
//!   "resource_plugins_v1": {
//!     "users": {
//!       "source_code": {
//!         "git": { "url": "https://example.com/plugins.git", "ref": "v1.2.0", "dir": "/users" }
//!       },
//!       "configuration": "{\"api_token\": \"...\"}"
//!     }
//!   },
//!   "data_source_plugins_v1": {
//!     "lookup": {
//!       "source_code": { "dir": "./plugins/lookup" },
//!       "configuration": "{}",
//!       "factory_name": "NewLookupPlugin"
//!     }
//!   }
//! }
//! ```

pub mod attributes;
pub mod id;
mod registry;

pub use registry::{PluginRegistry, ResourceState};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigProvider, ConfigProviderExt, GIT_PASSWORD_KEY, GIT_USERNAME_KEY};
use crate::engine::Engine;
use crate::source::{DirectoryRepository, GitAuth, GitRepository, GitSourceConfig, SourceRepository};
use crate::{Error, Result};

/// Ref cloned when a git declaration names none.
pub const DEFAULT_GIT_REF: &str = "main";

/// Username sent with a password-only credential; some hosts accept any
/// username next to an access token but reject an empty one.
pub const PLACEHOLDER_GIT_USERNAME: &str = "dynplug";

/// Provider configuration block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub resource_plugins_v1: BTreeMap<String, PluginDeclaration>,
    pub data_source_plugins_v1: BTreeMap<String, PluginDeclaration>,
}

impl ProviderConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }
}

/// One plugin: where its code lives and how to build it.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginDeclaration {
    pub source_code: SourceCodeDeclaration,
    /// JSON object handed to the factory; usually holds secrets.
    #[serde(deserialize_with = "secret::deserialize")]
    pub configuration: SecretString,
    /// Factory symbol, defaulting to the kind's well-known entry point.
    #[serde(default)]
    pub factory_name: Option<String>,
}

impl PluginDeclaration {
    pub fn factory_name(&self) -> Option<&str> {
        self.factory_name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Exactly one of `dir` or `git`; `dir` wins when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceCodeDeclaration {
    pub dir: Option<String>,
    pub git: Option<GitDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitDeclaration {
    pub url: String,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    /// Presence enables authentication, including the environment fallback.
    #[serde(default)]
    pub auth: Option<AuthDeclaration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthDeclaration {
    pub username: Option<String>,
    #[serde(deserialize_with = "secret::deserialize_opt")]
    pub password: Option<SecretString>,
}

mod secret {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SecretString>, D::Error> {
        Option::<String>::deserialize(deserializer).map(|v| v.map(SecretString::from))
    }
}

impl SourceCodeDeclaration {
    /// Opens the declared repository, cloning through the engine's clone cache.
    pub async fn open(
        &self,
        engine: &Engine,
        settings: &dyn ConfigProvider,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SourceRepository>> {
        let layout = &engine.config().layout;

        if let Some(dir) = self.dir.as_deref().filter(|d| !d.is_empty()) {
            let repo = DirectoryRepository::open(dir, layout).await?;
            return Ok(Arc::new(repo));
        }

        let Some(git) = &self.git else {
            return Err(Error::InvalidConfig(
                "plugin source code source missing".to_string(),
            ));
        };

        let reference = git
            .reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_GIT_REF);
        let mut config =
            GitSourceConfig::new(&git.url, reference).timeout(engine.config().clone_timeout);
        if let Some(dir) = &git.dir {
            config = config.dir(dir);
        }
        if let Some(auth) = resolve_git_auth(git.auth.as_ref(), settings).await? {
            config = config.auth(auth);
        }

        let repo = GitRepository::fetch_with(config, layout, engine.clone_cache(), cancel).await?;
        Ok(Arc::new(repo))
    }
}

/// Resolves basic-auth credentials for a git declaration.
///
/// Without an `auth` block the clone is anonymous and `settings` is not
/// consulted. Otherwise explicit values win over `git.username` and
/// `git.password` from `settings`. No password means no authentication.
pub async fn resolve_git_auth(
    auth: Option<&AuthDeclaration>,
    settings: &dyn ConfigProvider,
) -> Result<Option<GitAuth>> {
    let Some(auth) = auth else {
        return Ok(None);
    };

    let username = match auth.username.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => username.to_string(),
        None => settings
            .get_string(GIT_USERNAME_KEY)
            .await?
            .unwrap_or_default(),
    };
    let password = match auth
        .password
        .as_ref()
        .map(|p| p.expose_secret())
        .filter(|p| !p.is_empty())
    {
        Some(password) => password.to_string(),
        None => settings
            .get_string(GIT_PASSWORD_KEY)
            .await?
            .unwrap_or_default(),
    };

    if password.is_empty() {
        return Ok(None);
    }
    let username = if username.is_empty() {
        PLACEHOLDER_GIT_USERNAME.to_string()
    } else {
        username
    };
    Ok(Some(GitAuth::new(username, password)))
}
