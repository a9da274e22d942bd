//! Layered key/value configuration.
//!
//! Keys are dotted (`git.username`). The environment provider maps them to
//! upper snake case behind the `DYNPLUG_` prefix, so `git.password` is read
//! from `DYNPLUG_GIT_PASSWORD`.
//!
//! ```rust,no_run
//! use dynplug::config::{ConfigBuilder, GIT_USERNAME_KEY};
//! use dynplug::ConfigProviderExt;
//!
//! # async fn example() -> Result<(), dynplug::ConfigError> {
//! let config = ConfigBuilder::new().env().build();
//! let username = config.get_string(GIT_USERNAME_KEY).await?;
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod env;
pub mod memory;
pub mod provider;

pub use composite::CompositeConfigProvider;
pub use env::EnvConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use thiserror::Error;

/// Prefix of every environment variable the engine reads.
pub const ENV_PREFIX: &str = "DYNPLUG_";

/// Fallback username for authenticated git remotes.
pub const GIT_USERNAME_KEY: &str = "git.username";

/// Fallback password for authenticated git remotes.
pub const GIT_PASSWORD_KEY: &str = "git.password";

/// Upper bound for one git clone, in seconds.
pub const CLONE_TIMEOUT_KEY: &str = "engine.clone_timeout_secs";

pub const MANIFEST_FILE_KEY: &str = "layout.manifest_file";
pub const SOURCE_EXTENSION_KEY: &str = "layout.source_extension";
pub const TEST_SUFFIX_KEY: &str = "layout.test_suffix";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Builds a [`CompositeConfigProvider`]; providers added first win.
#[derive(Default)]
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variables under [`ENV_PREFIX`].
    pub fn env(self) -> Self {
        self.env_with_prefix(ENV_PREFIX)
    }

    pub fn env_with_prefix(mut self, prefix: &str) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::prefixed(prefix)));
        self
    }

    pub fn memory(mut self, provider: MemoryConfigProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> CompositeConfigProvider {
        self.providers.into_iter().fold(
            CompositeConfigProvider::new(),
            CompositeConfigProvider::provider,
        )
    }
}
