//! Configuration provider trait.

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Read-only source of dotted configuration keys.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Reads a JSON-encoded value; bare numbers and booleans parse as-is.
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            let Some(raw) = self.get_raw(key).await? else {
                return Ok(None);
            };
            serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
    }

    /// Reads a plain string; empty values count as unset.
    fn get_string(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<String>>> + Send
    where
        Self: Sync,
    {
        async move { Ok(self.get_raw(key).await?.filter(|v| !v.is_empty())) }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
