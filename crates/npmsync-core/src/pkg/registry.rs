//! npm registry client.
//!
//! [`Registry`] is the seam the resolver and downloader consume;
//! [`RegistryClient`] speaks HTTP to a real registry, and
//! [`super::memory::MemoryRegistry`] serves fixtures from memory.

use super::error::SyncError;
use super::packument::Packument;
use super::spec::{unscoped_name, url_encoded_name};
use crate::config::Config;
use crate::error::ConfigError;
use crate::version::USER_AGENT;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use url::Url;

/// A tarball body delivered in chunks.
pub type TarballStream = BoxStream<'static, Result<Bytes, SyncError>>;

/// Read access to a package registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the packument (all-versions metadata) for a package.
    async fn fetch_packument(&self, name: &str) -> Result<Packument, SyncError>;

    /// Fetch the full registry record for one version.
    async fn fetch_manifest(&self, name: &str, version: &str)
        -> Result<serde_json::Value, SyncError>;

    /// Open the tarball for one version as a byte stream.
    async fn fetch_tarball(&self, name: &str, version: &str) -> Result<TarballStream, SyncError>;
}

/// HTTP registry client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a client for the registry in `config`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let base_url =
            Url::parse(&config.registry_url).map_err(|e| ConfigError::InvalidRegistryUrl {
                url: config.registry_url.clone(),
                reason: e.to_string(),
            })?;

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::registry(format!("Failed to build URL for '{path}': {e}")))
    }

    /// Conventional tarball location: `{base}/{name}/-/{unscoped}-{version}.tgz`.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    pub fn tarball_url(&self, name: &str, version: &str) -> Result<Url, SyncError> {
        self.url_for(&format!("{name}/-/{}-{version}.tgz", unscoped_name(name)))
    }

    async fn get(&self, url: Url, name: &str) -> Result<reqwest::Response, SyncError> {
        let response = self.http.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::not_found(name));
        }
        if !response.status().is_success() {
            return Err(SyncError::registry(format!(
                "Registry returned status {} for '{url}'",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn fetch_packument(&self, name: &str) -> Result<Packument, SyncError> {
        let url = self.url_for(&url_encoded_name(name))?;
        let response = self.get(url, name).await?;
        let body = response.bytes().await?;
        let mut packument: Packument = serde_json::from_slice(&body)?;
        if packument.name.is_empty() {
            packument.name = name.to_string();
        }
        Ok(packument)
    }

    async fn fetch_manifest(
        &self,
        name: &str,
        version: &str,
    ) -> Result<serde_json::Value, SyncError> {
        let url = self.url_for(&format!("{}/{version}", url_encoded_name(name)))?;
        let response = self.get(url, name).await?;
        Ok(response.json().await?)
    }

    async fn fetch_tarball(&self, name: &str, version: &str) -> Result<TarballStream, SyncError> {
        let url = self.tarball_url(name, version)?;
        let response = self.get(url, name).await.map_err(|e| {
            SyncError::download_failed(format!("Failed to download {name}@{version}: {e}"))
        })?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| SyncError::download_failed(format!("Failed to read response body: {e}")))
        });
        Ok(stream.boxed())
    }
}
