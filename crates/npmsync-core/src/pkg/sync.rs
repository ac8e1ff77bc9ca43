//! End-to-end mirror sync: scan the store, plan, download.

use super::download::{DownloadResult, DownloadSummary, Downloader};
use super::progress::{NoProgress, ProgressSink};
use super::registry::{Registry, RegistryClient};
use super::resolve::{Analysis, Resolver};
use super::store::{FsPackageStore, PackageStore};
use crate::config::{Config, SyncOptions};
use crate::error::Error;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Result of a full sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub analysis: Analysis,
    #[serde(skip)]
    pub results: Vec<DownloadResult>,
    pub summary: DownloadSummary,
}

impl SyncReport {
    /// Items still failed after all retries.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }
}

/// Registry + store + engine settings.
#[derive(Clone)]
pub struct SyncEngine {
    registry: Arc<dyn Registry>,
    store: Arc<dyn PackageStore>,
    progress: Arc<dyn ProgressSink>,
    retries: u32,
}

impl SyncEngine {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, store: Arc<dyn PackageStore>) -> Self {
        Self {
            registry,
            store,
            progress: Arc::new(NoProgress),
            retries: 0,
        }
    }

    /// HTTP registry and filesystem store from runtime config.
    ///
    /// # Errors
    /// Returns an error if the registry client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let registry = RegistryClient::new(config)?;
        let store = FsPackageStore::new(config.store_root.clone());
        Ok(Self::new(Arc::new(registry), Arc::new(store)))
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Extra passes over failed downloads.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Scan the store and plan the missing versions.
    ///
    /// # Errors
    /// Returns an error if `options` is invalid or the store cannot be read.
    pub async fn plan(&self, options: &SyncOptions) -> Result<Analysis, Error> {
        options.validate()?;
        let cached = self.store.list_cached().await.map_err(Error::Store)?;
        info!(packages = cached.len(), "scanned local store");

        let resolver = Resolver::new(Arc::clone(&self.registry)).with_progress(Arc::clone(&self.progress));
        Ok(resolver.analyze_with_report(&cached, &[], options).await?)
    }

    /// Plan, then download everything planned.
    ///
    /// # Errors
    /// Returns an error if `options` is invalid or the store cannot be read.
    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncReport, Error> {
        let analysis = self.plan(options).await?;

        let downloader = Downloader::new(Arc::clone(&self.registry), Arc::clone(&self.store))
            .with_progress(Arc::clone(&self.progress));
        let mut results = downloader
            .download_all(&analysis.plan, options.concurrency)
            .await?;

        for attempt in 1..=self.retries {
            if results.iter().all(DownloadResult::is_ok) {
                break;
            }
            info!(attempt, "retry pass");
            results = downloader.retry_failed(results, options.concurrency).await?;
        }

        let summary = DownloadSummary::from_results(&results);
        Ok(SyncReport {
            analysis,
            results,
            summary,
        })
    }
}
