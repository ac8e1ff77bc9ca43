//! Download engine.
//!
//! Executes a plan with a fixed pool of workers pulling from a shared queue,
//! so at most `concurrency` tarballs are in flight no matter how large the
//! plan is. Each item is fetched, hashed while streaming, verified against
//! the registry's `dist` digests, and written to the store as the last step.
//! Failures stay attached to their item; the batch always completes.

use super::error::SyncError;
use super::progress::{NoProgress, ProgressEvent, ProgressSink};
use super::registry::Registry;
use super::resolve::PackageToDownload;
use super::spec::package_key;
use super::store::PackageStore;
use crate::config::clamp_concurrency;
use crate::error::ConfigError;
use futures::future::join_all;
use futures::StreamExt;
use npmsync_util::{integrity_matches, Digests, TarballDigest};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// What a successful download produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadedArtifact {
    /// Hex sha1 of the tarball.
    pub shasum: String,
    /// `sha512-<base64>` of the tarball.
    pub integrity: String,
    pub size: u64,
    /// Full registry manifest, when it could be fetched.
    pub manifest: Option<Value>,
}

/// Outcome for one `name@version`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub name: String,
    pub version: String,
    pub outcome: Result<DownloadedArtifact, SyncError>,
}

impl DownloadResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&DownloadedArtifact> {
        self.outcome.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&SyncError> {
        self.outcome.as_ref().err()
    }

    #[must_use]
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version)
    }
}

/// Batch totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Bytes written by successful items.
    pub bytes: u64,
}

impl DownloadSummary {
    #[must_use]
    pub fn from_results(results: &[DownloadResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            match &result.outcome {
                Ok(artifact) => {
                    summary.succeeded += 1;
                    summary.bytes += artifact.size;
                }
                Err(_) => summary.failed += 1,
            }
            summary
        })
    }
}

/// Bounded-pool tarball downloader.
#[derive(Clone)]
pub struct Downloader {
    registry: Arc<dyn Registry>,
    store: Arc<dyn PackageStore>,
    progress: Arc<dyn ProgressSink>,
    max_size: u64,
}

impl Downloader {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, store: Arc<dyn PackageStore>) -> Self {
        Self {
            registry,
            store,
            progress: Arc::new(NoProgress),
            max_size: MAX_TARBALL_SIZE,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Override the per-tarball size limit.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Download every entry of `plan`.
    ///
    /// Duplicate `name@version` entries are downloaded once. Results come
    /// back in plan order.
    ///
    /// # Errors
    /// Returns an error if `concurrency` is 0. Per-item failures are reported
    /// in the results instead.
    pub async fn download_all(
        &self,
        plan: &[PackageToDownload],
        concurrency: usize,
    ) -> Result<Vec<DownloadResult>, ConfigError> {
        let mut seen = HashSet::new();
        let items: Vec<(String, String)> = plan
            .iter()
            .filter(|item| seen.insert(item.key()))
            .map(|item| (item.name.clone(), item.version.clone()))
            .collect();
        self.run_pool(items, concurrency).await
    }

    /// Re-run exactly the failed items of `results`.
    ///
    /// Returns `results` with every retried entry replaced in place.
    ///
    /// # Errors
    /// Returns an error if `concurrency` is 0.
    pub async fn retry_failed(
        &self,
        mut results: Vec<DownloadResult>,
        concurrency: usize,
    ) -> Result<Vec<DownloadResult>, ConfigError> {
        let failed: Vec<(String, String)> = results
            .iter()
            .filter(|result| !result.is_ok())
            .map(|result| (result.name.clone(), result.version.clone()))
            .collect();
        if failed.is_empty() {
            return Ok(results);
        }

        info!(count = failed.len(), "retrying failed downloads");
        let mut retried: HashMap<String, DownloadResult> = self
            .run_pool(failed, concurrency)
            .await?
            .into_iter()
            .map(|result| (result.key(), result))
            .collect();

        for result in &mut results {
            if let Some(fresh) = retried.remove(&result.key()) {
                *result = fresh;
            }
        }
        Ok(results)
    }

    async fn run_pool(
        &self,
        items: Vec<(String, String)>,
        concurrency: usize,
    ) -> Result<Vec<DownloadResult>, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::NonPositiveConcurrency(0));
        }

        let total = items.len();
        let workers = clamp_concurrency(concurrency).min(total);
        self.progress.emit(ProgressEvent::DownloadStarted { total });
        info!(total, workers, "starting downloads");

        let queue = Mutex::new(items.into_iter().enumerate().collect::<VecDeque<_>>());
        let completed = AtomicUsize::new(0);

        let pool = (0..workers).map(|_| async {
            let mut done = Vec::new();
            loop {
                let next = queue.lock().await.pop_front();
                let Some((index, (name, version))) = next else {
                    break;
                };
                let result = self.download_one(&name, &version).await;
                let finished = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.progress.emit(ProgressEvent::ItemCompleted {
                    name,
                    version,
                    ok: result.is_ok(),
                    completed: finished,
                    total,
                });
                done.push((index, result));
            }
            done
        });

        let mut results: Vec<(usize, DownloadResult)> =
            join_all(pool).await.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);

        let results: Vec<DownloadResult> = results.into_iter().map(|(_, r)| r).collect();
        let summary = DownloadSummary::from_results(&results);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            bytes = summary.bytes,
            "downloads finished"
        );
        Ok(results)
    }

    /// Download, verify and store a single version.
    pub async fn download_one(&self, name: &str, version: &str) -> DownloadResult {
        let outcome = self.fetch_and_store(name, version).await;
        match &outcome {
            Ok(artifact) => debug!(name = %name, version = %version, size = artifact.size, "stored tarball"),
            Err(e) => warn!(name = %name, version = %version, code = e.code(), error = %e, "download failed"),
        }
        DownloadResult {
            name: name.to_string(),
            version: version.to_string(),
            outcome,
        }
    }

    async fn fetch_and_store(&self, name: &str, version: &str) -> Result<DownloadedArtifact, SyncError> {
        let manifest = match self.registry.fetch_manifest(name, version).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(name = %name, version = %version, error = %e, "manifest unavailable, storing tarball unverified");
                None
            }
        };

        let mut stream = self.registry.fetch_tarball(name, version).await?;
        let mut digest = TarballDigest::new();
        let mut body = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if digest.size() + chunk.len() as u64 > self.max_size {
                return Err(SyncError::download_failed(format!(
                    "Tarball too large: {name}@{version} exceeds {} bytes",
                    self.max_size
                )));
            }
            digest.update(&chunk);
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(SyncError::empty_tarball(name, version));
        }

        let digests = digest.finish();
        if let Some(manifest) = &manifest {
            verify(name, version, manifest, &digests)?;
        }

        self.store.write(name, version, &body).await?;
        if let Some(manifest) = &manifest {
            self.store.write_manifest(name, version, manifest).await?;
        }

        Ok(DownloadedArtifact {
            shasum: digests.shasum,
            integrity: digests.integrity,
            size: digests.size,
            manifest,
        })
    }
}

/// Compare computed digests with the manifest's `dist.integrity` and
/// `dist.shasum`. Missing fields are not an error.
fn verify(name: &str, version: &str, manifest: &Value, digests: &Digests) -> Result<(), SyncError> {
    let dist = &manifest["dist"];

    if let Some(expected) = dist["integrity"].as_str() {
        match integrity_matches(expected, digests) {
            Some(true) => return Ok(()),
            Some(false) => {
                return Err(SyncError::integrity_mismatch(
                    name,
                    version,
                    expected,
                    &digests.integrity,
                ))
            }
            None => {}
        }
    }

    if let Some(expected) = dist["shasum"].as_str() {
        if !expected.eq_ignore_ascii_case(&digests.shasum) {
            return Err(SyncError::integrity_mismatch(name, version, expected, &digests.shasum));
        }
    }
    Ok(())
}
