//! In-memory registry and store.
//!
//! Used by the test suites and by embedders that want to drive the engine
//! without a network or a disk.

use super::error::SyncError;
use super::packument::{Packument, VersionManifest};
use super::registry::{Registry, TarballStream};
use super::spec::package_key;
use super::store::{CachedPackage, PackageStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use semver::Version;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry serving fixtures from memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    packuments: HashMap<String, Packument>,
    manifests: HashMap<String, Value>,
    tarballs: HashMap<String, Bytes>,
    failures: HashMap<String, SyncError>,
    latency: Option<Duration>,
    /// Remaining forced tarball failures per `name@version`.
    flaky: Mutex<HashMap<String, usize>>,
    packument_calls: Mutex<HashMap<String, usize>>,
    tarball_calls: Mutex<HashMap<String, usize>>,
    active_tarballs: AtomicUsize,
    peak_tarballs: AtomicUsize,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one version from its full registry manifest.
    ///
    /// The packument entry is derived from the manifest, `dist.shasum` and
    /// `dist.integrity` are filled in from `tarball` when absent, and
    /// `dist-tags.latest` moves to the highest stable version published.
    #[must_use]
    pub fn publish(mut self, mut manifest: Value, tarball: impl Into<Bytes>) -> Self {
        let tarball = tarball.into();
        let name = manifest["name"].as_str().unwrap_or_default().to_string();
        let version = manifest["version"].as_str().unwrap_or_default().to_string();

        if let Some(obj) = manifest.as_object_mut() {
            let digests = npmsync_util::digest_bytes(&tarball);
            let dist = obj
                .entry("dist")
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(dist) = dist.as_object_mut() {
                dist.entry("shasum").or_insert(Value::String(digests.shasum));
                dist.entry("integrity").or_insert(Value::String(digests.integrity));
            }
        }

        let packument = self
            .packuments
            .entry(name.clone())
            .or_insert_with(|| Packument {
                name: name.clone(),
                ..Packument::default()
            });
        packument
            .versions
            .insert(version.clone(), VersionManifest::from_value(&manifest));
        if let Some(latest) = highest_stable(packument.version_keys()) {
            packument.dist_tags.insert("latest".to_string(), latest);
        }

        let key = package_key(&name, &version);
        self.manifests.insert(key.clone(), manifest);
        self.tarballs.insert(key, tarball);
        self
    }

    /// Serve a tarball with no registry manifest behind it.
    #[must_use]
    pub fn with_tarball(mut self, name: &str, version: &str, tarball: impl Into<Bytes>) -> Self {
        self.tarballs.insert(package_key(name, version), tarball.into());
        self
    }

    /// Replace a whole packument. Manifests and tarballs are left untouched.
    #[must_use]
    pub fn with_packument(mut self, packument: Packument) -> Self {
        self.packuments.insert(packument.name.clone(), packument);
        self
    }

    #[must_use]
    pub fn with_dist_tag(mut self, name: &str, tag: &str, version: &str) -> Self {
        if let Some(packument) = self.packuments.get_mut(name) {
            packument.dist_tags.insert(tag.to_string(), version.to_string());
        }
        self
    }

    /// Every request for `name` fails with `error`.
    #[must_use]
    pub fn with_failure(mut self, name: &str, error: SyncError) -> Self {
        self.failures.insert(name.to_string(), error);
        self
    }

    /// The first `times` tarball requests for `name@version` fail.
    #[must_use]
    pub fn with_flaky_tarball(self, name: &str, version: &str, times: usize) -> Self {
        lock(&self.flaky).insert(package_key(name, version), times);
        self
    }

    /// Delay every packument and tarball response, so concurrent callers
    /// overlap.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `fetch_packument` calls made for `name`.
    #[must_use]
    pub fn packument_calls(&self, name: &str) -> usize {
        lock(&self.packument_calls).get(name).copied().unwrap_or(0)
    }

    /// Number of `fetch_tarball` calls made for `name@version`.
    #[must_use]
    pub fn tarball_calls(&self, name: &str, version: &str) -> usize {
        lock(&self.tarball_calls)
            .get(&package_key(name, version))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of tarball requests observed in flight at once.
    #[must_use]
    pub fn peak_concurrent_tarballs(&self) -> usize {
        self.peak_tarballs.load(Ordering::SeqCst)
    }

    fn check_failure(&self, name: &str) -> Result<(), SyncError> {
        match self.failures.get(name) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn highest_stable<'a>(versions: impl Iterator<Item = &'a str>) -> Option<String> {
    versions
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| v.pre.is_empty())
        .max()
        .map(|v| v.to_string())
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn fetch_packument(&self, name: &str) -> Result<Packument, SyncError> {
        *lock(&self.packument_calls).entry(name.to_string()).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.check_failure(name)?;
        self.packuments
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::not_found(name))
    }

    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<Value, SyncError> {
        self.check_failure(name)?;
        self.manifests
            .get(&package_key(name, version))
            .cloned()
            .ok_or_else(|| SyncError::not_found(&package_key(name, version)))
    }

    async fn fetch_tarball(&self, name: &str, version: &str) -> Result<TarballStream, SyncError> {
        let key = package_key(name, version);
        *lock(&self.tarball_calls).entry(key.clone()).or_insert(0) += 1;

        let active = self.active_tarballs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_tarballs.fetch_max(active, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.active_tarballs.fetch_sub(1, Ordering::SeqCst);

        self.check_failure(name)?;

        if let Some(remaining) = lock(&self.flaky).get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::download_failed(format!(
                    "Connection reset while downloading {key}"
                )));
            }
        }

        let body = self
            .tarballs
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::not_found(&key))?;

        // Deliver in two chunks so consumers exercise incremental hashing.
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Store holding everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tarballs: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    manifests: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate cached versions with placeholder contents.
    #[must_use]
    pub fn with_cached(self, name: &str, versions: &[&str]) -> Self {
        {
            let mut tarballs = lock(&self.tarballs);
            let entry = tarballs.entry(name.to_string()).or_default();
            for version in versions {
                entry.insert((*version).to_string(), b"cached".to_vec());
            }
        }
        self
    }

    #[must_use]
    pub fn tarball(&self, name: &str, version: &str) -> Option<Vec<u8>> {
        lock(&self.tarballs)
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
    }

    #[must_use]
    pub fn manifest(&self, name: &str, version: &str) -> Option<Value> {
        lock(&self.manifests).get(&package_key(name, version)).cloned()
    }

    /// Total number of stored tarballs.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.tarballs).values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn list_cached(&self) -> Result<Vec<CachedPackage>, SyncError> {
        Ok(lock(&self.tarballs)
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(name, versions)| CachedPackage::new(name.clone(), versions.keys().cloned()))
            .collect())
    }

    async fn has_version(&self, name: &str, version: &str) -> bool {
        lock(&self.tarballs)
            .get(name)
            .is_some_and(|versions| versions.contains_key(version))
    }

    async fn write(&self, name: &str, version: &str, bytes: &[u8]) -> Result<(), SyncError> {
        lock(&self.tarballs)
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn write_manifest(
        &self,
        name: &str,
        version: &str,
        manifest: &Value,
    ) -> Result<(), SyncError> {
        lock(&self.manifests).insert(package_key(name, version), manifest.clone());
        Ok(())
    }
}
