//! Local package store.
//!
//! Holds the tarballs (and full manifests) already mirrored. Layout mirrors
//! the registry's own URL scheme so the tree can be served statically:
//!
//! ```text
//! {root}/left-pad/-/left-pad-1.3.0.tgz
//! {root}/left-pad/1.3.0.json
//! {root}/@types/node/-/node-20.0.0.tgz
//! {root}/@types/node/20.0.0.json
//! ```

use super::error::SyncError;
use super::spec::{unscoped_name, validate_name};
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of what the store holds for one package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPackage {
    pub name: String,
    pub versions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl CachedPackage {
    /// Build a snapshot, computing `latest_version` as the highest semver.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let versions: BTreeSet<String> = versions.into_iter().map(Into::into).collect();
        let latest_version = highest_version(&versions);
        Self {
            name: name.into(),
            versions,
            latest_version,
        }
    }

    #[must_use]
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }
}

fn highest_version(versions: &BTreeSet<String>) -> Option<String> {
    versions
        .iter()
        .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v.clone())
}

/// Where mirrored artifacts live.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Every cached package with its versions.
    async fn list_cached(&self) -> Result<Vec<CachedPackage>, SyncError>;

    async fn has_version(&self, name: &str, version: &str) -> bool;

    /// Persist a tarball. Writing the same `name@version` twice is harmless.
    async fn write(&self, name: &str, version: &str, bytes: &[u8]) -> Result<(), SyncError>;

    /// Persist the full registry manifest next to the tarball.
    async fn write_manifest(
        &self,
        _name: &str,
        _version: &str,
        _manifest: &serde_json::Value,
    ) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Filesystem-backed store.
#[derive(Debug, Clone)]
pub struct FsPackageStore {
    root: PathBuf,
}

impl FsPackageStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything for one package name.
    ///
    /// Scoped names nest under their scope directory.
    #[must_use]
    pub fn package_dir(&self, name: &str) -> PathBuf {
        name.split('/').fold(self.root.clone(), |dir, part| dir.join(part))
    }

    #[must_use]
    pub fn tarball_path(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name)
            .join("-")
            .join(format!("{}-{version}.tgz", unscoped_name(name)))
    }

    #[must_use]
    pub fn manifest_path(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name).join(format!("{version}.json"))
    }

    /// Reject coordinates whose paths would leave the package directory.
    fn check_coordinates(name: &str, version: &str) -> Result<(), SyncError> {
        validate_name(name).map_err(|e| {
            SyncError::store(format!("Refusing to store {name}@{version}: {}", e.message()))
        })?;
        Version::parse(version).map_err(|e| {
            SyncError::store(format!("Refusing to store {name}@{version}: invalid version: {e}"))
        })?;
        Ok(())
    }

    /// Synchronous scan of the store tree.
    ///
    /// # Errors
    /// Returns an error if the root exists but cannot be read.
    pub fn scan(&self) -> Result<Vec<CachedPackage>, SyncError> {
        let mut result = Vec::new();
        if !self.root.exists() {
            return Ok(result);
        }

        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_dir() || dir_name.starts_with('.') {
                continue;
            }

            if dir_name.starts_with('@') {
                let Ok(scoped) = fs::read_dir(&path) else {
                    continue;
                };
                for scoped_entry in scoped.flatten() {
                    if scoped_entry.path().is_dir() {
                        let pkg = scoped_entry.file_name().to_string_lossy().into_owned();
                        let name = format!("{dir_name}/{pkg}");
                        Self::scan_package(&scoped_entry.path(), &name, &mut result);
                    }
                }
            } else {
                Self::scan_package(&path, &dir_name, &mut result);
            }
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn scan_package(dir: &Path, name: &str, result: &mut Vec<CachedPackage>) {
        let prefix = format!("{}-", unscoped_name(name));
        let Ok(entries) = fs::read_dir(dir.join("-")) else {
            return;
        };

        let versions: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let file = entry.file_name().to_string_lossy().into_owned();
                let version = file.strip_prefix(&prefix)?.strip_suffix(".tgz")?;
                (!version.is_empty()).then(|| version.to_string())
            })
            .collect();

        if !versions.is_empty() {
            result.push(CachedPackage::new(name, versions));
        }
    }
}

#[async_trait]
impl PackageStore for FsPackageStore {
    async fn list_cached(&self) -> Result<Vec<CachedPackage>, SyncError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.scan())
            .await
            .map_err(|e| SyncError::store(format!("Store scan task failed: {e}")))?
    }

    async fn has_version(&self, name: &str, version: &str) -> bool {
        if Self::check_coordinates(name, version).is_err() {
            return false;
        }
        tokio::fs::metadata(self.tarball_path(name, version))
            .await
            .is_ok_and(|m| m.is_file())
    }

    async fn write(&self, name: &str, version: &str, bytes: &[u8]) -> Result<(), SyncError> {
        Self::check_coordinates(name, version)?;
        let path = self.tarball_path(name, version);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || npmsync_util::fs::atomic_write(&path, &bytes))
            .await
            .map_err(|e| SyncError::store(format!("Store write task failed: {e}")))?
            .map_err(|e| SyncError::store(format!("Failed to write {name}@{version}: {e}")))
    }

    async fn write_manifest(
        &self,
        name: &str,
        version: &str,
        manifest: &serde_json::Value,
    ) -> Result<(), SyncError> {
        Self::check_coordinates(name, version)?;
        let path = self.manifest_path(name, version);
        let bytes = serde_json::to_vec_pretty(manifest)?;
        tokio::task::spawn_blocking(move || npmsync_util::fs::atomic_write(&path, &bytes))
            .await
            .map_err(|e| SyncError::store(format!("Store write task failed: {e}")))?
            .map_err(|e| SyncError::store(format!("Failed to write manifest {name}@{version}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_unscoped() {
        let store = FsPackageStore::new("/store");
        assert_eq!(
            store.tarball_path("left-pad", "1.3.0"),
            PathBuf::from("/store/left-pad/-/left-pad-1.3.0.tgz")
        );
        assert_eq!(
            store.manifest_path("left-pad", "1.3.0"),
            PathBuf::from("/store/left-pad/1.3.0.json")
        );
    }

    #[test]
    fn test_paths_scoped() {
        let store = FsPackageStore::new("/store");
        assert_eq!(
            store.tarball_path("@types/node", "20.0.0"),
            PathBuf::from("/store/@types/node/-/node-20.0.0.tgz")
        );
    }

    #[test]
    fn test_cached_package_latest() {
        let cached = CachedPackage::new("foo", ["1.2.0", "1.10.0", "1.9.0", "2.0.0-beta.1"]);
        assert_eq!(cached.latest_version.as_deref(), Some("2.0.0-beta.1"));
        assert!(cached.has_version("1.10.0"));
    }

    #[test]
    fn test_scan_empty_store() {
        let dir = tempdir().unwrap();
        let store = FsPackageStore::new(dir.path().join("missing"));
        assert!(store.scan().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_list() {
        let dir = tempdir().unwrap();
        let store = FsPackageStore::new(dir.path());

        store.write("left-pad", "1.0.0", b"tgz-a").await.unwrap();
        store.write("left-pad", "1.3.0", b"tgz-b").await.unwrap();
        store.write("@types/node", "20.0.0", b"tgz-c").await.unwrap();
        // Idempotent rewrite
        store.write("left-pad", "1.3.0", b"tgz-b").await.unwrap();

        assert!(store.has_version("left-pad", "1.3.0").await);
        assert!(!store.has_version("left-pad", "9.9.9").await);

        let cached = store.list_cached().await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].name, "@types/node");
        assert_eq!(cached[1].name, "left-pad");
        assert_eq!(cached[1].versions.len(), 2);
        assert_eq!(cached[1].latest_version.as_deref(), Some("1.3.0"));
    }

    #[tokio::test]
    async fn test_write_manifest() {
        let dir = tempdir().unwrap();
        let store = FsPackageStore::new(dir.path());
        let manifest = serde_json::json!({ "name": "left-pad", "version": "1.3.0" });

        store.write_manifest("left-pad", "1.3.0", &manifest).await.unwrap();

        let written = fs::read_to_string(store.manifest_path("left-pad", "1.3.0")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, manifest);
        // Manifests alone do not count as cached versions
        assert!(store.scan().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_rejects_escaping_coordinates() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let store = FsPackageStore::new(&root);
        let manifest = serde_json::json!({});

        for (name, version) in [
            ("../../escaped", "1.0.0"),
            ("..", "1.0.0"),
            ("@scope/../x", "1.0.0"),
            ("ok", "1.0.0/../../x"),
            ("ok", "nightly"),
        ] {
            let err = store.write(name, version, b"payload").await.unwrap_err();
            assert_eq!(err.code(), crate::pkg::error::codes::SYNC_STORE_ERROR, "{name}@{version}");
            let err = store.write_manifest(name, version, &manifest).await.unwrap_err();
            assert_eq!(err.code(), crate::pkg::error::codes::SYNC_STORE_ERROR, "{name}@{version}");
            assert!(!store.has_version(name, version).await);
        }

        // Nothing was created, inside or outside the root.
        assert!(!root.exists());
        let siblings: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert!(siblings.is_empty());
    }
}
