//! Dependency gap analysis.
//!
//! Walks the dependency graph of everything already in the local store,
//! layer by layer, and plans the versions the store is missing. Each run owns
//! its [`MetadataCache`] and dedup sets; nothing is shared between runs, so
//! one [`Resolver`] can serve several concurrent analyses.

use super::metadata_cache::MetadataCache;
use super::packument::{DependencyMap, PackumentSummary, VersionManifest};
use super::platform::platform_binaries;
use super::progress::{NoProgress, ProgressEvent, ProgressSink};
use super::registry::Registry;
use super::sibling;
use super::spec::{classify_dependency, package_key, validate_name, DependencyTarget};
use super::store::CachedPackage;
use super::version::{resolve_version, satisfied_by_any};
use crate::config::SyncOptions;
use crate::error::ConfigError;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `requiredBy` marker for targets seeded from the local store.
pub const LOCAL_CACHE: &str = "local-cache";

/// Why a version is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadReason {
    NewerVersion,
    MissingDependency,
    SiblingVersion,
    PlatformBinary,
}

impl DownloadReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewerVersion => "newer-version",
            Self::MissingDependency => "missing-dependency",
            Self::SiblingVersion => "sibling-version",
            Self::PlatformBinary => "platform-binary",
        }
    }
}

impl fmt::Display for DownloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the download plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageToDownload {
    pub name: String,
    pub version: String,
    pub reason: DownloadReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_by: Option<String>,
}

impl PackageToDownload {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, reason: DownloadReason) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            reason,
            required_by: None,
        }
    }

    /// `name@version`.
    #[must_use]
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version)
    }
}

/// A unit of work in one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTarget {
    pub name: String,
    /// Concrete version, dist-tag or range.
    pub range: String,
    pub required_by: Option<String>,
    pub reason: Option<DownloadReason>,
}

impl ResolutionTarget {
    fn new(name: &str, range: &str, required_by: Option<String>, reason: Option<DownloadReason>) -> Self {
        Self {
            name: name.to_string(),
            range: range.to_string(),
            required_by,
            reason,
        }
    }
}

/// Plan plus run diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub plan: Vec<PackageToDownload>,
    /// Layers actually processed (at most `max_depth + 1`).
    pub layers_processed: u32,
    /// Registry packument fetches issued during the run.
    pub packuments_fetched: usize,
    /// `name@range` targets that resolved to nothing.
    pub unresolved: Vec<String>,
}

/// Mutable state owned by one analysis.
struct RunState<'a> {
    cache: MetadataCache,
    cached: HashMap<&'a str, &'a BTreeSet<String>>,
    /// `name@version` keys already resolved in this run.
    processed: HashSet<String>,
    /// `name@version` keys whose dependencies were already extracted.
    analyzed: HashSet<String>,
    plan: Vec<PackageToDownload>,
    planned: HashSet<String>,
    unresolved: BTreeSet<String>,
}

impl<'a> RunState<'a> {
    fn new(registry: Arc<dyn Registry>, cached: &'a [CachedPackage]) -> Self {
        Self {
            cache: MetadataCache::new(registry),
            cached: cached
                .iter()
                .map(|pkg| (pkg.name.as_str(), &pkg.versions))
                .collect(),
            processed: HashSet::new(),
            analyzed: HashSet::new(),
            plan: Vec::new(),
            planned: HashSet::new(),
            unresolved: BTreeSet::new(),
        }
    }

    fn is_cached(&self, name: &str, version: &str) -> bool {
        self.cached.get(name).is_some_and(|versions| versions.contains(version))
    }

    fn cache_satisfies(&self, name: &str, range: &str) -> bool {
        self.cached
            .get(name)
            .is_some_and(|versions| satisfied_by_any(range, versions.iter()))
    }

    /// Append to the plan unless `name@version` is already there.
    fn push_plan(&mut self, entry: PackageToDownload) {
        if self.planned.insert(entry.key()) {
            self.plan.push(entry);
        }
    }
}

/// Layered breadth-first dependency resolver.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<dyn Registry>,
    progress: Arc<dyn ProgressSink>,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            progress: Arc::new(NoProgress),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Plan downloads for `cached`, fetching all metadata from the registry.
    ///
    /// # Errors
    /// Returns an error only if `options` is invalid.
    pub async fn resolve(
        &self,
        cached: &[CachedPackage],
        options: &SyncOptions,
    ) -> Result<Vec<PackageToDownload>, ConfigError> {
        self.analyze(cached, &[], options).await
    }

    /// Plan downloads for `cached`.
    ///
    /// `refreshed` carries metadata the caller already fetched; it is used
    /// for update and sibling seeding without another registry round trip.
    ///
    /// # Errors
    /// Returns an error only if `options` is invalid.
    pub async fn analyze(
        &self,
        cached: &[CachedPackage],
        refreshed: &[PackumentSummary],
        options: &SyncOptions,
    ) -> Result<Vec<PackageToDownload>, ConfigError> {
        Ok(self.analyze_with_report(cached, refreshed, options).await?.plan)
    }

    /// Like [`Resolver::analyze`] but also returns run diagnostics.
    ///
    /// # Errors
    /// Returns an error only if `options` is invalid.
    pub async fn analyze_with_report(
        &self,
        cached: &[CachedPackage],
        refreshed: &[PackumentSummary],
        options: &SyncOptions,
    ) -> Result<Analysis, ConfigError> {
        options.validate()?;

        let mut state = RunState::new(Arc::clone(&self.registry), cached);
        let mut frontier = self.seed(&state, cached, refreshed, options).await;
        let mut layers_processed = 0;

        info!(
            packages = cached.len(),
            seeds = frontier.len(),
            max_depth = options.max_depth,
            "starting dependency analysis"
        );

        let mut depth = 0;
        while !frontier.is_empty() && depth <= options.max_depth {
            self.progress.emit(ProgressEvent::LayerStarted {
                depth,
                targets: frontier.len(),
            });
            debug!(depth, targets = frontier.len(), "processing layer");

            self.prefetch(&state, &frontier, options).await;

            let mut next = Vec::new();
            let mut enqueued = HashSet::new();
            for target in frontier {
                let expand = depth < options.max_depth;
                Self::process(&mut state, target, expand, options, &mut next, &mut enqueued).await;
            }

            layers_processed += 1;
            self.progress.emit(ProgressEvent::LayerFinished {
                depth,
                planned: state.plan.len(),
            });

            frontier = next;
            depth += 1;
        }

        let packuments_fetched = state.cache.fetch_count();
        state.cache.clear().await;

        info!(
            planned = state.plan.len(),
            layers = layers_processed,
            fetched = packuments_fetched,
            unresolved = state.unresolved.len(),
            "dependency analysis finished"
        );

        Ok(Analysis {
            plan: state.plan,
            layers_processed,
            packuments_fetched,
            unresolved: state.unresolved.into_iter().collect(),
        })
    }

    /// Build layer 0: every cached version, then update and sibling targets.
    async fn seed(
        &self,
        state: &RunState<'_>,
        cached: &[CachedPackage],
        refreshed: &[PackumentSummary],
        options: &SyncOptions,
    ) -> Vec<ResolutionTarget> {
        let mut seeds: Vec<ResolutionTarget> = cached
            .iter()
            .flat_map(|pkg| {
                pkg.versions.iter().map(|version| {
                    ResolutionTarget::new(
                        &pkg.name,
                        version,
                        Some(LOCAL_CACHE.to_string()),
                        Some(DownloadReason::MissingDependency),
                    )
                })
            })
            .collect();

        if !options.update_to_latest && !options.complete_sibling_versions {
            return seeds;
        }

        let summaries = self.summaries(state, cached, refreshed, options).await;
        let mut newer = Vec::new();
        let mut siblings = Vec::new();

        for pkg in cached {
            let Some(summary) = summaries.get(pkg.name.as_str()) else {
                continue;
            };

            if options.update_to_latest {
                if let Some(latest) = summary.latest.as_deref() {
                    if !pkg.has_version(latest) {
                        newer.push(ResolutionTarget::new(
                            &pkg.name,
                            latest,
                            None,
                            Some(DownloadReason::NewerVersion),
                        ));
                    }
                }
            }

            if options.complete_sibling_versions {
                let available = summary.versions.iter().map(String::as_str);
                for version in sibling::complete(&pkg.versions, available) {
                    siblings.push(ResolutionTarget::new(
                        &pkg.name,
                        &version,
                        None,
                        Some(DownloadReason::SiblingVersion),
                    ));
                }
            }
        }

        seeds.extend(newer);
        seeds.extend(siblings);
        seeds
    }

    /// Summaries for every cached name: caller-supplied first, otherwise
    /// derived from a (concurrent, coalesced) packument fetch.
    async fn summaries(
        &self,
        state: &RunState<'_>,
        cached: &[CachedPackage],
        refreshed: &[PackumentSummary],
        options: &SyncOptions,
    ) -> HashMap<String, PackumentSummary> {
        let mut summaries: HashMap<String, PackumentSummary> = refreshed
            .iter()
            .map(|summary| (summary.name.clone(), summary.clone()))
            .collect();

        let missing: Vec<&str> = cached
            .iter()
            .map(|pkg| pkg.name.as_str())
            .filter(|name| !summaries.contains_key(*name))
            .collect();

        let cache = &state.cache;
        let fetched: Vec<(&str, Option<PackumentSummary>)> = stream::iter(missing)
            .map(|name| async move { (name, cache.get(name).await.map(|p| p.summary())) })
            .buffer_unordered(options.effective_concurrency())
            .collect()
            .await;

        for (name, summary) in fetched {
            if let Some(mut summary) = summary {
                summary.name = name.to_string();
                summaries.insert(name.to_string(), summary);
            }
        }
        summaries
    }

    /// Fetch the packuments of every distinct name in the layer.
    async fn prefetch(&self, state: &RunState<'_>, frontier: &[ResolutionTarget], options: &SyncOptions) {
        let names: BTreeSet<&str> = frontier.iter().map(|t| t.name.as_str()).collect();
        let cache = &state.cache;
        stream::iter(names)
            .map(|name| async move { cache.get(name).await })
            .buffer_unordered(options.effective_concurrency())
            .for_each(|_| async {})
            .await;
    }

    async fn process(
        state: &mut RunState<'_>,
        target: ResolutionTarget,
        expand: bool,
        options: &SyncOptions,
        next: &mut Vec<ResolutionTarget>,
        enqueued: &mut HashSet<(String, String)>,
    ) {
        let Some(packument) = state.cache.get(&target.name).await else {
            state.unresolved.insert(package_key(&target.name, &target.range));
            return;
        };

        let version = match resolve_version(&packument, &target.range) {
            Ok(version) => version,
            Err(e) => {
                warn!(
                    name = %target.name,
                    range = %target.range,
                    required_by = target.required_by.as_deref().unwrap_or("-"),
                    error = %e,
                    "skipping unresolvable target"
                );
                state.unresolved.insert(package_key(&target.name, &target.range));
                return;
            }
        };

        let key = package_key(&target.name, &version);
        if !state.processed.insert(key.clone()) {
            return;
        }

        if !state.is_cached(&target.name, &version) {
            debug!(name = %target.name, version = %version, "planning download");
            state.push_plan(PackageToDownload {
                name: target.name.clone(),
                version: version.clone(),
                reason: target.reason.unwrap_or(DownloadReason::MissingDependency),
                required_by: target.required_by.clone(),
            });
        }

        if !expand || !state.analyzed.insert(key.clone()) {
            return;
        }
        let Some(manifest) = packument.manifest(&version) else {
            return;
        };

        for (dep_name, range) in dependency_entries(manifest, options) {
            match classify_dependency(dep_name, range) {
                DependencyTarget::External(spec) => {
                    debug!(name = %dep_name, spec = %spec, "skipping non-registry dependency");
                }
                DependencyTarget::InvalidName { name, reason } => {
                    warn!(name = %name, required_by = %key, reason = %reason, "skipping invalid dependency name");
                    state.unresolved.insert(package_key(&name, range));
                }
                DependencyTarget::Registry { name, range } => {
                    if state.cache_satisfies(&name, &range) {
                        continue;
                    }
                    if enqueued.insert((name.clone(), range.clone())) {
                        next.push(ResolutionTarget::new(&name, &range, Some(key.clone()), None));
                    }
                }
            }
        }

        if !options.target_platforms.is_empty() && !options.include_optional {
            for (name, range) in platform_binaries(manifest, &options.target_platforms) {
                if validate_name(&name).is_err() || state.cache_satisfies(&name, &range) {
                    continue;
                }
                if enqueued.insert((name.clone(), range.clone())) {
                    next.push(ResolutionTarget::new(
                        &name,
                        &range,
                        Some(key.clone()),
                        Some(DownloadReason::PlatformBinary),
                    ));
                }
            }
        }
    }
}

/// Dependency fields selected by `options`; `dependencies` always.
fn dependency_entries<'m>(
    manifest: &'m VersionManifest,
    options: &SyncOptions,
) -> impl Iterator<Item = (&'m String, &'m String)> {
    let optional = |yes: bool, map: &'m DependencyMap| {
        map.iter().filter(move |_| yes)
    };
    manifest
        .dependencies
        .iter()
        .chain(optional(options.include_dev, &manifest.dev_dependencies))
        .chain(optional(options.include_peer, &manifest.peer_dependencies))
        .chain(optional(options.include_optional, &manifest.optional_dependencies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::memory::MemoryRegistry;
    use crate::pkg::platform::Platform;
    use serde_json::json;
    use std::time::Duration;

    fn publish(registry: MemoryRegistry, name: &str, version: &str, deps: serde_json::Value) -> MemoryRegistry {
        registry.publish(
            json!({ "name": name, "version": version, "dependencies": deps }),
            format!("{name}-{version}"),
        )
    }

    fn resolver(registry: MemoryRegistry) -> (Resolver, Arc<MemoryRegistry>) {
        let registry = Arc::new(registry);
        (Resolver::new(registry.clone()), registry)
    }

    fn cached(name: &str, versions: &[&str]) -> CachedPackage {
        CachedPackage::new(name, versions.iter().copied())
    }

    fn keys(plan: &[PackageToDownload]) -> Vec<String> {
        plan.iter().map(PackageToDownload::key).collect()
    }

    #[tokio::test]
    async fn test_missing_dependency_is_planned() {
        let mut registry = publish(MemoryRegistry::new(), "left-pad", "1.0.0", json!({ "util": "^2.0.0" }));
        for v in ["2.0.0", "2.1.0", "2.1.1"] {
            registry = publish(registry, "util", v, json!({}));
        }
        let (resolver, _) = resolver(registry);

        let plan = resolver
            .resolve(&[cached("left-pad", &["1.0.0"])], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(
            plan,
            vec![PackageToDownload {
                name: "util".to_string(),
                version: "2.1.1".to_string(),
                reason: DownloadReason::MissingDependency,
                required_by: Some("left-pad@1.0.0".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_transitive_chain_and_satisfied_deps() {
        let mut registry = publish(MemoryRegistry::new(), "app", "1.0.0", json!({ "a": "^1.0.0", "cached-dep": "^3.0.0" }));
        registry = publish(registry, "a", "1.0.0", json!({ "b": "~2.1.0" }));
        registry = publish(registry, "b", "2.1.4", json!({}));
        registry = publish(registry, "b", "2.2.0", json!({}));
        registry = publish(registry, "cached-dep", "3.0.0", json!({}));
        registry = publish(registry, "cached-dep", "3.5.0", json!({}));
        let (resolver, registry) = resolver(registry);

        let plan = resolver
            .resolve(
                &[cached("app", &["1.0.0"]), cached("cached-dep", &["3.0.0"])],
                &SyncOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["a@1.0.0", "b@2.1.4"]);
        assert_eq!(plan[1].required_by.as_deref(), Some("a@1.0.0"));
        // Satisfied by the cached 3.0.0, so 3.5.0 is not pulled in.
        assert!(!keys(&plan).contains(&"cached-dep@3.5.0".to_string()));
        assert_eq!(registry.packument_calls("b"), 1);
    }

    #[tokio::test]
    async fn test_max_depth_zero_processes_only_seeds() {
        let mut registry = publish(MemoryRegistry::new(), "left-pad", "1.0.0", json!({ "util": "^2.0.0" }));
        registry = publish(registry, "util", "2.0.0", json!({}));
        let (resolver, registry) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(
                &[cached("left-pad", &["1.0.0"])],
                &[],
                &SyncOptions::default().with_max_depth(0),
            )
            .await
            .unwrap();

        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.layers_processed, 1);
        assert_eq!(registry.packument_calls("util"), 0);
    }

    #[tokio::test]
    async fn test_depth_bound_limits_layers() {
        let mut registry = MemoryRegistry::new();
        for i in 0..6 {
            let deps = json!({ format!("chain-{}", i + 1): "^1.0.0" });
            registry = publish(registry, &format!("chain-{i}"), "1.0.0", deps);
        }
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(
                &[cached("chain-0", &["1.0.0"])],
                &[],
                &SyncOptions::default().with_max_depth(2),
            )
            .await
            .unwrap();

        assert_eq!(analysis.layers_processed, 3);
        assert_eq!(keys(&analysis.plan), vec!["chain-1@1.0.0", "chain-2@1.0.0"]);
    }

    #[tokio::test]
    async fn test_failed_packument_is_not_fatal() {
        let mut registry = publish(
            MemoryRegistry::new(),
            "app",
            "1.0.0",
            json!({ "bad-pkg": "^1.0.0", "good": "^1.0.0" }),
        );
        registry = publish(registry, "good", "1.2.0", json!({}));
        let registry = registry.with_failure("bad-pkg", crate::pkg::error::SyncError::not_found("bad-pkg"));
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(keys(&analysis.plan), vec!["good@1.2.0"]);
        assert_eq!(analysis.unresolved, vec!["bad-pkg@^1.0.0"]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_skipped() {
        let mut registry = publish(MemoryRegistry::new(), "app", "1.0.0", json!({ "util": "^9.0.0" }));
        registry = publish(registry, "util", "2.0.0", json!({}));
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.unresolved, vec!["util@^9.0.0"]);
    }

    #[tokio::test]
    async fn test_shared_dependency_fetched_once() {
        let mut registry = publish(MemoryRegistry::new(), "a", "1.0.0", json!({ "shared-lib": "^1.0.0" }));
        registry = publish(registry, "b", "1.0.0", json!({ "shared-lib": "^1.1.0" }));
        registry = publish(registry, "shared-lib", "1.1.0", json!({}));
        let registry = registry.with_latency(Duration::from_millis(10));
        let (resolver, registry) = resolver(registry);

        let plan = resolver
            .resolve(
                &[cached("a", &["1.0.0"]), cached("b", &["1.0.0"])],
                &SyncOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["shared-lib@1.1.0"]);
        assert_eq!(plan[0].required_by.as_deref(), Some("a@1.0.0"));
        assert_eq!(registry.packument_calls("shared-lib"), 1);
    }

    #[tokio::test]
    async fn test_diamond_expands_once() {
        let mut registry = publish(MemoryRegistry::new(), "root", "1.0.0", json!({ "x": "^1.0.0", "y": "^1.0.0" }));
        registry = publish(registry, "x", "1.0.0", json!({ "z": "^1.0.0" }));
        registry = publish(registry, "y", "1.0.0", json!({ "z": "1.x" }));
        registry = publish(registry, "z", "1.4.0", json!({ "leaf": "*" }));
        registry = publish(registry, "leaf", "0.1.0", json!({}));
        let (resolver, registry) = resolver(registry);

        let plan = resolver
            .resolve(&[cached("root", &["1.0.0"])], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["x@1.0.0", "y@1.0.0", "z@1.4.0", "leaf@0.1.0"]);
        assert_eq!(registry.packument_calls("leaf"), 1);
    }

    #[tokio::test]
    async fn test_version_reached_twice_expands_once() {
        // z@1.4.0 is reached from root at depth 1 and again through x at depth 2.
        let mut registry = publish(MemoryRegistry::new(), "root", "1.0.0", json!({ "x": "^1.0.0", "z": "^1.0.0" }));
        registry = publish(registry, "x", "1.0.0", json!({ "z": "1.x" }));
        registry = publish(registry, "z", "1.4.0", json!({ "leaf": "*" }));
        registry = publish(registry, "leaf", "0.1.0", json!({}));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let resolver = Resolver::new(Arc::new(registry)).with_progress(Arc::new(tx));

        let analysis = resolver
            .analyze_with_report(&[cached("root", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(keys(&analysis.plan), vec!["x@1.0.0", "z@1.4.0", "leaf@0.1.0"]);
        let from_z: Vec<_> = analysis
            .plan
            .iter()
            .filter(|p| p.required_by.as_deref() == Some("z@1.4.0"))
            .collect();
        assert_eq!(from_z.len(), 1);

        // A second expansion of z would enqueue leaf into a fourth layer.
        let mut layer_sizes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::LayerStarted { targets, .. } = event {
                layer_sizes.push(targets);
            }
        }
        assert_eq!(layer_sizes, vec![1, 2, 2]);
        assert_eq!(analysis.layers_processed, 3);
    }

    #[tokio::test]
    async fn test_first_seen_reason_wins() {
        let mut registry = MemoryRegistry::new();
        for v in ["1.2.0", "1.2.1", "1.2.2", "1.3.0", "1.3.1", "1.4.0", "2.0.0"] {
            registry = publish(registry, "foo", v, json!({}));
        }
        let registry = registry.with_dist_tag("foo", "latest", "1.4.0");
        let (resolver, _) = resolver(registry);

        let plan = resolver
            .resolve(
                &[cached("foo", &["1.2.0", "1.3.0"])],
                &SyncOptions::default()
                    .with_update_to_latest(true)
                    .with_sibling_versions(true),
            )
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["foo@1.4.0", "foo@1.2.2", "foo@1.3.1"]);
        assert_eq!(plan[0].reason, DownloadReason::NewerVersion);
        assert!(plan[1..].iter().all(|p| p.reason == DownloadReason::SiblingVersion));
    }

    #[tokio::test]
    async fn test_invalid_dependency_name_is_skipped() {
        let mut registry = publish(
            MemoryRegistry::new(),
            "app",
            "1.0.0",
            json!({ "../../escaped": "1.0.0", "good": "^1.0.0" }),
        );
        registry = publish(registry, "../../escaped", "1.0.0", json!({}));
        registry = publish(registry, "good", "1.0.0", json!({}));
        let (resolver, registry) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(keys(&analysis.plan), vec!["good@1.0.0"]);
        assert_eq!(analysis.unresolved, vec!["../../escaped@1.0.0"]);
        assert_eq!(registry.packument_calls("../../escaped"), 0);
    }

    #[tokio::test]
    async fn test_planned_versions_are_semver() {
        let mut registry = publish(
            MemoryRegistry::new(),
            "app",
            "1.0.0",
            json!({ "dep": "nightly", "tagged": "latest" }),
        );
        registry = publish(registry, "dep", "nightly", json!({}));
        registry = publish(registry, "tagged", "canary", json!({}));
        let registry = registry.with_dist_tag("tagged", "latest", "canary");
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.unresolved, vec!["dep@nightly", "tagged@latest"]);
    }

    #[tokio::test]
    async fn test_overflowing_range_does_not_panic() {
        let registry = publish(
            MemoryRegistry::new(),
            "app",
            "1.0.0",
            json!({ "huge": "18446744073709551615", "huge-minor": "1.18446744073709551615" }),
        );
        let registry = publish(registry, "huge", "1.0.0", json!({}));
        let registry = publish(registry, "huge-minor", "1.0.0", json!({}));
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.unresolved.len(), 2);
    }

    #[tokio::test]
    async fn test_update_to_latest_and_siblings() {
        let mut registry = MemoryRegistry::new();
        for v in ["1.2.0", "1.2.1", "1.2.2", "1.3.0", "1.3.1", "1.4.0", "2.0.0"] {
            registry = publish(registry, "foo", v, json!({}));
        }
        let (resolver, _) = resolver(registry);
        let cache = [cached("foo", &["1.2.0", "1.3.0"])];

        let siblings = resolver
            .resolve(&cache, &SyncOptions::default().with_sibling_versions(true))
            .await
            .unwrap();
        assert_eq!(keys(&siblings), vec!["foo@1.2.2", "foo@1.3.1", "foo@1.4.0"]);
        assert!(siblings.iter().all(|p| p.reason == DownloadReason::SiblingVersion));

        let both = resolver
            .resolve(
                &cache,
                &SyncOptions::default()
                    .with_update_to_latest(true)
                    .with_sibling_versions(true),
            )
            .await
            .unwrap();
        assert_eq!(both[0].key(), "foo@2.0.0");
        assert_eq!(both[0].reason, DownloadReason::NewerVersion);
        assert_eq!(both.len(), 4);
    }

    #[tokio::test]
    async fn test_refreshed_summaries_skip_seed_fetch() {
        let registry = publish(MemoryRegistry::new(), "foo", "1.0.0", json!({}));
        let registry = publish(registry, "foo", "1.1.0", json!({}));
        let (resolver, _) = resolver(registry);

        let refreshed = [PackumentSummary {
            name: "foo".to_string(),
            latest: Some("1.1.0".to_string()),
            versions: vec!["1.0.0".to_string(), "1.1.0".to_string()],
        }];
        let plan = resolver
            .analyze(
                &[cached("foo", &["1.0.0"])],
                &refreshed,
                &SyncOptions::default().with_update_to_latest(true),
            )
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["foo@1.1.0"]);
    }

    #[tokio::test]
    async fn test_optional_and_dev_gating() {
        let registry = MemoryRegistry::new().publish(
            json!({
                "name": "app",
                "version": "1.0.0",
                "devDependencies": { "tap": "^1.0.0" },
                "optionalDependencies": { "fsevents": "^2.0.0" },
                "peerDependencies": { "react": "^18.0.0" }
            }),
            "app",
        );
        let registry = publish(registry, "tap", "1.0.0", json!({}));
        let registry = publish(registry, "fsevents", "2.3.0", json!({}));
        let registry = publish(registry, "react", "18.2.0", json!({}));
        let (resolver, _) = resolver(registry);
        let cache = [cached("app", &["1.0.0"])];

        let none = resolver.resolve(&cache, &SyncOptions::default()).await.unwrap();
        assert!(none.is_empty());

        let options = SyncOptions {
            include_dev: true,
            include_peer: true,
            include_optional: true,
            ..SyncOptions::default()
        };
        let all = resolver.resolve(&cache, &options).await.unwrap();
        assert_eq!(keys(&all), vec!["tap@1.0.0", "react@18.2.0", "fsevents@2.3.0"]);
    }

    #[tokio::test]
    async fn test_platform_binaries() {
        let registry = MemoryRegistry::new().publish(
            json!({
                "name": "esbuild",
                "version": "0.19.0",
                "optionalDependencies": {
                    "@esbuild/linux-x64": "0.19.0",
                    "@esbuild/darwin-arm64": "0.19.0"
                }
            }),
            "esbuild",
        );
        let registry = publish(registry, "@esbuild/linux-x64", "0.19.0", json!({}));
        let registry = publish(registry, "@esbuild/darwin-arm64", "0.19.0", json!({}));
        let (resolver, _) = resolver(registry);

        let options = SyncOptions::default().with_target_platform(Platform::new("linux", "x64", None));
        let plan = resolver
            .resolve(&[cached("esbuild", &["0.19.0"])], &options)
            .await
            .unwrap();

        assert_eq!(keys(&plan), vec!["@esbuild/linux-x64@0.19.0"]);
        assert_eq!(plan[0].reason, DownloadReason::PlatformBinary);
    }

    #[tokio::test]
    async fn test_aliases_and_external_specs() {
        let registry = publish(
            MemoryRegistry::new(),
            "app",
            "1.0.0",
            json!({
                "strip": "npm:strip-ansi@^6.0.0",
                "gitdep": "git+https://example.com/x.git",
                "local": "file:../local",
                "gh": "user/repo"
            }),
        );
        let registry = publish(registry, "strip-ansi", "6.0.1", json!({}));
        let (resolver, _) = resolver(registry);

        let analysis = resolver
            .analyze_with_report(&[cached("app", &["1.0.0"])], &[], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(keys(&analysis.plan), vec!["strip-ansi@6.0.1"]);
        assert!(analysis.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_fast() {
        let registry = publish(MemoryRegistry::new(), "a", "1.0.0", json!({}));
        let (resolver, registry) = resolver(registry);

        let err = resolver
            .resolve(&[cached("a", &["1.0.0"])], &SyncOptions::default().with_concurrency(0))
            .await
            .unwrap_err();

        assert_eq!(err, ConfigError::NonPositiveConcurrency(0));
        assert_eq!(registry.packument_calls("a"), 0);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let registry = publish(MemoryRegistry::new(), "a", "1.0.0", json!({}));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let resolver = Resolver::new(Arc::new(registry)).with_progress(Arc::new(tx));

        resolver
            .resolve(&[cached("a", &["1.0.0"])], &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::LayerStarted { depth: 0, targets: 1 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::LayerFinished { depth: 0, planned: 0 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reason_serialization() {
        let entry = PackageToDownload::new("a", "1.0.0", DownloadReason::PlatformBinary);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["reason"], "platform-binary");
        assert!(json.get("requiredBy").is_none());
    }
}
