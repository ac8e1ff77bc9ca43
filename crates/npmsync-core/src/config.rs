use crate::error::ConfigError;
use crate::paths::default_store_dir;
use crate::pkg::platform::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable overriding the registry URL.
pub const REGISTRY_ENV: &str = "NPMSYNC_REGISTRY";
/// Environment variable overriding the store root.
pub const STORE_ENV: &str = "NPMSYNC_STORE";
/// Environment variable overriding the per-request timeout (seconds).
pub const TIMEOUT_ENV: &str = "NPMSYNC_TIMEOUT_SECS";

pub const MAX_DEPTH_ENV: &str = "NPMSYNC_MAX_DEPTH";
pub const CONCURRENCY_ENV: &str = "NPMSYNC_CONCURRENCY";
pub const UPDATE_LATEST_ENV: &str = "NPMSYNC_UPDATE_LATEST";
pub const COMPLETE_SIBLINGS_ENV: &str = "NPMSYNC_COMPLETE_SIBLINGS";
pub const INCLUDE_DEV_ENV: &str = "NPMSYNC_INCLUDE_DEV";
pub const INCLUDE_PEER_ENV: &str = "NPMSYNC_INCLUDE_PEER";
pub const INCLUDE_OPTIONAL_ENV: &str = "NPMSYNC_INCLUDE_OPTIONAL";

/// Default BFS depth bound.
pub const DEFAULT_MAX_DEPTH: u32 = 10;
/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Upper clamp for the worker pool size.
pub const MAX_CONCURRENCY: usize = 50;

/// Options for one resolution/download run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Plan `dist-tags.latest` of every cached package when not cached yet.
    pub update_to_latest: bool,
    /// Plan the newest patch and minor of every cached version's series.
    pub complete_sibling_versions: bool,
    pub include_dev: bool,
    pub include_peer: bool,
    pub include_optional: bool,
    /// Deepest BFS layer processed (layer 0 is the seed layer).
    pub max_depth: u32,
    /// Worker pool size for fetches and downloads.
    pub concurrency: usize,
    /// Platforms whose prebuilt optional binaries should be mirrored.
    pub target_platforms: Vec<Platform>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            update_to_latest: false,
            complete_sibling_versions: false,
            include_dev: false,
            include_peer: false,
            include_optional: false,
            max_depth: DEFAULT_MAX_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
            target_platforms: Vec::new(),
        }
    }
}

impl SyncOptions {
    /// Reject settings that indicate misconfiguration.
    ///
    /// # Errors
    /// Returns [`ConfigError::NonPositiveConcurrency`] when `concurrency` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::NonPositiveConcurrency(0));
        }
        Ok(())
    }

    /// Concurrency clamped to `[1, MAX_CONCURRENCY]`.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        clamp_concurrency(self.concurrency)
    }

    #[must_use]
    pub fn with_update_to_latest(mut self, yes: bool) -> Self {
        self.update_to_latest = yes;
        self
    }

    #[must_use]
    pub fn with_sibling_versions(mut self, yes: bool) -> Self {
        self.complete_sibling_versions = yes;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_target_platform(mut self, platform: Platform) -> Self {
        self.target_platforms.push(platform);
        self
    }
}

/// Clamp a requested pool size to `[1, MAX_CONCURRENCY]`.
#[must_use]
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

/// Runtime configuration for npmsync.
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry base URL (always ends with `/`).
    pub registry_url: String,
    /// Root directory of the local package store.
    pub store_root: PathBuf,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Resolution and download options.
    pub options: SyncOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY.to_string(),
            store_root: default_store_dir(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            options: SyncOptions::default(),
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    ///
    /// # Errors
    /// Returns an error if any `NPMSYNC_*` variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns an error if any value is unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup(REGISTRY_ENV) {
            config = config.with_registry(&url)?;
        }
        if let Some(root) = lookup(STORE_ENV) {
            config.store_root = PathBuf::from(root);
        }
        if let Some(secs) = lookup(TIMEOUT_ENV) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value(TIMEOUT_ENV, &secs, "whole seconds"))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        let opts = &mut config.options;
        if let Some(v) = lookup(MAX_DEPTH_ENV) {
            let depth = parse_int(MAX_DEPTH_ENV, &v)?;
            if depth < 0 {
                return Err(ConfigError::NegativeMaxDepth(depth));
            }
            opts.max_depth = u32::try_from(depth)
                .map_err(|_| ConfigError::invalid_value(MAX_DEPTH_ENV, &v, "a depth below 2^32"))?;
        }
        if let Some(v) = lookup(CONCURRENCY_ENV) {
            let n = parse_int(CONCURRENCY_ENV, &v)?;
            if n <= 0 {
                return Err(ConfigError::NonPositiveConcurrency(n));
            }
            opts.concurrency = usize::try_from(n).unwrap_or(MAX_CONCURRENCY);
        }
        let flags: [(&str, &mut bool); 5] = [
            (UPDATE_LATEST_ENV, &mut opts.update_to_latest),
            (COMPLETE_SIBLINGS_ENV, &mut opts.complete_sibling_versions),
            (INCLUDE_DEV_ENV, &mut opts.include_dev),
            (INCLUDE_PEER_ENV, &mut opts.include_peer),
            (INCLUDE_OPTIONAL_ENV, &mut opts.include_optional),
        ];
        for (key, slot) in flags {
            if let Some(v) = lookup(key) {
                *slot = parse_bool(key, &v)?;
            }
        }

        config.options.validate()?;
        Ok(config)
    }

    /// Set the registry URL, normalizing the trailing slash.
    ///
    /// # Errors
    /// Returns an error if the URL does not parse or is not http(s).
    pub fn with_registry(mut self, url: &str) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidRegistryUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidRegistryUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        let mut normalized = parsed.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        self.registry_url = normalized;
        Ok(self)
    }

    #[must_use]
    pub fn with_store_root(mut self, root: PathBuf) -> Self {
        self.store_root = root;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_value(key, value, "an integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_value(key, value, "a boolean")),
    }
}
