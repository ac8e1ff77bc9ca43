#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Dependency-gap engine for offline npm mirrors.
//!
//! Given what a local store already holds, [`resolve`] plans the package
//! versions that must be fetched to keep every cached dependency closure
//! installable offline, and [`download`] fetches, verifies and stores them.

pub mod config;
pub mod error;
pub mod paths;
pub mod pkg;
pub mod version;

pub use config::{Config, SyncOptions};
pub use error::{ConfigError, Error};
pub use pkg::{
    CachedPackage, DownloadReason, DownloadResult, PackageStore, PackageToDownload, Registry,
    SyncEngine, SyncError,
};
pub use version::VERSION;

use std::sync::Arc;

/// Plan the downloads needed for `cached`.
///
/// # Errors
/// Returns an error only if `options` is invalid.
pub async fn resolve(
    registry: Arc<dyn Registry>,
    cached: &[CachedPackage],
    options: &SyncOptions,
) -> Result<Vec<PackageToDownload>, ConfigError> {
    pkg::Resolver::new(registry).resolve(cached, options).await
}

/// Execute a plan with at most `concurrency` downloads in flight.
///
/// # Errors
/// Returns an error only if `concurrency` is 0.
pub async fn download(
    registry: Arc<dyn Registry>,
    store: Arc<dyn PackageStore>,
    plan: &[PackageToDownload],
    concurrency: usize,
) -> Result<Vec<DownloadResult>, ConfigError> {
    pkg::Downloader::new(registry, store)
        .download_all(plan, concurrency)
        .await
}
