//! Mirror sync functionality.
//!
//! Provides:
//! - Typed packument projection and npm range resolution
//! - Registry access over HTTP or from memory
//! - The local package store (filesystem or memory)
//! - Per-run metadata caching with request coalescing
//! - Layered dependency gap analysis with sibling and platform completion
//! - Bounded-pool tarball downloads with digest verification

pub mod download;
pub mod error;
pub mod memory;
pub mod metadata_cache;
pub mod packument;
pub mod platform;
pub mod progress;
pub mod registry;
pub mod resolve;
pub mod sibling;
pub mod spec;
pub mod store;
pub mod sync;
pub mod version;

pub use download::{
    DownloadResult, DownloadSummary, DownloadedArtifact, Downloader, MAX_TARBALL_SIZE,
};
pub use error::{codes as sync_codes, SyncError};
pub use memory::{MemoryRegistry, MemoryStore};
pub use metadata_cache::MetadataCache;
pub use packument::{DependencyMap, Packument, PackumentSummary, VersionManifest};
pub use platform::{is_platform_specific, platform_binaries, Platform};
pub use progress::{NoProgress, ProgressEvent, ProgressSink};
pub use registry::{Registry, RegistryClient, TarballStream};
pub use resolve::{
    Analysis, DownloadReason, PackageToDownload, ResolutionTarget, Resolver, LOCAL_CACHE,
};
pub use spec::{classify_dependency, DependencyTarget, PackageSpec};
pub use store::{CachedPackage, FsPackageStore, PackageStore};
pub use sync::{SyncEngine, SyncReport};
pub use version::{resolve_version, version_satisfies, NpmRange};
