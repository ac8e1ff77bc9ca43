//! Platform-specific package detection.
//!
//! Native tools (esbuild, swc, rollup, ...) ship one prebuilt package per
//! platform and list them all as optional dependencies, e.g.
//! `@esbuild/linux-x64` or `@swc/core-darwin-arm64`. An installer only pulls
//! the one matching the host, so an offline mirror has to fetch the ones for
//! the platforms it serves explicitly.

use super::packument::VersionManifest;
use serde::{Deserialize, Serialize};

const OS_TOKENS: [&str; 10] = [
    "darwin", "macos", "linux", "win32", "windows", "freebsd", "openbsd", "netbsd", "sunos",
    "android",
];
const ARCH_TOKENS: [&str; 12] = [
    "x64", "x86_64", "amd64", "arm64", "aarch64", "ia32", "x86", "arm", "armv7", "ppc64",
    "s390x", "riscv64",
];
const LIBC_TOKENS: [&str; 4] = ["musl", "gnu", "glibc", "msvc"];

/// A target platform tuple using Node.js naming (`process.platform`,
/// `process.arch`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libc: Option<String>,
}

impl Platform {
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>, libc: Option<&str>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            libc: libc.map(String::from),
        }
    }

    /// The host platform in Node.js naming.
    #[must_use]
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            "windows" => "win32",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "x86" => "ia32",
            other => other,
        };
        let libc = if cfg!(target_env = "musl") {
            Some("musl")
        } else if cfg!(all(target_os = "linux", target_env = "gnu")) {
            Some("glibc")
        } else {
            None
        };
        Self::new(os, arch, libc)
    }

    /// Parse `os-arch` or `os-arch-libc`, e.g. `linux-x64-musl`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('-');
        let os = parts.next().filter(|s| !s.is_empty())?;
        let arch = parts.next().filter(|s| !s.is_empty())?;
        let libc = parts.next();
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(os, arch, libc))
    }

    fn os_aliases(&self) -> &[&'static str] {
        match self.os.as_str() {
            "darwin" | "macos" => &["darwin", "macos"],
            "win32" | "windows" => &["win32", "windows"],
            "linux" => &["linux"],
            "freebsd" => &["freebsd"],
            "openbsd" => &["openbsd"],
            "netbsd" => &["netbsd"],
            "sunos" => &["sunos"],
            "android" => &["android"],
            _ => &[],
        }
    }

    fn arch_aliases(&self) -> &[&'static str] {
        match self.arch.as_str() {
            "x64" | "x86_64" | "amd64" => &["x64", "x86_64", "amd64"],
            "arm64" | "aarch64" => &["arm64", "aarch64"],
            "ia32" | "x86" => &["ia32", "x86"],
            "arm" | "armv7" => &["arm", "armv7"],
            "ppc64" => &["ppc64"],
            "s390x" => &["s390x"],
            "riscv64" => &["riscv64"],
            _ => &[],
        }
    }

    fn libc_aliases(&self) -> &[&'static str] {
        match self.libc.as_deref() {
            Some("musl") => &["musl"],
            Some("glibc" | "gnu") => &["gnu", "glibc"],
            Some("msvc") => &["msvc"],
            _ => &[],
        }
    }
}

/// Split a package name into lowercase tokens on `@`, `/`, `-`, `_`, `.`.
fn name_tokens(name: &str) -> Vec<String> {
    name.to_ascii_lowercase()
        .split(['@', '/', '-', '_', '.'])
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn has_any(tokens: &[String], candidates: &[&str]) -> bool {
    tokens.iter().any(|t| candidates.contains(&t.as_str()))
}

/// Whether a package name follows platform-package naming conventions.
#[must_use]
pub fn is_platform_package_name(name: &str) -> bool {
    let tokens = name_tokens(name);
    has_any(&tokens, &OS_TOKENS) && (has_any(&tokens, &ARCH_TOKENS) || has_any(&tokens, &LIBC_TOKENS))
}

/// Whether a manifest is tied to particular platforms: it declares
/// `os`/`cpu`/`libc` restrictions, or one of its optional dependencies is a
/// platform package.
#[must_use]
pub fn is_platform_specific(manifest: &VersionManifest) -> bool {
    !manifest.os.is_empty()
        || !manifest.cpu.is_empty()
        || !manifest.libc.is_empty()
        || manifest
            .optional_dependencies
            .keys()
            .any(|name| is_platform_package_name(name))
}

/// Whether a platform package name targets `platform`.
///
/// The OS token must match; an arch token, when the name has one, must match;
/// a libc token, when both sides carry one, must match.
#[must_use]
pub fn name_matches_platform(name: &str, platform: &Platform) -> bool {
    let tokens = name_tokens(name);
    if !has_any(&tokens, platform.os_aliases()) {
        return false;
    }
    if has_any(&tokens, &ARCH_TOKENS) && !has_any(&tokens, platform.arch_aliases()) {
        return false;
    }
    let wants_libc = platform.libc_aliases();
    if !wants_libc.is_empty() && has_any(&tokens, &LIBC_TOKENS) && !has_any(&tokens, wants_libc) {
        return false;
    }
    true
}

/// Optional dependencies of `manifest` that are prebuilt binaries for any of
/// `platforms`, as `(name, range)` pairs.
#[must_use]
pub fn platform_binaries(manifest: &VersionManifest, platforms: &[Platform]) -> Vec<(String, String)> {
    manifest
        .optional_dependencies
        .iter()
        .filter(|(name, _)| is_platform_package_name(name))
        .filter(|(name, _)| platforms.iter().any(|p| name_matches_platform(name, p)))
        .map(|(name, range)| (name.clone(), range.clone()))
        .collect()
}
