//! Package spec parsing.
//!
//! Two inputs are handled here:
//! - user-facing specs like `react`, `react@^18.0.0`, `@types/node@20`
//! - dependency entries from a manifest (`"dep": "<range>"`), which may point
//!   outside the registry (`git+https://...`, `file:`, `workspace:`) or alias
//!   another package (`npm:real-name@^1`)

use super::error::SyncError;

/// A parsed package specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Version, range or tag (None means latest).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Parse `name`, `name@range`, `@scope/name` or `@scope/name@range`.
    ///
    /// # Errors
    /// Returns an error if the spec is empty or malformed.
    pub fn parse(input: &str) -> Result<Self, SyncError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SyncError::range_invalid("Empty package spec"));
        }

        // The version delimiter is the first '@' after the scope prefix.
        let search_from = usize::from(input.starts_with('@'));
        let (name, range) = match input[search_from..].find('@') {
            Some(pos) => {
                let at = pos + search_from;
                (&input[..at], Some(&input[at + 1..]))
            }
            None => (input, None),
        };

        validate_name(name)?;
        if range.is_some_and(str::is_empty) {
            return Err(SyncError::range_invalid(format!(
                "Invalid package spec: empty version range in '{input}'"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            range: range.map(String::from),
        })
    }

    /// The range to resolve, `latest` when none was given.
    #[must_use]
    pub fn range_or_latest(&self) -> &str {
        self.range.as_deref().unwrap_or("latest")
    }
}

/// Check that `name` is `pkg` or `@scope/pkg`.
///
/// Every segment must be usable as a single directory name: no leading
/// `.`, no `\`, `:` or control characters.
///
/// # Errors
/// Returns `SYNC_RANGE_INVALID` describing the first problem found.
pub fn validate_name(name: &str) -> Result<(), SyncError> {
    if name.is_empty() {
        return Err(SyncError::range_invalid("Empty package name"));
    }
    let segments: Vec<&str> = if let Some(rest) = name.strip_prefix('@') {
        match rest.split_once('/') {
            Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() && !pkg.contains('/') => {
                vec![scope, pkg]
            }
            _ => {
                return Err(SyncError::range_invalid(format!(
                    "Invalid scoped package name '{name}'"
                )))
            }
        }
    } else if name.contains('/') {
        return Err(SyncError::range_invalid(format!(
            "Invalid package name '{name}': only scoped names contain '/'"
        )));
    } else {
        vec![name]
    };
    if name.chars().any(char::is_whitespace) {
        return Err(SyncError::range_invalid(format!(
            "Invalid package name '{name}': contains whitespace"
        )));
    }
    for segment in segments {
        if segment.starts_with('.') {
            return Err(SyncError::range_invalid(format!(
                "Invalid package name '{name}': segment starts with '.'"
            )));
        }
        if segment.chars().any(|c| matches!(c, '\\' | ':') || c.is_control()) {
            return Err(SyncError::range_invalid(format!(
                "Invalid package name '{name}': forbidden character"
            )));
        }
    }
    Ok(())
}

/// What a dependency entry points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyTarget {
    /// Resolvable from the registry: `name` with `range` (range may be a tag).
    Registry { name: String, range: String },
    /// Git, URL, path, or workspace reference; nothing to fetch.
    External(String),
    /// The dependency name itself is unusable.
    InvalidName { name: String, reason: String },
}

/// Classify a dependency entry `dep_name: range`.
#[must_use]
pub fn classify_dependency(dep_name: &str, range: &str) -> DependencyTarget {
    let range = range.trim();

    if let Some(aliased) = range.strip_prefix("npm:") {
        return match PackageSpec::parse(aliased) {
            Ok(spec) => DependencyTarget::Registry {
                range: spec.range_or_latest().to_string(),
                name: spec.name,
            },
            Err(_) => DependencyTarget::External(range.to_string()),
        };
    }

    if is_external(range) {
        return DependencyTarget::External(range.to_string());
    }

    if let Err(e) = validate_name(dep_name) {
        return DependencyTarget::InvalidName {
            name: dep_name.to_string(),
            reason: e.message().to_string(),
        };
    }

    DependencyTarget::Registry {
        name: dep_name.to_string(),
        range: if range.is_empty() {
            "*".to_string()
        } else {
            range.to_string()
        },
    }
}

fn is_external(range: &str) -> bool {
    const PREFIXES: [&str; 10] = [
        "git+", "git:", "git@", "github:", "gitlab:", "bitbucket:", "http:", "https:", "file:",
        "link:",
    ];
    if PREFIXES.iter().any(|p| range.starts_with(p)) {
        return true;
    }
    if range.starts_with("workspace:") || range.starts_with("portal:") {
        return true;
    }
    // Local paths and GitHub `user/repo` shorthand.
    if range.starts_with('.') || range.starts_with('/') || (range.starts_with('~') && range.contains('/')) {
        return true;
    }
    range.contains('/') && !range.contains(' ')
}

/// `name@version` key used for dedup sets.
#[must_use]
pub fn package_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// For `@scope/name` returns `name`; unscoped names are returned as is.
#[must_use]
pub fn unscoped_name(name: &str) -> &str {
    if name.starts_with('@') {
        name.split_once('/').map_or(name, |(_, rest)| rest)
    } else {
        name
    }
}

/// URL-encode a package name for registry requests (`@scope%2Fname`).
#[must_use]
pub fn url_encoded_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}
