//! Typed, trimmed projection of registry metadata.
//!
//! Registry packuments carry readmes, scripts, maintainers and much more for
//! every version. Only the fields needed for graph expansion and platform
//! detection are kept, which bounds memory when thousands of packuments are
//! held during one run. Unknown fields are dropped at parse time.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Dependency name -> range.
pub type DependencyMap = BTreeMap<String, String>;

/// The parts of one version's manifest the engine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_map")]
    pub dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_map")]
    pub dev_dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_map")]
    pub peer_dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_map")]
    pub optional_dependencies: DependencyMap,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub cpu: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub libc: Vec<String>,
}

impl VersionManifest {
    /// Project a full registry manifest down to the retained fields.
    ///
    /// Malformed fields degrade to empty values instead of failing.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// All-versions metadata for one package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default, deserialize_with = "lenient_map")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_versions")]
    pub versions: BTreeMap<String, VersionManifest>,
}

impl Packument {
    /// `dist-tags.latest`, if present.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }

    #[must_use]
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    #[must_use]
    pub fn manifest(&self, version: &str) -> Option<&VersionManifest> {
        self.versions.get(version)
    }

    /// All version keys.
    pub fn version_keys(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// Condensed view for callers that only need tags and version keys.
    #[must_use]
    pub fn summary(&self) -> PackumentSummary {
        PackumentSummary {
            name: self.name.clone(),
            latest: self.latest().map(String::from),
            versions: self.versions.keys().cloned().collect(),
        }
    }
}

/// Already-refreshed metadata for a package, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackumentSummary {
    pub name: String,
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Accepts an object of strings; non-string values are skipped and any other
/// shape (array, null, string) becomes empty.
fn lenient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(obj) => obj
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Accepts a string or an array of strings.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// One malformed version entry must not poison the whole packument.
fn lenient_versions<'de, D>(deserializer: D) -> Result<BTreeMap<String, VersionManifest>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(obj) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(obj
        .into_iter()
        .filter_map(|(version, manifest)| {
            if !manifest.is_object() {
                return None;
            }
            let mut parsed: VersionManifest = serde_json::from_value(manifest).ok()?;
            if parsed.version.is_empty() {
                parsed.version.clone_from(&version);
            }
            Some((version, parsed))
        })
        .collect())
}
