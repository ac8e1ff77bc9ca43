//! Version resolution using semver.
//!
//! npm ranges are a superset of what the `semver` crate parses, so each range
//! is normalized first:
//! - `||` alternatives (`^1.0.0 || ^2.0.0`)
//! - hyphen ranges (`1.0.0 - 2.0.0`, `1.2 - 2`)
//! - x-ranges and partial versions (`1.x`, `1.2.*`, `1`, `*`, empty)
//! - space-separated comparators (`>= 2.1.2 < 3.0.0`)
//! - bare full versions (`1.2.3` means exactly `=1.2.3`, not a caret range)
//! - a leading `v` on versions (`v1.2.3`, `>=v2`)

use super::error::SyncError;
use super::packument::Packument;
use semver::{Version, VersionReq};

/// A parsed npm range: satisfied when any alternative matches.
#[derive(Debug, Clone)]
pub struct NpmRange {
    alternatives: Vec<VersionReq>,
}

impl NpmRange {
    /// Parse an npm range.
    ///
    /// Invalid alternatives inside an `||` range are skipped as long as at
    /// least one alternative parses.
    ///
    /// # Errors
    /// Returns an error if no alternative is a valid range.
    pub fn parse(range: &str) -> Result<Self, SyncError> {
        let mut alternatives = Vec::new();
        let mut last_error = None;

        for alt in range.split("||") {
            match parse_alternative(alt) {
                Ok(req) => alternatives.push(req),
                Err(e) => last_error = Some(e),
            }
        }

        if alternatives.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                SyncError::range_invalid(format!("Invalid version range '{range}'"))
            }));
        }
        Ok(Self { alternatives })
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Highest version string in `versions` that satisfies this range.
    ///
    /// Unparsable version strings are ignored.
    pub fn max_satisfying<'a>(&self, versions: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        versions
            .into_iter()
            .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| self.matches(parsed))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v)
    }
}

/// Resolve a version range, dist-tag or exact version against a packument.
///
/// # Rules
/// - a known version key is returned as is, provided it is valid semver
/// - a known dist-tag returns the tagged version (when that version exists
///   and is valid semver)
/// - an empty range uses `dist-tags.latest`, falling back to `*`
/// - otherwise the highest version satisfying the semver range wins
///
/// # Errors
/// Returns an error if the range is invalid or nothing satisfies it.
pub fn resolve_version(packument: &Packument, range: &str) -> Result<String, SyncError> {
    let range = range.trim();
    let name = packument.name.as_str();

    if packument.has_version(range) && Version::parse(range).is_ok() {
        return Ok(range.to_string());
    }

    let tag = if range.is_empty() { "latest" } else { range };
    if let Some(tagged) = packument.dist_tags.get(tag) {
        if packument.has_version(tagged) && Version::parse(tagged).is_ok() {
            return Ok(tagged.clone());
        }
        return Err(SyncError::version_unresolved(
            name,
            &format!("{tag} (tagged {tagged}, which is not published)"),
        ));
    }

    let parsed = NpmRange::parse(range)?;
    parsed
        .max_satisfying(packument.version_keys())
        .map(String::from)
        .ok_or_else(|| SyncError::version_unresolved(name, range))
}

/// Check whether a concrete version satisfies an npm range.
///
/// Invalid ranges and versions never satisfy.
#[must_use]
pub fn version_satisfies(range: &str, version: &str) -> bool {
    if range.trim() == version {
        return true;
    }
    let (Ok(parsed_range), Ok(parsed_version)) = (NpmRange::parse(range), Version::parse(version))
    else {
        return false;
    };
    parsed_range.matches(&parsed_version)
}

/// Check whether any of `versions` satisfies `range`.
///
/// Dist-tags are not ranges, so a tag is never considered satisfied.
pub fn satisfied_by_any<'a>(range: &str, versions: impl IntoIterator<Item = &'a String>) -> bool {
    let range = range.trim();
    let Ok(parsed) = NpmRange::parse(range) else {
        return false;
    };
    versions.into_iter().any(|v| {
        v == range || Version::parse(v).is_ok_and(|parsed_version| parsed.matches(&parsed_version))
    })
}

/// Normalize one `||` alternative and parse it.
fn parse_alternative(alt: &str) -> Result<VersionReq, SyncError> {
    let alt = alt.trim();
    let invalid = |e: &dyn std::fmt::Display| {
        SyncError::range_invalid(format!("Invalid version range '{alt}': {e}"))
    };

    let comparators = if let Some((start, end)) = alt.split_once(" - ") {
        hyphen_comparators(start.trim(), end.trim()).ok_or_else(|| invalid(&"bad hyphen range"))?
    } else {
        let mut out = Vec::new();
        for token in comparator_tokens(alt) {
            out.extend(normalize_comparator(&token).ok_or_else(|| invalid(&token))?);
        }
        out
    };

    let joined = if comparators.is_empty() {
        ">=0.0.0".to_string()
    } else {
        comparators.join(", ")
    };
    VersionReq::parse(&joined).map_err(|e| invalid(&e))
}

/// Split `>= 2.1.2 <3` into `[">=2.1.2", "<3"]`, gluing lone operators to
/// the version that follows them.
fn comparator_tokens(range: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending_op = String::new();

    for word in range.split_whitespace() {
        if word.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(word);
            continue;
        }
        tokens.push(format!("{pending_op}{word}"));
        pending_op.clear();
    }
    if !pending_op.is_empty() {
        tokens.push(pending_op);
    }
    tokens
}

/// Partial version: numeric parts present, trailing wildcards dropped.
struct Partial {
    parts: Vec<u64>,
    /// Prerelease/build suffix on a full version (`-beta.1`).
    suffix: String,
}

impl Partial {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_start_matches(['v', 'V']).trim_start_matches('=');
        if text.is_empty() || matches!(text, "*" | "x" | "X") {
            return Some(Self {
                parts: Vec::new(),
                suffix: String::new(),
            });
        }

        let (core, suffix) = match text.find(['-', '+']) {
            Some(i) => (&text[..i], &text[i..]),
            None => (text, ""),
        };

        let mut parts = Vec::new();
        for piece in core.split('.') {
            if matches!(piece, "*" | "x" | "X") {
                break;
            }
            parts.push(piece.parse::<u64>().ok()?);
        }
        if parts.len() > 3 || (!suffix.is_empty() && parts.len() < 3) {
            return None;
        }
        Some(Self {
            parts,
            suffix: suffix.to_string(),
        })
    }

    fn is_full(&self) -> bool {
        self.parts.len() == 3
    }

    /// The text form `semver` understands (`1`, `1.2`, `1.2.3-beta`).
    fn text(&self) -> String {
        let mut s = self
            .parts
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        s.push_str(&self.suffix);
        s
    }

    /// Lower bound `>=X.Y.Z` filling missing parts with 0.
    fn floor(&self) -> String {
        let mut parts = self.parts.clone();
        parts.resize(3, 0);
        format!(">={}.{}.{}{}", parts[0], parts[1], parts[2], self.suffix)
    }

    /// Exclusive upper bound of the x-range this partial denotes.
    ///
    /// `None` for full or empty partials and when the bump overflows.
    fn ceiling(&self) -> Option<String> {
        match self.parts.as_slice() {
            [major] => major.checked_add(1).map(|next| format!("<{next}.0.0")),
            [major, minor] => minor.checked_add(1).map(|next| format!("<{major}.{next}.0")),
            _ => None,
        }
    }
}

/// Convert one comparator token; `None` when it is not a valid comparator.
fn normalize_comparator(token: &str) -> Option<Vec<String>> {
    let op_len = token
        .char_indices()
        .find(|(_, c)| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .map_or(token.len(), |(i, _)| i);
    let (op, rest) = token.split_at(op_len);
    let partial = Partial::parse(rest)?;

    if partial.parts.is_empty() {
        return Some(match op {
            "<" => vec!["<0.0.0-0".to_string()],
            _ => Vec::new(),
        });
    }

    let converted = match op {
        "" | "=" => {
            if partial.is_full() {
                vec![format!("={}", partial.text())]
            } else {
                vec![partial.floor(), partial.ceiling()?]
            }
        }
        "^" | "~" | ">" | ">=" | "<" | "<=" => vec![format!("{op}{}", partial.text())],
        "~>" => vec![format!("~{}", partial.text())],
        _ => return None,
    };
    Some(converted)
}

/// `A - B`: inclusive on both ends, partial upper bounds widen to their x-range.
fn hyphen_comparators(start: &str, end: &str) -> Option<Vec<String>> {
    let low = Partial::parse(start)?;
    let high = Partial::parse(end)?;
    let mut out = Vec::new();
    if !low.parts.is_empty() {
        out.push(low.floor());
    }
    if high.is_full() {
        out.push(format!("<={}", high.text()));
    } else if !high.parts.is_empty() {
        out.push(high.ceiling()?);
    }
    Some(out)
}
