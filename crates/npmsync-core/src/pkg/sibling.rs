//! Sibling version completion.
//!
//! For each cached `X.Y.Z`, proposes the newest stable patch of `X.Y` and the
//! newest stable minor of `X`, so a mirror stays patch/minor current without
//! jumping majors.

use semver::Version;
use std::collections::BTreeSet;

/// Versions worth adding next to `cached`, drawn from `available`.
///
/// Never returns a cached version or a prerelease. Unparsable strings on
/// either side are ignored. Prerelease cached versions still seed the search.
#[must_use]
pub fn complete<'a, C, A>(cached: C, available: A) -> BTreeSet<String>
where
    C: IntoIterator<Item = &'a String>,
    A: IntoIterator<Item = &'a str>,
{
    let cached: BTreeSet<&String> = cached.into_iter().collect();
    let stable: Vec<(Version, &str)> = available
        .into_iter()
        .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
        .filter(|(parsed, _)| parsed.pre.is_empty())
        .collect();

    let mut result = BTreeSet::new();
    for seed in cached.iter().filter_map(|v| Version::parse(v).ok()) {
        let same_minor = highest(&stable, |v| v.major == seed.major && v.minor == seed.minor);
        let same_major = highest(&stable, |v| v.major == seed.major);
        for candidate in [same_minor, same_major].into_iter().flatten() {
            if !cached.contains(&candidate) {
                result.insert(candidate);
            }
        }
    }
    result
}

fn highest(stable: &[(Version, &str)], matches: impl Fn(&Version) -> bool) -> Option<String> {
    stable
        .iter()
        .filter(|(parsed, _)| matches(parsed))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| (*raw).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(versions: &[&str]) -> BTreeSet<String> {
        versions.iter().map(|v| (*v).to_string()).collect()
    }

    fn run(cached: &[&str], available: &[&str]) -> BTreeSet<String> {
        let cached = set(cached);
        complete(&cached, available.iter().copied())
    }

    #[test]
    fn test_patch_and_minor_series() {
        let result = run(
            &["1.2.0", "1.3.0"],
            &["1.2.0", "1.2.1", "1.2.2", "1.3.0", "1.3.1", "1.4.0", "2.0.0"],
        );
        assert_eq!(result, set(&["1.2.2", "1.3.1", "1.4.0"]));
    }

    #[test]
    fn test_excludes_cached_versions() {
        let result = run(&["1.2.0", "1.2.2", "1.4.0"], &["1.2.0", "1.2.1", "1.2.2", "1.4.0"]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_never_proposes_prereleases() {
        let result = run(&["1.0.0"], &["1.0.0", "1.0.1-beta.1", "1.1.0-rc.1", "1.0.1"]);
        assert_eq!(result, set(&["1.0.1"]));
    }

    #[test]
    fn test_prerelease_seed_still_searches() {
        let result = run(&["2.0.0-beta.3"], &["2.0.0-beta.3", "2.0.0", "2.0.1", "2.1.0"]);
        assert_eq!(result, set(&["2.0.1", "2.1.0"]));
    }

    #[test]
    fn test_ignores_unparsable() {
        let result = run(&["latest", "1.0.0"], &["garbage", "1.0.5"]);
        assert_eq!(result, set(&["1.0.5"]));
    }

    #[test]
    fn test_zero_major_minor_series() {
        let result = run(&["0.2.1"], &["0.2.1", "0.2.3", "0.3.0", "1.0.0"]);
        assert_eq!(result, set(&["0.2.3", "0.3.0"]));
    }
}
