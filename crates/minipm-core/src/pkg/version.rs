//! Version resolution using semver.
//!
//! Each dependency edge is resolved on its own: the highest published version
//! satisfying the edge's constraint wins. There is no global constraint solving
//! across the graph; conflicts between edges are handled by the install planner's
//! single-version-per-name policy.

use super::cache::MetadataCache;
use super::error::PkgError;
use super::registry::Registry;
use super::spec::LATEST_TAG;
use semver::{Version, VersionReq};
use std::fmt;

/// A concrete version chosen for a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub name: String,
    pub version: Version,
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// A dist-tag such as `latest` or `next`, resolved by the registry.
    Tag(String),
    /// An exact version; only that version satisfies it.
    Exact(Version),
    /// One or more alternatives (`||`); a version matching any of them satisfies.
    Range(Vec<VersionReq>),
}

impl Constraint {
    /// Parse an npm-style constraint.
    ///
    /// # Rules
    /// - empty or `latest` is the `latest` tag
    /// - `1.2.3`, `=1.2.3` and `v1.2.3` are exact versions
    /// - semver ranges, x-ranges, hyphen ranges and `||` alternatives are ranges
    /// - anything else that looks like a tag name is a tag
    ///
    /// # Errors
    /// Returns an error if the input is neither a range nor a tag name.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() || input == LATEST_TAG {
            return Ok(Self::Tag(LATEST_TAG.to_string()));
        }

        if let Some(exact) = parse_exact(input) {
            return Ok(Self::Exact(exact));
        }

        match parse_alternatives(input) {
            Ok(reqs) => Ok(Self::Range(reqs)),
            Err(_) if is_tag_name(input) => Ok(Self::Tag(input.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Whether `version` satisfies this constraint.
    ///
    /// Tags cannot be checked locally and never match.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Tag(_) => false,
            Self::Exact(exact) => exact == version,
            Self::Range(reqs) => reqs.iter().any(|req| req.matches(version)),
        }
    }
}

/// Pick the highest version in `versions` that satisfies `constraint`.
///
/// Unparsable version strings are ignored.
pub fn max_satisfying<'a, I>(versions: I, constraint: &Constraint) -> Option<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| constraint.matches(v))
        .max()
}

/// Resolve `name@range` to a concrete version.
///
/// Tags are answered by the registry's `{name}/{tag}` document. Exact versions
/// and ranges are matched against every version listed by `{name}/latest`.
///
/// # Errors
/// Returns `PKG_UNSATISFIABLE` if no published version matches, or a registry
/// error if the metadata cannot be fetched.
pub async fn resolve_version<R: Registry>(
    registry: &R,
    cache: &mut MetadataCache,
    name: &str,
    range: &str,
) -> Result<ResolvedVersion, PkgError> {
    let constraint = Constraint::parse(range)?;

    let version = if let Constraint::Tag(tag) = &constraint {
        let meta = cache.get(registry, name, tag).await?;
        Version::parse(meta.version.trim()).map_err(|e| {
            PkgError::registry(format!(
                "Registry returned invalid version '{}' for {name}@{tag}: {e}",
                meta.version
            ))
        })?
    } else {
        let doc = cache.versions(registry, name).await?;
        let listed = doc.version_keys().unwrap_or_default();
        max_satisfying(listed, &constraint)
            .ok_or_else(|| PkgError::unsatisfiable(name, range.trim()))?
    };

    Ok(ResolvedVersion {
        name: name.to_string(),
        version,
    })
}

fn parse_exact(input: &str) -> Option<Version> {
    let bare = input
        .strip_prefix('=')
        .or_else(|| input.strip_prefix('v'))
        .unwrap_or(input)
        .trim();
    Version::parse(bare).ok()
}

/// Dist-tag names: start with a letter, then letters, digits, `-`, `_` or `.`.
fn is_tag_name(input: &str) -> bool {
    let mut chars = input.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Parse a range that may contain `||` alternatives.
fn parse_alternatives(range: &str) -> Result<Vec<VersionReq>, PkgError> {
    if !range.contains("||") {
        return Ok(vec![parse_range(range)?]);
    }

    let mut reqs = Vec::new();
    for alt in range.split("||").map(str::trim) {
        if alt.is_empty() {
            continue;
        }
        // Skip invalid alternatives, try others
        if let Ok(req) = parse_range(alt) {
            reqs.push(req);
        } else if let Some(exact) = parse_exact(alt) {
            reqs.push(exact_req(&exact)?);
        }
    }

    if reqs.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid version range '{range}': no valid alternatives"
        )));
    }

    Ok(reqs)
}

fn exact_req(version: &Version) -> Result<VersionReq, PkgError> {
    VersionReq::parse(&format!("={version}"))
        .map_err(|e| PkgError::spec_invalid(format!("Invalid version '{version}': {e}")))
}

/// Parse a single version range, handling npm-specific syntax.
///
/// Handles:
/// - Standard semver ranges: ^1.0.0, ~1.0.0, >=1.0.0, etc.
/// - Hyphen ranges: 1.0.0 - 2.0.0
/// - X-ranges and partial versions: 1.x, 1.0.x, 1, 1.2, *
/// - Space-separated comparators: >= 2.1.2 < 3.0.0
fn parse_range(range: &str) -> Result<VersionReq, PkgError> {
    let range = range.trim();
    let invalid = |e: semver::Error| {
        PkgError::spec_invalid(format!("Invalid version range '{range}': {e}"))
    };

    // Exact versions inside alternatives keep npm's meaning, not semver's caret.
    if let Ok(exact) = Version::parse(range) {
        return exact_req(&exact);
    }

    // "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = range.split_once(" - ") {
        let (start, end) = (start.trim(), end.trim());
        if !start.is_empty() && !end.is_empty() {
            return VersionReq::parse(&format!(">={start}, <={end}")).map_err(invalid);
        }
    }

    // "1" and "1.2" mean "1.x" and "1.2.x" in npm, not a caret range.
    if is_partial_version(range) {
        return VersionReq::parse(&convert_x_range(&format!("{range}.x"))).map_err(invalid);
    }

    if has_wildcard_component(range) {
        let converted = convert_x_range(range);
        return VersionReq::parse(&convert_space_separated_comparators(&converted))
            .map_err(invalid);
    }

    VersionReq::parse(&convert_space_separated_comparators(range)).map_err(invalid)
}

fn is_partial_version(range: &str) -> bool {
    let parts: Vec<&str> = range.split('.').collect();
    parts.len() < 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Convert space-separated comparators to comma-separated.
///
/// npm allows: ">= 2.1.2 < 3.0.0" which means ">=2.1.2 AND <3.0.0"
/// Rust semver requires: ">=2.1.2, <3.0.0"
fn convert_space_separated_comparators(range: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        if token.chars().any(|c| c.is_ascii_digit()) {
            comparators.push(format!("{pending_op}{token}"));
            pending_op.clear();
        } else {
            // Operator without version, keep accumulating
            pending_op.push_str(token);
        }
    }

    if !pending_op.is_empty() {
        comparators.push(pending_op);
    }

    if comparators.is_empty() {
        return range.to_string();
    }

    // Tokens already carrying a trailing comma stay valid after the join.
    comparators
        .iter()
        .map(|c| c.trim_end_matches(','))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert x-range to semver range.
fn convert_x_range(range: &str) -> String {
    let range = range.trim();

    if range == "*" || range == "x" || range == "X" {
        return ">=0.0.0".to_string();
    }

    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X" | "*"] | [major, "x" | "X" | "*", "x" | "X" | "*"] => {
            // "1.x" -> ">=1.0.0, <2.0.0"
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            // "1.2.x" -> ">=1.2.0, <1.3.0"
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    // Fallback: zero the wildcard components of each comparator
    range
        .split_whitespace()
        .map(zero_wildcards)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// The `major.minor.patch` part of a comparator, operators included.
/// Pre-release and build identifiers are cut off.
fn version_core(token: &str) -> &str {
    token.find(['-', '+']).map_or(token, |end| &token[..end])
}

/// True if a comparator has `x`, `X` or `*` as a whole version component.
fn has_wildcard_component(range: &str) -> bool {
    range.split_whitespace().any(|token| {
        let token = token
            .trim_end_matches(',')
            .trim_start_matches(['<', '>', '=', '^', '~', 'v']);
        version_core(token).split('.').any(is_wildcard)
    })
}

fn zero_wildcards(token: &str) -> String {
    let core = version_core(token);
    let rest = &token[core.len()..];
    let core = core
        .split('.')
        .map(|p| if is_wildcard(p) { "0" } else { p })
        .collect::<Vec<_>>()
        .join(".");
    format!("{core}{rest}")
}
