//! Package request parsing.
//!
//! Parses the `install` arguments:
//! - `lodash`
//! - `lodash@4.17.21`
//! - `lodash@^4.0.0`
//! - `@types/node`
//! - `@types/node@^20`

use super::error::PkgError;
use std::fmt;

/// Tag used when a request carries no constraint.
pub const LATEST_TAG: &str = "latest";

/// A requested package: name plus optional version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Scope without the @ prefix, if scoped.
    pub scope: Option<String>,
    /// Version range or tag (None means latest).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Build a spec from an already split name and constraint.
    ///
    /// An empty constraint or the `latest` tag is stored as `None`.
    pub fn new(name: &str, range: &str) -> Result<Self, PkgError> {
        let mut spec = Self::parse(name)?;
        if spec.range.is_some() {
            return Err(PkgError::spec_invalid(format!(
                "Package name must not carry a version: '{name}'"
            )));
        }
        spec.range = normalize_range(range);
        Ok(spec)
    }

    /// Parse a `name[@constraint]` token.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        // The version delimiter is the first '@' after the leading scope marker.
        let search_from = usize::from(input.starts_with('@'));
        let (name, range) = match input[search_from..].find('@') {
            Some(pos) => {
                let at = pos + search_from;
                let range = &input[at + 1..];
                if range.is_empty() {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid package spec: empty version range in '{input}'"
                    )));
                }
                (&input[..at], Some(range))
            }
            None => (input, None),
        };

        let scope = Self::validate_name(name, input)?;

        Ok(Self {
            name: name.to_string(),
            scope,
            range: range.and_then(normalize_range),
        })
    }

    /// Validate a package name and return its scope, if any.
    fn validate_name(name: &str, input: &str) -> Result<Option<String>, PkgError> {
        let (scope, bare) = if let Some(scoped) = name.strip_prefix('@') {
            let Some((scope, bare)) = scoped.split_once('/') else {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: missing '/' in '{input}'"
                )));
            };
            if scope.is_empty() {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: empty scope in '{input}'"
                )));
            }
            (Some(scope), bare)
        } else {
            (None, name)
        };

        if bare.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid package spec: empty name in '{input}'"
            )));
        }

        for part in scope.into_iter().chain(std::iter::once(bare)) {
            if part.starts_with('.') {
                return Err(PkgError::spec_invalid(format!(
                    "Package name must not start with '.': '{name}'"
                )));
            }
            for c in part.chars() {
                if !c.is_alphanumeric() && c != '-' && c != '_' && c != '.' {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid character '{c}' in package name '{name}'"
                    )));
                }
            }
        }

        Ok(scope.map(str::to_string))
    }

    /// Constraint as requested, `latest` when none was given.
    #[must_use]
    pub fn constraint(&self) -> &str {
        self.range.as_deref().unwrap_or(LATEST_TAG)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.constraint())
    }
}

/// Strip the `@scope/` prefix from a package name.
#[must_use]
pub fn unscoped_name(name: &str) -> &str {
    match name.strip_prefix('@').and_then(|s| s.split_once('/')) {
        Some((_, bare)) => bare,
        None => name,
    }
}

/// URL-encode a package name for registry requests.
///
/// For scoped packages, encodes the `/` as `%2F`.
#[must_use]
pub fn url_encoded_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

fn normalize_range(range: &str) -> Option<String> {
    let range = range.trim();
    if range.is_empty() || range == LATEST_TAG {
        None
    } else {
        Some(range.to_string())
    }
}
