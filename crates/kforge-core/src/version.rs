//! Semantic version parsing and constraint evaluation.
//!
//! Wraps `semver::Version`/`semver::VersionReq` rather than reimplementing
//! SemVer parsing. `semver::VersionReq` only expresses an AND-of-comparators
//! range; it has no `||` union operator, so [`VersionConstraint`] splits on
//! `||` and treats the constraint as satisfied if any side matches.

use std::fmt;
use std::str::FromStr;

use semver::VersionReq;

pub use semver::Version;

/// A parsed, evaluable constraint expression, e.g. `^1.2.3`, `>=2.0 <3.0`,
/// or a union like `^1.0.0 || ^2.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionConstraint {
    /// Parses a constraint string. Alternatives separated by `||` are
    /// parsed independently; the constraint matches a version if any
    /// alternative's `VersionReq` matches it.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(crate::error::Error::InvalidConstraint(raw.to_string()));
        }
        let mut alternatives = Vec::new();
        for part in trimmed.split("||") {
            let part = part.trim();
            if part.is_empty() {
                return Err(crate::error::Error::InvalidConstraint(raw.to_string()));
            }
            let req = VersionReq::parse(part)
                .map_err(|_| crate::error::Error::InvalidConstraint(raw.to_string()))?;
            alternatives.push(req);
        }
        Ok(Self {
            raw: trimmed.to_string(),
            alternatives,
        })
    }

    /// True if `version` satisfies any alternative in this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for VersionConstraint {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        VersionConstraint::parse(s)
    }
}

/// Parses a SemVer version string, wrapping parse failures in the
/// crate's error type rather than exposing `semver::Error` directly.
pub fn parse_version(raw: &str) -> crate::error::Result<Version> {
    Version::parse(raw).map_err(|_| crate::error::Error::InvalidVersion(raw.to_string()))
}

/// Returns the maximum version in `versions` by SemVer ordering, if any.
pub fn highest_version<'a, I>(versions: I) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions.into_iter().max()
}
