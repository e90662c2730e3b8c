//! Version representation and constraint parsing
//!
//! Versions are dot-separated component lists. Numeric components
//! compare as integers, non-numeric components compare
//! lexicographically, and a numeric component always orders before a
//! non-numeric one in the same position. Constraints:
//! - `==1.2.3` - exact version
//! - `!=1.5.0` - exclude version
//! - `>=1.2` / `>1.2` / `<=2.0` / `<2.0` - range bounds
//! - `~=1.2` - compatible release: same major component and >= 1.2
//! - Multiple constraints: `>=1.2,<2.0,!=1.5`

use portforge_errors::VersionError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One dot-separated version component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Number(u64),
    Text(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // numeric sorts before non-numeric in the same position
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A package version with component-wise ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    components: Vec<Component>,
    original: String,
}

impl Version {
    /// Parse a version string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::InvalidVersion {
                input: s.to_string(),
            });
        }

        let components = s
            .split('.')
            .map(|part| match part.parse::<u64>() {
                Ok(n) => Component::Number(n),
                Err(_) => Component::Text(part.to_string()),
            })
            .collect();

        Ok(Self {
            components,
            original: s.to_string(),
        })
    }

    /// The parsed components
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// The original string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // tuple semantics: compare element-wise, shorter prefix sorts first
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A single version constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionConstraint {
    Exact(Version),
    NotEqual(Version),
    Less(Version),
    LessEqual(Version),
    Greater(Version),
    GreaterEqual(Version),
    Compatible(Version),
}

impl VersionConstraint {
    /// Check if a version satisfies this constraint
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => version == v,
            Self::NotEqual(v) => version != v,
            Self::Less(v) => version < v,
            Self::LessEqual(v) => version <= v,
            Self::Greater(v) => version > v,
            Self::GreaterEqual(v) => version >= v,
            // ~=X.Y keeps the major component and requires >= X.Y
            Self::Compatible(v) => {
                version >= v
                    && match (version.components().first(), v.components().first()) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
            }
        }
    }

    /// Parse a single constraint from a string
    fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();

        for (prefix, ctor) in [
            ("==", Self::Exact as fn(Version) -> Self),
            ("!=", Self::NotEqual),
            ("<=", Self::LessEqual),
            (">=", Self::GreaterEqual),
            ("~=", Self::Compatible),
        ] {
            if let Some(rest) = s.strip_prefix(prefix) {
                return Ok(ctor(Version::parse(rest)?));
            }
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Self::Less(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Self::Greater(Version::parse(rest)?));
        }

        Err(VersionError::InvalidConstraint {
            input: s.to_string(),
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "=={v}"),
            Self::NotEqual(v) => write!(f, "!={v}"),
            Self::Less(v) => write!(f, "<{v}"),
            Self::LessEqual(v) => write!(f, "<={v}"),
            Self::Greater(v) => write!(f, ">{v}"),
            Self::GreaterEqual(v) => write!(f, ">={v}"),
            Self::Compatible(v) => write!(f, "~={v}"),
        }
    }
}

/// A version specification holding zero or more constraints
///
/// All constraints must hold (conjunction). An empty spec matches any
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    constraints: Vec<VersionConstraint>,
}

impl VersionSpec {
    /// The spec that matches any version
    #[must_use]
    pub fn any() -> Self {
        Self {
            constraints: vec![],
        }
    }

    /// Create a spec from a single constraint
    #[must_use]
    pub fn single(constraint: VersionConstraint) -> Self {
        Self {
            constraints: vec![constraint],
        }
    }

    /// Create an exact spec
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self::single(VersionConstraint::Exact(version))
    }

    /// Check if a version satisfies all constraints
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(version))
    }

    /// Get the constraints
    #[must_use]
    pub fn constraints(&self) -> &[VersionConstraint] {
        &self.constraints
    }

    /// Check if this spec has no constraints
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Intersect with another spec (conjunction of constraint sets)
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut constraints = self.constraints.clone();
        for c in &other.constraints {
            if !constraints.contains(c) {
                constraints.push(c.clone());
            }
        }
        Self { constraints }
    }
}

impl FromStr for VersionSpec {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let constraints: Result<Vec<_>, _> = s
            .split(',')
            .map(|part| VersionConstraint::parse(part.trim()))
            .collect();

        Ok(Self {
            constraints: constraints?,
        })
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            write!(f, "*")
        } else {
            let strs: Vec<_> = self.constraints.iter().map(ToString::to_string).collect();
            write!(f, "{}", strs.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_component_ordering() {
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.4.19") > v("1.4.9"));
        assert!(v("2.0") > v("1.99.99"));
        // numeric sorts before text at the same position
        assert!(v("1.0") < v("1.rc1"));
        // shorter prefix sorts first
        assert!(v("1.2") < v("1.2.0"));
        assert_eq!(v("1.2.3"), v("1.2.3"));
    }

    #[test]
    fn test_exact_constraint() {
        let spec = VersionSpec::from_str("==1.2.3").unwrap();
        assert!(spec.matches(&v("1.2.3")));
        assert!(!spec.matches(&v("1.2.4")));
    }

    #[test]
    fn test_range_constraints() {
        let spec = VersionSpec::from_str(">=1.2,<2.0").unwrap();
        assert!(!spec.matches(&v("1.1.9")));
        assert!(spec.matches(&v("1.2")));
        assert!(spec.matches(&v("1.9.9")));
        assert!(!spec.matches(&v("2.0")));
    }

    #[test]
    fn test_compatible_constraint() {
        let spec = VersionSpec::from_str("~=1.2").unwrap();
        assert!(spec.matches(&v("1.2")));
        assert!(spec.matches(&v("1.2.9")));
        assert!(spec.matches(&v("1.3.0")));
        assert!(!spec.matches(&v("2.0.0")));
        assert!(!spec.matches(&v("1.1.9")));
    }

    #[test]
    fn test_not_equal_constraint() {
        let spec = VersionSpec::from_str(">=1.0,!=1.5,<2.0").unwrap();
        assert!(spec.matches(&v("1.4.9")));
        assert!(!spec.matches(&v("1.5")));
        assert!(spec.matches(&v("1.5.1")));
    }

    #[test]
    fn test_exact_spec_constructor() {
        let spec = VersionSpec::exact(v("1.2.3"));
        assert!(spec.matches(&v("1.2.3")));
        assert!(!spec.matches(&v("1.2.4")));
        assert_eq!(spec.to_string(), "==1.2.3");
    }

    #[test]
    fn test_any_version() {
        let spec = VersionSpec::from_str("*").unwrap();
        assert!(spec.is_any());
        assert!(spec.matches(&v("0.0.1")));
        assert!(spec.matches(&v("999.999")));
    }

    #[test]
    fn test_intersect() {
        let a = VersionSpec::from_str(">=1.2").unwrap();
        let b = VersionSpec::from_str("<2.0").unwrap();
        let both = a.intersect(&b);
        assert!(both.matches(&v("1.5")));
        assert!(!both.matches(&v("2.1")));
        assert_eq!(both.constraints().len(), 2);
    }
}
