//! Package references and request specs

use crate::version::{Version, VersionSpec};
use portforge_errors::VersionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Package identifier (name + resolved version)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: Version,
}

impl PackageId {
    /// Create new package ID
    #[must_use]
    pub fn new(name: String, version: Version) -> Self {
        Self { name, version }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A user request: package name plus an optional version constraint
///
/// Parsed from `name`, `name==1.2`, `name>=1.0,<2.0`, etc.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub spec: VersionSpec,
}

impl PackageSpec {
    /// A spec accepting any version of `name`
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: VersionSpec::any(),
        }
    }

    /// Check whether a version satisfies this request
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.spec.matches(version)
    }

    /// Parse `name`, `name OP version`, or `name OP v1,OP v2`
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name or a malformed constraint.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        // the operator starts at the first character that cannot be
        // part of a package name
        let op_start = s.find(|c: char| matches!(c, '=' | '!' | '<' | '>' | '~'));

        let (name, rest) = match op_start {
            Some(idx) => s.split_at(idx),
            None => (s, ""),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(VersionError::InvalidSpec {
                input: s.to_string(),
            });
        }

        let spec = if rest.is_empty() {
            VersionSpec::any()
        } else {
            VersionSpec::from_str(rest)?
        };

        Ok(Self {
            name: name.to_string(),
            spec,
        })
    }

}

impl FromStr for PackageSpec {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spec.is_any() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.spec)
        }
    }
}
