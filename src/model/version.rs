//! Version ordering and dependency constraints.
//!
//! Feature versions are free-form strings. They are ordered segment by segment:
//! numeric segments compare numerically, anything else compares lexically.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::FeatureError;

/// A feature version with a deterministic total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(raw: impl Into<String>) -> Self {
        Version(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if two version strings match.
    ///
    /// Handles the 'v' prefix flexibly (e.g., "v1.0.0" matches "1.0.0").
    pub fn matches(&self, other: &str) -> bool {
        let n1 = self.0.strip_prefix('v').unwrap_or(&self.0);
        let n2 = other.strip_prefix('v').unwrap_or(other);
        n1 == n2
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        let trimmed = self.0.strip_prefix('v').unwrap_or(&self.0);
        trimmed.split(['.', '-', '_']).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::new(s)
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.segments();
        let mut right = other.segments();
        loop {
            match (left.next(), right.next()) {
                (Some(a), Some(b)) => match compare_segment(a, b) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                // Keep Ord consistent with Eq for strings like "1.0" vs "v1.0"
                (None, None) => return self.0.cmp(&other.0),
            }
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// Version constraint attached to a feature dependency.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Any version; the highest available is preferred.
    #[default]
    Any,
    /// Exactly this version (modulo a leading 'v').
    Exact(Version),
    /// OSGi-style interval, e.g. `[1.0,2.0)`.
    Range {
        min: Option<Bound>,
        max: Option<Bound>,
    },
}

impl VersionConstraint {
    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }

    pub fn satisfied_by(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => v.matches(version.as_str()),
            VersionConstraint::Range { min, max } => {
                let above = min.as_ref().is_none_or(|b| match version.cmp(&b.version) {
                    Ordering::Greater => true,
                    Ordering::Equal => b.inclusive,
                    Ordering::Less => false,
                });
                let below = max.as_ref().is_none_or(|b| match version.cmp(&b.version) {
                    Ordering::Less => true,
                    Ordering::Equal => b.inclusive,
                    Ordering::Greater => false,
                });
                above && below
            }
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "0.0.0" {
            return Ok(VersionConstraint::Any);
        }

        let starts = s.starts_with('[') || s.starts_with('(');
        let ends = s.ends_with(']') || s.ends_with(')');
        if !starts && !ends {
            return Ok(VersionConstraint::Exact(Version::new(s)));
        }
        if !(starts && ends) || s.len() < 3 {
            return Err(FeatureError::Parse {
                locator: s.to_string(),
                message: "unbalanced version range".to_string(),
            });
        }

        let inner = &s[1..s.len() - 1];
        let (lo, hi) = inner.split_once(',').ok_or_else(|| FeatureError::Parse {
            locator: s.to_string(),
            message: "version range needs a ',' separator".to_string(),
        })?;
        let bound = |raw: &str, inclusive: bool| {
            let raw = raw.trim();
            (!raw.is_empty()).then(|| Bound {
                version: Version::new(raw),
                inclusive,
            })
        };

        Ok(VersionConstraint::Range {
            min: bound(lo, s.starts_with('[')),
            max: bound(hi, s.ends_with(']')),
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => f.write_str("0.0.0"),
            VersionConstraint::Exact(v) => write!(f, "{}", v),
            VersionConstraint::Range { min, max } => {
                let (open, lo) = match min {
                    Some(b) => (if b.inclusive { '[' } else { '(' }, b.version.as_str()),
                    None => ('(', ""),
                };
                let (close, hi) = match max {
                    Some(b) => (if b.inclusive { ']' } else { ')' }, b.version.as_str()),
                    None => (')', ""),
                };
                write!(f, "{}{},{}{}", open, lo, hi, close)
            }
        }
    }
}
