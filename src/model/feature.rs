use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::version::{Version, VersionConstraint};
use crate::error::FeatureError;

/// Concrete feature identity: `name/version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId {
    pub name: String,
    pub version: Version,
}

impl FeatureId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Version::new(version),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl FromStr for FeatureId {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(FeatureId::new(name, version))
            }
            _ => Err(FeatureError::not_found(format!(
                "Invalid feature id '{}'. Expected 'name/version'.",
                s
            ))),
        }
    }
}

/// Reference to a feature: `name`, `name/version` or `name/[range]`.
///
/// Used both for client requests and for dependencies declared in descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureRef {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl FeatureRef {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::Any,
        }
    }

    pub fn exact(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::Exact(Version::new(version)),
        }
    }

    pub fn matches(&self, id: &FeatureId) -> bool {
        self.name == id.name && self.constraint.satisfied_by(&id.version)
    }
}

impl FromStr for FeatureRef {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, version) = match s.split_once('/') {
            Some((name, version)) => (name, version),
            None => (s, ""),
        };
        if name.is_empty() {
            return Err(FeatureError::not_found(format!(
                "Invalid feature reference '{}'. Expected 'name' or 'name/version'.",
                s
            )));
        }
        Ok(Self {
            name: name.to_string(),
            constraint: version.parse()?,
        })
    }
}

impl TryFrom<String> for FeatureRef {
    type Error = FeatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeatureRef> for String {
    fn from(value: FeatureRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_any() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.name, self.constraint)
        }
    }
}

/// Location of a module the runtime can install and start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleRef(pub String);

impl ModuleRef {
    pub fn new(location: impl Into<String>) -> Self {
        ModuleRef(location.into())
    }

    pub fn location(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-disk file backing a configuration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// File name relative to the configuration directory (e.g. "jetty.xml")
    pub name: String,
    #[serde(default)]
    pub contents: String,
    /// Replace the file even if it already exists
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

/// Configuration artifact materialized when a feature is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigArtifact {
    pub pid: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<ConfigFile>,
}

/// A feature definition, as parsed from a repository descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub dependencies: Vec<FeatureRef>,
    #[serde(default)]
    pub configs: Vec<ConfigArtifact>,
    /// Installed automatically when its repository is added with install, or at boot
    #[serde(default)]
    pub boot: bool,
}

impl Feature {
    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn version(&self) -> &Version {
        &self.id.version
    }
}
