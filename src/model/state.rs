use serde::{Deserialize, Serialize};
use std::fmt;

use super::feature::Feature;

pub const DEFAULT_REGION: &str = "root";

/// Lifecycle state of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum FeatureState {
    #[default]
    Uninstalled,
    Installed,
    Resolved,
    Started,
}

impl FeatureState {
    pub fn is_installed(self) -> bool {
        self != FeatureState::Uninstalled
    }
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureState::Uninstalled => "Uninstalled",
            FeatureState::Installed => "Installed",
            FeatureState::Resolved => "Resolved",
            FeatureState::Started => "Started",
        };
        f.write_str(s)
    }
}

/// Something the config manager wrote for a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Materialized {
    /// `<etc>/<pid>.cfg`
    Pid(String),
    /// A backing file under the configuration directory
    File(String),
}

/// Tracking record for a feature the engine has touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledFeatureRecord {
    /// Definition used for the install; teardown relies on this, not on the catalog
    pub feature: Feature,
    pub state: FeatureState,
    /// Locator of the repository the feature was resolved from
    pub repository: Option<String>,
    pub region: String,
    /// Explicitly requested, as opposed to pulled in as a dependency
    pub required: bool,
    #[serde(default)]
    pub materialized: Vec<Materialized>,
}

impl InstalledFeatureRecord {
    pub fn new(feature: Feature, repository: Option<String>) -> Self {
        Self {
            feature,
            state: FeatureState::Uninstalled,
            repository,
            region: DEFAULT_REGION.to_string(),
            required: false,
            materialized: Vec::new(),
        }
    }
}
