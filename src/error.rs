//! Error taxonomy for the provisioning engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Unable to fetch repository {locator}: {source}")]
    Fetch {
        locator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to parse repository {locator}: {message}")]
    Parse { locator: String, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Cyclic feature dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Version conflict for feature {name}: {}", versions.join(", "))]
    VersionConflict { name: String, versions: Vec<String> },

    #[error("{target} is in use by: {}", users.join(", "))]
    InUse { target: String, users: Vec<String> },

    #[error("Upgrade of {feature} failed and could not be rolled back: {reason}")]
    UpgradeFailed { feature: String, reason: String },

    #[error("Subject '{subject}' is not authorized to {operation}")]
    Authorization { subject: String, operation: String },

    #[error("Error activating module {module}: {source}")]
    Activation {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Feature {name} has multiple versions installed ({}), please specify one", versions.join(", "))]
    AmbiguousFeature { name: String, versions: Vec<String> },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<FeatureError>),

    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] anyhow::Error),
}

impl FeatureError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FeatureError::NotFound(what.into())
    }

    /// Collapse a list of per-item failures; a single failure is returned unwrapped.
    pub fn collect(mut failures: Vec<FeatureError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(FeatureError::Multiple(failures)),
        }
    }
}

pub type Result<T> = std::result::Result<T, FeatureError>;
