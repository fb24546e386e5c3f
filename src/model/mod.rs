//! Domain model: repositories, features, versions and tracking records.

mod feature;
mod repository;
mod state;
mod version;

pub use feature::{ConfigArtifact, ConfigFile, Feature, FeatureId, FeatureRef, ModuleRef};
pub use repository::{Repository, derive_short_name};
pub use state::{DEFAULT_REGION, FeatureState, InstalledFeatureRecord, Materialized};
pub use version::{Bound, Version, VersionConstraint};
