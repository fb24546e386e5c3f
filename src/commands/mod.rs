//! Command line front end.
//!
//! Every command talks to the engine through [`FeaturesService`](crate::service::FeaturesService)
//! and writes its output to the given writer.

mod boot;
pub mod config;
mod feature;
pub mod paths;
mod repo;
mod table;

pub use boot::boot;
pub use config::Config;
pub use feature::{
    config_exists, feature_install, feature_list, feature_status, feature_uninstall,
    feature_upgrade, feature_version_list,
};
pub use repo::{repo_add, repo_list, repo_refresh, repo_remove};
pub use table::Table;
