//! Typed management interface.
//!
//! Front ends (the command line, an embedding application) talk to the engine
//! only through [`FeaturesService`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Subject;
use crate::error::Result;
use crate::model::{FeatureId, FeatureRef, FeatureState, ModuleRef, Repository};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Skip the module refresh after provisioning
    pub no_auto_refresh: bool,
    /// Log every planned step at info level
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    pub no_auto_refresh: bool,
    /// Delete the configuration artifacts of uninstalled features
    pub delete_config: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub installed_only: bool,
    /// Repository name or locator
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub locator: String,
    pub features: Vec<FeatureId>,
    pub imports: Vec<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl From<&Repository> for RepositoryInfo {
    fn from(repo: &Repository) -> Self {
        Self {
            name: repo.name.clone(),
            locator: repo.locator.clone(),
            features: repo.features.iter().map(|f| f.id.clone()).collect(),
            imports: repo.imports.clone(),
            refreshed_at: repo.refreshed_at,
        }
    }
}

/// A feature as shown by `feature-list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureInfo {
    pub id: FeatureId,
    pub required: bool,
    pub state: FeatureState,
    /// Repository name, empty when the repository is gone
    pub repository: String,
    pub description: Option<String>,
    pub region: String,
}

/// One row of `feature-version-list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVersionInfo {
    pub id: FeatureId,
    pub repository: String,
    pub locator: String,
    pub state: FeatureState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStatus {
    pub id: FeatureId,
    pub state: FeatureState,
    pub required: bool,
}

/// What a provisioning call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub installed: Vec<FeatureId>,
    pub uninstalled: Vec<FeatureId>,
    pub started_modules: Vec<ModuleRef>,
    pub stopped_modules: Vec<ModuleRef>,
}

impl ProvisionReport {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
            && self.uninstalled.is_empty()
            && self.started_modules.is_empty()
            && self.stopped_modules.is_empty()
    }

    pub fn merge(&mut self, other: ProvisionReport) {
        self.installed.extend(other.installed);
        self.uninstalled.extend(other.uninstalled);
        self.started_modules.extend(other.started_modules);
        self.stopped_modules.extend(other.stopped_modules);
    }
}

/// Contents of `etc/features.json`, applied by `boot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootConfig {
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub boot_features: Vec<FeatureRef>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeaturesService: Send + Sync {
    /// Register a repository and its imports, optionally installing its boot features.
    async fn add_repository(
        &self,
        subject: &Subject,
        locator: &str,
        install: bool,
    ) -> Result<Vec<RepositoryInfo>>;

    async fn remove_repository(
        &self,
        subject: &Subject,
        selector: &str,
        force: bool,
    ) -> Result<Vec<RepositoryInfo>>;

    /// Re-fetch matching repositories. Failures are reported together once the rest are done.
    async fn refresh_repository(
        &self,
        subject: &Subject,
        selector: &str,
    ) -> Result<Vec<RepositoryInfo>>;

    fn list_repositories(&self) -> Result<Vec<RepositoryInfo>>;

    async fn install(
        &self,
        subject: &Subject,
        features: &[FeatureRef],
        options: InstallOptions,
    ) -> Result<ProvisionReport>;

    async fn uninstall(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: UninstallOptions,
    ) -> Result<ProvisionReport>;

    async fn upgrade(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: InstallOptions,
    ) -> Result<ProvisionReport>;

    fn list_features(&self, filter: &ListFilter) -> Result<Vec<FeatureInfo>>;

    fn version_list(&self, selector: &str) -> Result<Vec<FeatureVersionInfo>>;

    fn status(&self, feature: &FeatureRef) -> Result<FeatureStatus>;

    fn config_exists(&self, pid: &str) -> bool;

    /// Register the configured repositories and install the configured boot features.
    async fn boot(&self, subject: &Subject, config: &BootConfig) -> Result<ProvisionReport>;
}
