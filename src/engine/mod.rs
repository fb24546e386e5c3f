//! Provisioning engine.
//!
//! Ties the repository store, the resolver, the module runtime, the config
//! manager and the state store together behind [`FeaturesService`].
//!
//! # Locking
//!
//! Provisioning operations (install, uninstall, upgrade, repository removal
//! and add-with-install) serialize on one async mutex. Catalog and state data
//! sit behind short-lived `RwLock`s that are never held across an `.await`,
//! so queries stay responsive while a provisioning run waits on modules.

mod boot;
mod journal;
mod provision;
mod repos;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{DEFAULT_ADMIN_ROLE, Subject};
use crate::catalog::{CatalogEntry, FeatureCatalog};
use crate::config::ConfigManager;
use crate::error::Result;
use crate::model::{DEFAULT_REGION, FeatureRef, FeatureState};
use crate::module::ModuleRuntime;
use crate::repository::RepositoryStore;
use crate::runtime::Runtime;
use crate::selector::Selector;
use crate::service::{
    BootConfig, FeatureInfo, FeatureStatus, FeatureVersionInfo, FeaturesService, InstallOptions,
    ListFilter, ProvisionReport, RepositoryInfo, UninstallOptions,
};
use crate::source::DescriptorSource;
use crate::state::StateStore;

pub use boot::load_boot_config;

/// Engine policy.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Allow two versions of one feature to be installed at once
    pub allow_side_by_side: bool,
    /// Keep fully uninstalled features as `Uninstalled` records instead of dropping them
    pub retain_uninstalled_records: bool,
    /// Role required for mutating operations
    pub admin_role: String,
    /// Where configuration artifacts are written
    pub config_dir: PathBuf,
}

impl EngineOptions {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            allow_side_by_side: false,
            retain_uninstalled_records: true,
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
            config_dir: config_dir.into(),
        }
    }
}

pub struct Engine<R: Runtime> {
    repositories: RepositoryStore,
    state: StateStore<R>,
    config: ConfigManager<R>,
    modules: Arc<dyn ModuleRuntime>,
    options: EngineOptions,
    provisioning: tokio::sync::Mutex<()>,
}

impl<R: Runtime + 'static> Engine<R> {
    /// Create an engine, loading whatever `state` has persisted.
    pub fn new(
        runtime: Arc<R>,
        source: Arc<dyn DescriptorSource>,
        modules: Arc<dyn ModuleRuntime>,
        state: StateStore<R>,
        options: EngineOptions,
    ) -> Result<Self> {
        let repositories = RepositoryStore::new(source);
        repositories.restore(state.load()?)?;
        let config = ConfigManager::new(runtime, options.config_dir.clone());
        Ok(Self {
            repositories,
            state,
            config,
            modules,
            options,
            provisioning: tokio::sync::Mutex::new(()),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn state(&self) -> &StateStore<R> {
        &self.state
    }

    pub fn config(&self) -> &ConfigManager<R> {
        &self.config
    }

    fn authorize(&self, subject: &Subject, operation: &str) -> Result<()> {
        subject.require(&self.options.admin_role, operation)
    }

    fn catalog(&self) -> Result<FeatureCatalog> {
        Ok(FeatureCatalog::from_repositories(&self.repositories.list()?))
    }

    fn persist(&self) -> Result<()> {
        self.state.save(&self.repositories.list()?)
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        Ok(self
            .repositories
            .list()?
            .iter()
            .map(RepositoryInfo::from)
            .collect())
    }

    /// Every known feature with its state, plus tracked features whose repository is gone.
    pub fn list_features(&self, filter: &ListFilter) -> Result<Vec<FeatureInfo>> {
        let repos = self.repositories.list()?;
        let catalog = FeatureCatalog::from_repositories(&repos);
        let state = self.state.snapshot()?;

        let mut rows: Vec<(FeatureInfo, Option<String>)> = Vec::new();
        for entry in catalog.entries() {
            let record = state.record(&entry.feature.id);
            let info = FeatureInfo {
                id: entry.feature.id.clone(),
                required: record.is_some_and(|r| r.required && r.state.is_installed()),
                state: record.map(|r| r.state).unwrap_or_default(),
                repository: entry.repository_name.clone(),
                description: entry.feature.description.clone(),
                region: record
                    .map(|r| r.region.clone())
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            };
            rows.push((info, Some(entry.repository.clone())));
        }
        for record in state.installed() {
            if catalog.get(&record.feature.id).is_some() {
                continue;
            }
            let repository = record
                .repository
                .as_deref()
                .and_then(|l| repos.iter().find(|r| r.locator == l))
                .map(|r| r.name.clone())
                .unwrap_or_default();
            let info = FeatureInfo {
                id: record.feature.id.clone(),
                required: record.required,
                state: record.state,
                repository,
                description: record.feature.description.clone(),
                region: record.region.clone(),
            };
            rows.push((info, record.repository.clone()));
        }

        let mut features: Vec<FeatureInfo> = rows
            .into_iter()
            .filter(|(info, _)| !filter.installed_only || info.state.is_installed())
            .filter(|(info, locator)| match &filter.repository {
                Some(wanted) => &info.repository == wanted || locator.as_ref() == Some(wanted),
                None => true,
            })
            .map(|(info, _)| info)
            .collect();
        features.sort_by(|a, b| {
            a.id.name
                .cmp(&b.id.name)
                .then_with(|| b.id.version.cmp(&a.id.version))
        });
        Ok(features)
    }

    /// Every definition whose name matches `selector` exactly or as a pattern.
    pub fn version_list(&self, selector: &str) -> Result<Vec<FeatureVersionInfo>> {
        let catalog = self.catalog()?;
        let state = self.state.snapshot()?;
        let entries: Vec<&CatalogEntry> = catalog.entries().collect();
        let matched = Selector::new(selector).select(&entries, |e| vec![e.feature.id.name.as_str()])?;

        Ok(matched
            .into_iter()
            .map(|e| FeatureVersionInfo {
                id: e.feature.id.clone(),
                repository: e.repository_name.clone(),
                locator: e.repository.clone(),
                state: state
                    .record(&e.feature.id)
                    .map(|r| r.state)
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// State of the installed feature matching `feature`, or of the version it would resolve to.
    pub fn status(&self, feature: &FeatureRef) -> Result<FeatureStatus> {
        let state = self.state.snapshot()?;
        if let Some(record) = state.installed_matching(feature).first() {
            return Ok(FeatureStatus {
                id: record.feature.id.clone(),
                state: record.state,
                required: record.required,
            });
        }
        let catalog = self.catalog()?;
        let entry = catalog.resolve(feature)?;
        Ok(FeatureStatus {
            id: entry.feature.id.clone(),
            state: FeatureState::Uninstalled,
            required: false,
        })
    }

    pub fn config_exists(&self, pid: &str) -> bool {
        self.config.exists(pid)
    }
}

#[async_trait]
impl<R: Runtime + 'static> FeaturesService for Engine<R> {
    async fn add_repository(
        &self,
        subject: &Subject,
        locator: &str,
        install: bool,
    ) -> Result<Vec<RepositoryInfo>> {
        Engine::add_repository(self, subject, locator, install).await
    }

    async fn remove_repository(
        &self,
        subject: &Subject,
        selector: &str,
        force: bool,
    ) -> Result<Vec<RepositoryInfo>> {
        Engine::remove_repository(self, subject, selector, force).await
    }

    async fn refresh_repository(
        &self,
        subject: &Subject,
        selector: &str,
    ) -> Result<Vec<RepositoryInfo>> {
        Engine::refresh_repository(self, subject, selector).await
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        Engine::list_repositories(self)
    }

    async fn install(
        &self,
        subject: &Subject,
        features: &[FeatureRef],
        options: InstallOptions,
    ) -> Result<ProvisionReport> {
        Engine::install(self, subject, features, options).await
    }

    async fn uninstall(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: UninstallOptions,
    ) -> Result<ProvisionReport> {
        Engine::uninstall(self, subject, feature, options).await
    }

    async fn upgrade(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: InstallOptions,
    ) -> Result<ProvisionReport> {
        Engine::upgrade(self, subject, feature, options).await
    }

    fn list_features(&self, filter: &ListFilter) -> Result<Vec<FeatureInfo>> {
        Engine::list_features(self, filter)
    }

    fn version_list(&self, selector: &str) -> Result<Vec<FeatureVersionInfo>> {
        Engine::version_list(self, selector)
    }

    fn status(&self, feature: &FeatureRef) -> Result<FeatureStatus> {
        Engine::status(self, feature)
    }

    fn config_exists(&self, pid: &str) -> bool {
        Engine::config_exists(self, pid)
    }

    async fn boot(&self, subject: &Subject, config: &BootConfig) -> Result<ProvisionReport> {
        Engine::boot(self, subject, config).await
    }
}

#[cfg(test)]
mod fixtures;
