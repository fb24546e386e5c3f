//! Repository management on the engine.

use log::info;
use std::collections::BTreeSet;

use super::Engine;
use super::provision::{ApplyOptions, dependents_closure};
use crate::auth::Subject;
use crate::catalog::FeatureCatalog;
use crate::error::{FeatureError, Result};
use crate::model::{FeatureId, FeatureRef, Repository};
use crate::runtime::Runtime;
use crate::service::{InstallOptions, RepositoryInfo};

/// Boot features declared by `repositories`, as exact references.
pub(super) fn boot_features<'a>(repositories: impl IntoIterator<Item = &'a Repository>) -> Vec<FeatureRef> {
    repositories
        .into_iter()
        .flat_map(|r| r.features.iter())
        .filter(|f| f.boot)
        .map(|f| FeatureRef::exact(f.id.name.clone(), f.id.version.as_str()))
        .collect()
}

impl<R: Runtime + 'static> Engine<R> {
    #[tracing::instrument(skip(self, subject))]
    pub async fn add_repository(
        &self,
        subject: &Subject,
        locator: &str,
        install: bool,
    ) -> Result<Vec<RepositoryInfo>> {
        self.authorize(subject, "add repositories")?;

        let added = self.repositories.add(locator).await?;
        self.persist()?;

        if install {
            // Also covers a locator that was already registered
            let boot = boot_features(&self.repositories.with_imports(locator)?);
            if !boot.is_empty() {
                let _guard = self.provisioning.lock().await;
                self.install_locked(&boot, InstallOptions::default()).await?;
            }
        }
        Ok(added.iter().map(RepositoryInfo::from).collect())
    }

    /// Remove repositories matching `selector`.
    ///
    /// If they declare installed features, fail with [`FeatureError::InUse`]
    /// unless `force` is set, in which case those features and everything
    /// depending on them are uninstalled first.
    #[tracing::instrument(skip(self, subject))]
    pub async fn remove_repository(
        &self,
        subject: &Subject,
        selector: &str,
        force: bool,
    ) -> Result<Vec<RepositoryInfo>> {
        self.authorize(subject, "remove repositories")?;
        let _guard = self.provisioning.lock().await;

        let matched = self.repositories.select(selector)?;
        if matched.is_empty() {
            return Err(FeatureError::not_found(format!(
                "No repository matching '{}'",
                selector
            )));
        }
        let locators: Vec<String> = matched.iter().map(|r| r.locator.clone()).collect();

        let before = self.state.snapshot()?;
        let declared: BTreeSet<FeatureId> = before
            .installed()
            .filter(|r| {
                r.repository.as_ref().is_some_and(|l| locators.contains(l))
                    || matched.iter().any(|repo| repo.declares(&r.feature.id))
            })
            .map(|r| r.feature.id.clone())
            .collect();

        if !declared.is_empty() {
            if !force {
                return Err(FeatureError::InUse {
                    target: matched
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    users: declared.iter().map(|id| id.to_string()).collect(),
                });
            }

            let doomed = dependents_closure(&before, &declared);
            info!(
                "Uninstalling {} feature(s) before removing {}",
                doomed.len(),
                locators.join(", ")
            );
            let required = before
                .required_ids()
                .into_iter()
                .filter(|id| !doomed.contains(id))
                .collect();
            let installed = before
                .installed_ids()
                .into_iter()
                .filter(|id| !doomed.contains(id))
                .collect();
            let remaining: Vec<Repository> = self
                .repositories
                .list()?
                .into_iter()
                .filter(|r| !locators.contains(&r.locator))
                .collect();
            let catalog = FeatureCatalog::from_repositories(&remaining);

            let plan = self.plan(&catalog, before, required, installed)?;
            self.apply(plan, ApplyOptions::default(), None).await?;
        }

        let removed = self.repositories.remove(&locators)?;
        self.persist()?;
        Ok(removed.iter().map(RepositoryInfo::from).collect())
    }

    /// Re-fetch matching repositories; installed feature states are left alone.
    #[tracing::instrument(skip(self, subject))]
    pub async fn refresh_repository(
        &self,
        subject: &Subject,
        selector: &str,
    ) -> Result<Vec<RepositoryInfo>> {
        self.authorize(subject, "refresh repositories")?;

        let report = self.repositories.refresh(selector).await?;
        self.persist()?;

        let report = report.into_result()?;
        Ok(report
            .refreshed
            .iter()
            .chain(report.added.iter())
            .map(RepositoryInfo::from)
            .collect())
    }
}
