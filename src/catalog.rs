//! Feature catalog: the union of features declared by registered repositories.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{FeatureError, Result};
use crate::model::{Feature, FeatureId, FeatureRef, Repository};
use crate::resolver::FeatureLookup;

/// A feature definition and the repository declaring it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub feature: Feature,
    /// Locator of the declaring repository
    pub repository: String,
    pub repository_name: String,
}

/// Index of feature definitions by name, each list ordered highest version first.
#[derive(Debug, Default)]
pub struct FeatureCatalog {
    by_name: BTreeMap<String, Vec<CatalogEntry>>,
}

impl FeatureCatalog {
    /// Build the catalog from a repository snapshot.
    ///
    /// When two repositories declare the same `name/version`, the first one in
    /// the snapshot is kept.
    pub fn from_repositories(repositories: &[Repository]) -> Self {
        let mut by_name: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
        for repo in repositories {
            for feature in &repo.features {
                let entries = by_name.entry(feature.id.name.clone()).or_default();
                if entries.iter().any(|e| e.feature.id == feature.id) {
                    debug!(
                        "Feature {} from {} shadowed by an earlier repository",
                        feature.id, repo.locator
                    );
                    continue;
                }
                entries.push(CatalogEntry {
                    feature: feature.clone(),
                    repository: repo.locator.clone(),
                    repository_name: repo.name.clone(),
                });
            }
        }
        for entries in by_name.values_mut() {
            entries.sort_by(|a, b| b.feature.id.version.cmp(&a.feature.id.version));
        }
        Self { by_name }
    }

    /// The highest-versioned definition satisfying the reference.
    pub fn resolve(&self, reference: &FeatureRef) -> Result<&CatalogEntry> {
        self.versions(&reference.name)
            .iter()
            .find(|e| reference.matches(&e.feature.id))
            .ok_or_else(|| FeatureError::not_found(format!("No matching features for {}", reference)))
    }

    pub fn get(&self, id: &FeatureId) -> Option<&CatalogEntry> {
        self.versions(&id.name).iter().find(|e| &e.feature.id == id)
    }

    /// All definitions of `name`, highest version first.
    pub fn versions(&self, name: &str) -> &[CatalogEntry] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every entry, by name and then highest version first.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.by_name.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl FeatureLookup for FeatureCatalog {
    fn candidates(&self, name: &str) -> Vec<&Feature> {
        self.versions(name).iter().map(|e| &e.feature).collect()
    }
}
