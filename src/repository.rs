//! Repository store: registered feature repositories and their parsed contents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::join_all;
use log::{debug, info, warn};

use crate::descriptor;
use crate::error::{FeatureError, Result};
use crate::model::Repository;
use crate::selector::Selector;
use crate::source::DescriptorSource;

/// Outcome of refreshing a set of repositories.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<Repository>,
    /// Imports discovered by the refresh and registered for the first time
    pub added: Vec<Repository>,
    pub failures: Vec<FeatureError>,
}

impl RefreshReport {
    /// Turn collected per-repository failures into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(FeatureError::collect(self.failures).unwrap_or(FeatureError::Multiple(vec![])))
        }
    }
}

/// Holds parsed repositories keyed by locator.
pub struct RepositoryStore {
    source: Arc<dyn DescriptorSource>,
    repositories: RwLock<BTreeMap<String, Repository>>,
}

impl RepositoryStore {
    pub fn new(source: Arc<dyn DescriptorSource>) -> Self {
        Self {
            source,
            repositories: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Repository>>> {
        self.repositories
            .read()
            .map_err(|_| FeatureError::State("repository store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Repository>>> {
        self.repositories
            .write()
            .map_err(|_| FeatureError::State("repository store lock poisoned".into()))
    }

    /// Replace the store contents, e.g. with repositories loaded from persisted state.
    pub fn restore(&self, repositories: Vec<Repository>) -> Result<()> {
        let mut map = self.write()?;
        map.clear();
        for repo in repositories {
            map.insert(repo.locator.clone(), repo);
        }
        Ok(())
    }

    pub fn contains(&self, locator: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(locator))
    }

    pub fn get(&self, locator: &str) -> Result<Option<Repository>> {
        Ok(self.read()?.get(locator).cloned())
    }

    /// `locator` and the registered repositories it imports, transitively.
    ///
    /// Empty when `locator` is not registered.
    pub fn with_imports(&self, locator: &str) -> Result<Vec<Repository>> {
        let map = self.read()?;
        let mut queue = VecDeque::from([locator.to_string()]);
        let mut visited = BTreeSet::new();
        let mut found = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            if let Some(repo) = map.get(&next) {
                queue.extend(repo.imports.iter().cloned());
                found.push(repo.clone());
            }
        }
        Ok(found)
    }

    /// Snapshot of all repositories, ordered by locator.
    pub fn list(&self) -> Result<Vec<Repository>> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn fetch_one(&self, locator: &str) -> Result<Repository> {
        debug!("Fetching repository {}", locator);
        let bytes = self
            .source
            .fetch(locator)
            .await
            .map_err(|source| FeatureError::Fetch {
                locator: locator.to_string(),
                source,
            })?;
        descriptor::parse(locator, &bytes)
    }

    /// Fetch `locator` and every import not already registered.
    ///
    /// Nothing is inserted; each locator is fetched at most once, so import cycles terminate.
    async fn load_closure(&self, locator: &str) -> Result<Vec<Repository>> {
        let mut queue = VecDeque::from([locator.to_string()]);
        let mut visited = BTreeSet::new();
        let mut loaded = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) || self.contains(&next)? {
                continue;
            }
            let repo = self.fetch_one(&next).await?;
            queue.extend(repo.imports.iter().cloned());
            loaded.push(repo);
        }
        Ok(loaded)
    }

    /// Register a repository and, recursively, the repositories it imports.
    ///
    /// Returns the newly registered repositories; re-adding a known locator is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn add(&self, locator: &str) -> Result<Vec<Repository>> {
        if self.contains(locator)? {
            info!("Repository {} is already registered", locator);
            return Ok(Vec::new());
        }

        let loaded = self.load_closure(locator).await?;

        let mut map = self.write()?;
        let mut added = Vec::with_capacity(loaded.len());
        for repo in loaded {
            // Another caller may have registered it while we were fetching
            if map.contains_key(&repo.locator) {
                continue;
            }
            info!("Adding repository {} ({})", repo.name, repo.locator);
            map.insert(repo.locator.clone(), repo.clone());
            added.push(repo);
        }
        Ok(added)
    }

    /// Resolve a locator-or-pattern to registered repositories.
    pub fn select(&self, selector: &str) -> Result<Vec<Repository>> {
        let all = self.list()?;
        let selector = Selector::new(selector);
        let matched = selector.select(&all, |r| vec![r.name.as_str(), r.locator.as_str()])?;
        Ok(matched.into_iter().cloned().collect())
    }

    /// Drop the given locators from the store. Unknown locators are ignored.
    pub fn remove(&self, locators: &[String]) -> Result<Vec<Repository>> {
        let mut map = self.write()?;
        Ok(locators
            .iter()
            .filter_map(|l| {
                let removed = map.remove(l);
                if removed.is_some() {
                    info!("Removed repository {}", l);
                }
                removed
            })
            .collect())
    }

    /// Re-fetch and re-parse every repository matching `selector`.
    ///
    /// Each repository succeeds or fails on its own; failures are collected in the report.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, selector: &str) -> Result<RefreshReport> {
        let matched = self.select(selector)?;
        if matched.is_empty() {
            return Err(FeatureError::not_found(format!(
                "No repository matching '{}'",
                selector
            )));
        }

        let results = join_all(matched.iter().map(|r| self.fetch_one(&r.locator))).await;

        let mut report = RefreshReport::default();
        let mut new_imports = Vec::new();
        {
            let mut map = self.write()?;
            for result in results {
                match result {
                    Ok(repo) => {
                        info!("Refreshed repository {} ({})", repo.name, repo.locator);
                        new_imports.extend(
                            repo.imports
                                .iter()
                                .filter(|i| !map.contains_key(*i))
                                .cloned(),
                        );
                        map.insert(repo.locator.clone(), repo.clone());
                        report.refreshed.push(repo);
                    }
                    Err(e) => {
                        warn!("{}", e);
                        report.failures.push(e);
                    }
                }
            }
        }

        for import in new_imports {
            match self.add(&import).await {
                Ok(mut added) => report.added.append(&mut added),
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        Ok(report)
    }
}
