//! Engine state: tracked features and modules, optionally persisted to disk.
//!
//! The store is an ordinary object handed to the engine, so several engines
//! can live side by side. When created with a path it is saved as pretty JSON
//! after every change and loaded on startup.

use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{FeatureError, Result};
use crate::model::{FeatureId, FeatureRef, InstalledFeatureRecord, ModuleRef, Repository};
use crate::module::ModuleState;
use crate::runtime::Runtime;

/// A module the engine installed, and the installed features declaring it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub module: ModuleRef,
    pub state: ModuleState,
    pub owners: BTreeSet<FeatureId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineState {
    pub features: BTreeMap<FeatureId, InstalledFeatureRecord>,
    pub modules: BTreeMap<ModuleRef, ModuleRecord>,
}

impl EngineState {
    pub fn record(&self, id: &FeatureId) -> Option<&InstalledFeatureRecord> {
        self.features.get(id)
    }

    /// Records currently in an installed state.
    pub fn installed(&self) -> impl Iterator<Item = &InstalledFeatureRecord> {
        self.features.values().filter(|r| r.state.is_installed())
    }

    pub fn installed_ids(&self) -> BTreeSet<FeatureId> {
        self.installed().map(|r| r.feature.id.clone()).collect()
    }

    /// Explicitly requested features that are still installed.
    pub fn required_ids(&self) -> Vec<FeatureId> {
        self.installed()
            .filter(|r| r.required)
            .map(|r| r.feature.id.clone())
            .collect()
    }

    /// Installed records matching the reference, highest version first.
    pub fn installed_matching(&self, reference: &FeatureRef) -> Vec<&InstalledFeatureRecord> {
        let mut found: Vec<&InstalledFeatureRecord> = self
            .installed()
            .filter(|r| reference.matches(&r.feature.id))
            .collect();
        found.sort_by(|a, b| b.feature.id.version.cmp(&a.feature.id.version));
        found
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(default)]
    features: Vec<InstalledFeatureRecord>,
    #[serde(default)]
    modules: Vec<ModuleRecord>,
}

pub struct StateStore<R: Runtime> {
    runtime: Arc<R>,
    path: Option<PathBuf>,
    state: RwLock<EngineState>,
}

impl<R: Runtime> StateStore<R> {
    /// A store that lives only as long as the process.
    pub fn in_memory(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            path: None,
            state: RwLock::new(EngineState::default()),
        }
    }

    /// A store saved to `path`.
    pub fn persistent(runtime: Arc<R>, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: Some(path.into()),
            state: RwLock::new(EngineState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn poisoned() -> FeatureError {
        FeatureError::State("state lock poisoned".into())
    }

    pub fn read<T>(&self, f: impl FnOnce(&EngineState) -> T) -> Result<T> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(f(&state))
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> Result<T> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        Ok(f(&mut state))
    }

    pub fn snapshot(&self) -> Result<EngineState> {
        self.read(EngineState::clone)
    }

    pub fn replace(&self, state: EngineState) -> Result<()> {
        self.update(|current| *current = state)
    }

    /// Load persisted state, returning the repositories that were registered.
    ///
    /// A missing file is an empty state.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<Vec<Repository>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !self.runtime.exists(path) {
            debug!("No state file at {:?}", path);
            return Ok(Vec::new());
        }

        let content = self
            .runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read state from {:?}", path))?;
        let file: StateFile = serde_json::from_str(&content)
            .map_err(|e| FeatureError::State(format!("Invalid state file {:?}: {}", path, e)))?;

        let loaded = EngineState {
            features: file
                .features
                .into_iter()
                .map(|r| (r.feature.id.clone(), r))
                .collect(),
            modules: file
                .modules
                .into_iter()
                .map(|m| (m.module.clone(), m))
                .collect(),
        };
        debug!(
            "Loaded {} feature record(s) and {} module(s)",
            loaded.features.len(),
            loaded.modules.len()
        );
        self.replace(loaded)?;
        Ok(file.repositories)
    }

    /// Persist the current state together with the repository snapshot.
    #[tracing::instrument(skip(self, repositories))]
    pub fn save(&self, repositories: &[Repository]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = self.read(|state| StateFile {
            repositories: repositories.to_vec(),
            features: state.features.values().cloned().collect(),
            modules: state.modules.values().cloned().collect(),
        })?;

        if let Some(parent) = path.parent()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| FeatureError::State(format!("Unable to serialize state: {}", e)))?;
        self.runtime
            .write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to save state to {:?}", path))?;
        Ok(())
    }
}
