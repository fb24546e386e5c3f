//! Configuration artifacts owned by features.
//!
//! Each artifact is keyed by a PID and written to `<etc>/<pid>.cfg` as sorted
//! `key = value` lines. An artifact may also carry a backing file written
//! next to it.

use anyhow::{Context, anyhow};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::model::{ConfigArtifact, Feature, Materialized};
use crate::runtime::Runtime;

pub struct ConfigManager<R: Runtime> {
    runtime: Arc<R>,
    etc_dir: PathBuf,
}

impl<R: Runtime> ConfigManager<R> {
    pub fn new(runtime: Arc<R>, etc_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            etc_dir: etc_dir.into(),
        }
    }

    pub fn etc_dir(&self) -> &Path {
        &self.etc_dir
    }

    fn pid_path(&self, pid: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_pid(pid) {
            return Err(anyhow!("Configuration pid '{}' is not a plain name", pid));
        }
        Ok(self.etc_dir.join(format!("{}.cfg", pid)))
    }

    fn file_path(&self, name: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!(
                "Config file name '{}' must be relative to the configuration directory",
                name
            ));
        }
        Ok(self.etc_dir.join(relative))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        self.runtime
            .write_atomic(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn materialize_artifact(
        &self,
        artifact: &ConfigArtifact,
        created: &mut Vec<Materialized>,
    ) -> anyhow::Result<()> {
        let pid_path = self.pid_path(&artifact.pid)?;
        if self.runtime.exists(&pid_path) {
            debug!("Configuration {} already exists, leaving it alone", artifact.pid);
        } else {
            self.write_file(&pid_path, render_properties(&artifact.properties).as_bytes())?;
            created.push(Materialized::Pid(artifact.pid.clone()));
        }

        if let Some(file) = &artifact.file {
            let path = self.file_path(&file.name)?;
            let existed = self.runtime.exists(&path);
            if !existed || file.override_existing {
                self.write_file(&path, file.contents.as_bytes())?;
                if !existed {
                    created.push(Materialized::File(file.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Write every artifact of `feature` that is not there yet.
    ///
    /// Returns what was created. On failure everything created by this call is
    /// removed again before the error is returned.
    #[tracing::instrument(skip(self, feature), fields(feature = %feature.id))]
    pub fn materialize(&self, feature: &Feature) -> Result<Vec<Materialized>> {
        let mut created = Vec::new();
        for artifact in &feature.configs {
            if let Err(e) = self.materialize_artifact(artifact, &mut created) {
                self.discard(&created);
                return Err(e
                    .context(format!("Failed to materialize configuration {}", artifact.pid))
                    .into());
            }
        }
        if !created.is_empty() {
            info!("Created {} configuration artifact(s) for {}", created.len(), feature.id);
        }
        Ok(created)
    }

    /// Leave the artifacts of `feature` alone, or delete them when `delete` is set.
    ///
    /// Individual deletion failures are logged and skipped.
    pub fn retain_or_delete(&self, feature: &Feature, delete: bool) {
        if !delete {
            return;
        }
        for artifact in &feature.configs {
            self.remove_checked(self.pid_path(&artifact.pid));
            if let Some(file) = &artifact.file {
                self.remove_checked(self.file_path(&file.name));
            }
        }
    }

    /// Remove artifacts recorded by [`ConfigManager::materialize`].
    pub fn discard(&self, created: &[Materialized]) {
        for item in created.iter().rev() {
            match item {
                Materialized::Pid(pid) => self.remove_checked(self.pid_path(pid)),
                Materialized::File(name) => self.remove_checked(self.file_path(name)),
            }
        }
    }

    fn remove_checked(&self, path: anyhow::Result<PathBuf>) {
        match path {
            Ok(path) => self.remove_quietly(&path),
            Err(e) => warn!("{}", e),
        }
    }

    fn remove_quietly(&self, path: &Path) {
        if !self.runtime.exists(path) {
            return;
        }
        match self.runtime.remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) => warn!("Unable to remove {}: {:#}", path.display(), e),
        }
    }

    pub fn exists(&self, pid: &str) -> bool {
        self.pid_path(pid)
            .is_ok_and(|path| self.runtime.exists(&path))
    }

    /// Current properties of `pid`, if it exists.
    pub fn properties(&self, pid: &str) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.pid_path(pid)?;
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        let content = self.runtime.read_to_string(&path)?;
        Ok(Some(parse_properties(&content)))
    }
}

/// A pid must name a file directly inside the configuration directory.
pub fn is_valid_pid(pid: &str) -> bool {
    !pid.trim().is_empty()
        && !pid.contains(['/', '\\', ':'])
        && pid != "."
        && pid != ".."
}

fn render_properties(properties: &BTreeMap<String, String>) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{} = {}\n", k, v))
        .collect()
}

fn parse_properties(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
