//! Boot-time provisioning from `etc/features.json`.

use anyhow::Context;
use log::{debug, info, warn};
use std::path::Path;

use super::Engine;
use super::repos::boot_features;
use crate::auth::Subject;
use crate::error::{FeatureError, Result};
use crate::runtime::Runtime;
use crate::service::{BootConfig, InstallOptions, ProvisionReport};

/// Load the boot configuration, if there is one.
pub fn load_boot_config<R: Runtime>(runtime: &R, path: &Path) -> Result<Option<BootConfig>> {
    if !runtime.exists(path) {
        debug!("No boot configuration at {:?}", path);
        return Ok(None);
    }
    let content = runtime
        .read_to_string(path)
        .with_context(|| format!("Failed to read boot configuration {:?}", path))?;
    let parse_err = |message: String| FeatureError::Parse {
        locator: path.display().to_string(),
        message,
    };
    // serde would also accept a bare array for a struct of defaults
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?;
    if !value.is_object() {
        return Err(parse_err("expected a JSON object".to_string()));
    }
    let config = serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;
    Ok(Some(config))
}

impl<R: Runtime + 'static> Engine<R> {
    /// Register the configured repositories, then install the configured boot
    /// features together with every feature those repositories flag for boot.
    ///
    /// A repository that cannot be added does not stop the others; all
    /// failures are reported together at the end.
    #[tracing::instrument(skip(self, subject, config))]
    pub async fn boot(&self, subject: &Subject, config: &BootConfig) -> Result<ProvisionReport> {
        self.authorize(subject, "boot")?;

        let mut failures = Vec::new();
        for locator in &config.repositories {
            if let Err(e) = self.repositories.add(locator).await {
                warn!("{}", e);
                failures.push(e);
            }
        }
        self.persist()?;

        let mut configured = Vec::new();
        for locator in &config.repositories {
            if let Some(repo) = self.repositories.get(locator)? {
                configured.push(repo);
            }
        }
        let mut features = config.boot_features.clone();
        for reference in boot_features(&configured) {
            if !features.contains(&reference) {
                features.push(reference);
            }
        }

        let mut report = ProvisionReport::default();
        if !features.is_empty() {
            info!("Installing {} boot feature(s)", features.len());
            let _guard = self.provisioning.lock().await;
            match self.install_locked(&features, InstallOptions::default()).await {
                Ok(installed) => report.merge(installed),
                Err(e) => failures.push(e),
            }
        }

        match FeatureError::collect(failures) {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
