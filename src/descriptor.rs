//! Repository descriptor parsing.
//!
//! Descriptors are JSON documents declaring a repository name, imported
//! repositories and a list of features.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;

use crate::config::is_valid_pid;
use crate::error::{FeatureError, Result};
use crate::model::{
    ConfigArtifact, Feature, FeatureId, FeatureRef, ModuleRef, Repository, derive_short_name,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    repositories: Vec<String>,
    #[serde(default)]
    features: Vec<FeatureDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeatureDoc {
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    description: Option<String>,
    /// "auto" marks a boot feature; "manual" (default) does not
    #[serde(default)]
    install: Option<String>,
    #[serde(default)]
    features: Vec<FeatureRef>,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default)]
    configs: Vec<ConfigArtifact>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// Parse the descriptor bytes fetched from `locator`.
#[tracing::instrument(skip(bytes))]
pub fn parse(locator: &str, bytes: &[u8]) -> Result<Repository> {
    let parse_err = |message: String| FeatureError::Parse {
        locator: locator.to_string(),
        message,
    };

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| parse_err(e.to_string()))?;
    if !value.is_object() {
        return Err(parse_err("descriptor must be a JSON object".to_string()));
    }
    let doc: DescriptorDoc =
        serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut features = Vec::with_capacity(doc.features.len());
    for raw in doc.features {
        if raw.name.trim().is_empty() || raw.name.contains('/') {
            return Err(parse_err(format!("invalid feature name '{}'", raw.name)));
        }
        let boot = match raw.install.as_deref() {
            None | Some("manual") => false,
            Some("auto") => true,
            Some(other) => {
                return Err(parse_err(format!(
                    "feature {}: unknown install mode '{}'",
                    raw.name, other
                )));
            }
        };
        for config in &raw.configs {
            if !is_valid_pid(&config.pid) {
                return Err(parse_err(format!(
                    "feature {}: invalid config pid '{}'",
                    raw.name, config.pid
                )));
            }
        }

        let id = FeatureId::new(raw.name, raw.version);
        if !seen.insert(id.clone()) {
            return Err(parse_err(format!("duplicate feature {}", id)));
        }
        features.push(Feature {
            id,
            description: raw.description,
            modules: raw.modules.into_iter().map(ModuleRef::new).collect(),
            dependencies: raw.features,
            configs: raw.configs,
            boot,
        });
    }

    Ok(Repository {
        locator: locator.to_string(),
        name: doc
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| derive_short_name(locator)),
        imports: doc
            .repositories
            .iter()
            .map(|import| resolve_import(locator, import))
            .collect(),
        features,
        refreshed_at: Utc::now(),
    })
}

fn has_scheme(s: &str) -> bool {
    match s.split_once(':') {
        // A single letter is a Windows drive, not a scheme
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Resolve an import locator relative to the importing repository.
pub fn resolve_import(base: &str, import: &str) -> String {
    if has_scheme(import) || import.starts_with('/') || import.starts_with('\\') {
        return import.to_string();
    }
    match base.rfind('/') {
        Some(idx) => format!("{}{}", &base[..=idx], import),
        None => import.to_string(),
    }
}
