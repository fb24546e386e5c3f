use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feature::Feature;

/// A parsed feature repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub locator: String,
    /// Declared name, or one derived from the locator
    pub name: String,
    pub features: Vec<Feature>,
    /// Locators of imported repositories, already resolved against `locator`
    pub imports: Vec<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl Repository {
    pub fn declares(&self, feature: &super::FeatureId) -> bool {
        self.features.iter().any(|f| &f.id == feature)
    }
}

/// Derive a short repository name from its locator.
///
/// - `mvn:group/artifact/version/...` becomes `artifact-version`
/// - anything else becomes the last path segment without its extension
pub fn derive_short_name(locator: &str) -> String {
    if let Some(coords) = locator.strip_prefix("mvn:") {
        let parts: Vec<&str> = coords.split('/').collect();
        if parts.len() >= 3 && !parts[1].is_empty() {
            return format!("{}-{}", parts[1], parts[2]);
        }
    }

    let trimmed = locator.trim_end_matches('/');
    let last = trimmed.rsplit(['/', '\\', ':']).next().unwrap_or(trimmed);
    match last.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => last.to_string(),
    }
}
