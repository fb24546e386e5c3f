use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::DescriptorSource;

/// In-memory descriptors keyed by locator. Useful for embedding and tests.
#[derive(Default)]
pub struct MemorySource {
    descriptors: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, descriptor: impl Into<Vec<u8>>) {
        if let Ok(mut map) = self.descriptors.write() {
            map.insert(locator.into(), descriptor.into());
        }
    }

    pub fn remove(&self, locator: &str) {
        if let Ok(mut map) = self.descriptors.write() {
            map.remove(locator);
        }
    }
}

#[async_trait]
impl DescriptorSource for MemorySource {
    fn handles(&self, locator: &str) -> bool {
        locator.starts_with("memory:")
            || self
                .descriptors
                .read()
                .map(|m| m.contains_key(locator))
                .unwrap_or(false)
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let map = self
            .descriptors
            .read()
            .map_err(|_| anyhow::anyhow!("descriptor map poisoned"))?;
        map.get(locator)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No descriptor registered for {}", locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_fetch_remove() {
        let source = MemorySource::new();
        source.insert("memory:a", "{}");

        assert!(source.handles("memory:a"));
        assert_eq!(source.fetch("memory:a").await.unwrap(), b"{}");

        source.remove("memory:a");
        assert!(source.fetch("memory:a").await.is_err());
    }
}
