//! Dispatch of locators to the source that understands them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::DescriptorSource;

/// Ordered list of sources; the first one that handles a locator wins.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DescriptorSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Sources registered earlier take precedence.
    pub fn register(&mut self, source: Arc<dyn DescriptorSource>) {
        self.sources.push(source);
    }

    pub fn with(mut self, source: Arc<dyn DescriptorSource>) -> Self {
        self.register(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn resolve(&self, locator: &str) -> Option<&Arc<dyn DescriptorSource>> {
        self.sources.iter().find(|s| s.handles(locator))
    }
}

#[async_trait]
impl DescriptorSource for SourceRegistry {
    fn handles(&self, locator: &str) -> bool {
        self.resolve(locator).is_some()
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        match self.resolve(locator) {
            Some(source) => source.fetch(locator).await,
            None => anyhow::bail!("No source registered for locator: {}", locator),
        }
    }
}
