use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DescriptorSource;
use crate::runtime::Runtime;

/// Reads descriptors from the local file system (`file:` locators or plain paths).
pub struct FileSource<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> FileSource<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    fn path_of(locator: &str) -> PathBuf {
        let raw = locator.strip_prefix("file://").or_else(|| locator.strip_prefix("file:"));
        PathBuf::from(raw.unwrap_or(locator))
    }
}

#[async_trait]
impl<R: Runtime> DescriptorSource for FileSource<R> {
    fn handles(&self, locator: &str) -> bool {
        locator.starts_with("file:")
            || Path::new(locator).is_absolute()
            || locator.starts_with("./")
            || locator.starts_with("../")
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = Self::path_of(locator);
        if !self.runtime.exists(&path) {
            anyhow::bail!("No such file: {}", path.display());
        }
        self.runtime.read(&path)
    }
}
