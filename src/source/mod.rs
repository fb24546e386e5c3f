//! Descriptor sources.
//!
//! A source turns a repository locator into descriptor bytes. Transport is
//! pluggable: the engine only ever talks to [`DescriptorSource`].

mod file;
mod http;
mod memory;
mod registry;

use anyhow::Result;
use async_trait::async_trait;

pub use file::FileSource;
pub use http::HttpSource;
pub use memory::MemorySource;
pub use registry::SourceRegistry;

/// Fetches raw repository descriptors by locator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Whether this source understands the locator's scheme.
    fn handles(&self, locator: &str) -> bool;

    /// Fetch the descriptor bytes.
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}
