use anyhow::Result;
use async_trait::async_trait;

use super::DescriptorSource;
use crate::http::HttpClient;

/// Fetches descriptors over `http:` / `https:`.
pub struct HttpSource {
    client: HttpClient,
}

impl HttpSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DescriptorSource for HttpSource {
    fn handles(&self, locator: &str) -> bool {
        locator.starts_with("http://") || locator.starts_with("https://")
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        self.client.get_bytes(locator).await
    }
}
