//! Descriptor downloads over HTTP.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::{Client, header::ACCEPT};
use std::future::Future;
use std::time::Duration;

use super::retry::{NonRetryableError, check_retryable};

/// Largest descriptor body accepted.
pub const MAX_DESCRIPTOR_BYTES: usize = 8 * 1024 * 1024;

/// How many times a fetch is attempted, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    max_bytes: usize,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            max_bytes: MAX_DESCRIPTOR_BYTES,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.policy.delay = delay;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Download a descriptor, retrying transient failures.
    #[tracing::instrument(skip(self))]
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.retrying(url, || self.get_once(url)).await
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .map_err(check_retryable)?;

        if let Some(length) = response.content_length()
            && length > self.max_bytes as u64
        {
            return Err(NonRetryableError::TooLarge(url.to_string()).into());
        }
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;
        if body.len() > self.max_bytes {
            return Err(NonRetryableError::TooLarge(url.to_string()).into());
        }
        Ok(body.to_vec())
    }

    async fn retrying<F, Fut, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is::<NonRetryableError>() => {
                    debug!("{}: not retrying: {}", what, e);
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    return Err(e.context(format!("Gave up on {} after {} attempt(s)", what, attempt)));
                }
                Err(e) => {
                    warn!(
                        "{}: attempt {}/{} failed ({:#}), retrying in {:?}",
                        what, attempt, attempts, e, self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_client() -> HttpClient {
        HttpClient::new(Client::new()).with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_get_bytes_asks_for_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repo.json")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body(r#"{"features": []}"#)
            .create_async()
            .await;

        let body = fast_client()
            .get_bytes(&format!("{}/repo.json", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(body, br#"{"features": []}"#);
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_fetched_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.json")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = fast_client()
            .get_bytes(&format!("{}/missing.json", server.url()))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(err.is::<NonRetryableError>());
    }

    #[tokio::test]
    async fn test_oversized_descriptor_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/huge.json")
            .with_status(200)
            .with_body("x".repeat(64))
            .expect(1)
            .create_async()
            .await;

        let err = fast_client()
            .with_max_bytes(16)
            .get_bytes(&format!("{}/huge.json", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_per_policy() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky.json")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = fast_client().with_policy(RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        });
        let err = client
            .get_bytes(&format!("{}/flaky.json", server.url()))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(err.to_string().contains("after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_retrying_recovers_from_transient_errors() {
        let client = fast_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = client
            .retrying("test", || {
                let count = counter.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err::<&str, _>(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
