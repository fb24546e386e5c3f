//! Fetching remote descriptors.

mod client;
mod retry;

pub use client::{HttpClient, MAX_DESCRIPTOR_BYTES, RetryPolicy};
pub use retry::{NonRetryableError, check_retryable, classify_error};
