//! Retrying HTTP fetcher.
//!
//! Streams a remote resource to disk chunk by chunk. Network failures and
//! timeouts are retried with exponential backoff; a non-success status is a
//! definitive answer and is returned immediately.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Errors from a fetch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    BadStatus(u16),

    #[error("Failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Retry and timeout settings for a fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Total attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout in seconds, covering the whole body
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Backoff unit; the wait after attempt `n` is `unit * 2^n`
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_backoff_unit_ms() -> u64 {
    1000
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout_seconds(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

impl FetchOptions {
    pub fn new(max_retries: u32, timeout_seconds: u64) -> Self {
        Self {
            max_retries,
            timeout_seconds,
            ..Default::default()
        }
    }

    /// Wait after a failed attempt (1-indexed): 2s, 4s, 8s... at the default unit
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(factor))
    }
}

/// Outcome of one attempt
enum Attempt {
    Done(u64),
    Transient(String),
    Fatal(FetchError),
}

/// HTTP fetcher with bounded retries
#[derive(Clone, Default)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` to `destination`, overwriting it. Returns bytes written.
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<u64, FetchError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Unexpected(format!("create {}: {}", parent.display(), e)))?;
        }

        let max_attempts = options.max_retries.max(1);
        let timeout = Duration::from_secs(options.timeout_seconds);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.attempt(url, destination, timeout).await {
                Attempt::Done(bytes) => {
                    info!(url, bytes, attempt, "Fetched");
                    return Ok(bytes);
                }
                Attempt::Fatal(e) => return Err(e),
                Attempt::Transient(error) => {
                    if attempt >= max_attempts {
                        warn!(url, attempt, %error, "Fetch failed, retries exhausted");
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let delay = options.delay_for_attempt(attempt);
                    warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, url: &str, destination: &Path, timeout: Duration) -> Attempt {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return classify(e),
        };

        let status = response.status();
        if !status.is_success() {
            return Attempt::Fatal(FetchError::BadStatus(status.as_u16()));
        }

        let mut file = match fs::File::create(destination).await {
            Ok(file) => file,
            Err(e) => {
                return Attempt::Fatal(FetchError::Unexpected(format!(
                    "create {}: {}",
                    destination.display(),
                    e
                )))
            }
        };

        let mut response = response;
        let mut written = 0u64;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = file.write_all(&chunk).await {
                        return Attempt::Fatal(FetchError::Unexpected(format!("write: {}", e)));
                    }
                    written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => return classify(e),
            }
        }

        if let Err(e) = file.flush().await {
            return Attempt::Fatal(FetchError::Unexpected(format!("flush: {}", e)));
        }

        debug!(url, written, "Body streamed to disk");
        Attempt::Done(written)
    }
}

/// Network-level failures are transient; malformed requests are not
fn classify(error: reqwest::Error) -> Attempt {
    if error.is_builder() {
        Attempt::Fatal(FetchError::Unexpected(error.to_string()))
    } else {
        Attempt::Transient(error.to_string())
    }
}
