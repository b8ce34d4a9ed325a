//! Document source contract.
//!
//! A [`DocumentSource`] opens a restartable, paged [`DocumentStream`] over
//! the mailbox. Failed page requests leave the stream where it was, so the
//! caller may retry them; [`RetryPolicy`] does that for transient failures.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult, SourceError};
use crate::models::{CursorPosition, Document};

/// Order in which a stream yields documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrder {
    /// Oldest first, by `(timestamp, id)`.
    Ascending,
    /// Whatever the provider returns (Gmail: newest first).
    ProviderNative,
}

/// Parameters for [`DocumentSource::open`].
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Provider filter query, e.g. `from:alice is:unread`. Empty means all mail.
    pub filter: String,
    /// Only documents after this position are wanted. Sources may return a
    /// few at or before it; callers skip those.
    pub since: Option<CursorPosition>,
    /// Soft cap on documents the caller intends to consume.
    pub limit: Option<usize>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn open(&self, request: &ListRequest) -> Result<Box<dyn DocumentStream>, SourceError>;
}

#[async_trait]
pub trait DocumentStream: Send {
    fn order(&self) -> SourceOrder;

    /// Next page of documents, or `None` once exhausted.
    async fn next_page(&mut self) -> Result<Option<Vec<Document>>, SourceError>;
}

/// Bounded exponential backoff for transient source failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            ..Self::default()
        }
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide what to do after a failed attempt: wait and retry, or give up.
    fn on_failure(&self, what: &str, attempt: u32, err: SourceError) -> EngineResult<Duration> {
        match err {
            SourceError::Fatal(message) => Err(EngineError::FatalSource(message)),
            SourceError::Transient(message) if attempt >= self.max_attempts => {
                Err(EngineError::TransientSource {
                    attempts: attempt,
                    message,
                })
            }
            SourceError::Transient(message) => {
                let delay = self.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "{what} failed, retrying");
                Ok(delay)
            }
        }
    }
}

/// Open a stream, retrying transient failures.
pub async fn open_with_retry(
    source: &dyn DocumentSource,
    request: &ListRequest,
    policy: &RetryPolicy,
) -> EngineResult<Box<dyn DocumentStream>> {
    let mut attempt = 1;
    loop {
        match source.open(request).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                let delay = policy.on_failure("opening mailbox listing", attempt, err)?;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Fetch the next page, retrying transient failures.
pub async fn next_page_with_retry(
    stream: &mut dyn DocumentStream,
    policy: &RetryPolicy,
) -> EngineResult<Option<Vec<Document>>> {
    let mut attempt = 1;
    loop {
        match stream.next_page().await {
            Ok(page) => return Ok(page),
            Err(err) => {
                let delay = policy.on_failure("fetching mailbox page", attempt, err)?;
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        failures: u32,
        fatal: bool,
        calls: u32,
    }

    #[async_trait]
    impl DocumentStream for Flaky {
        fn order(&self) -> SourceOrder {
            SourceOrder::Ascending
        }

        async fn next_page(&mut self) -> Result<Option<Vec<Document>>, SourceError> {
            self.calls += 1;
            if self.calls <= self.failures {
                if self.fatal {
                    return Err(SourceError::Fatal("bad filter".into()));
                }
                return Err(SourceError::Transient("HTTP 429".into()));
            }
            Ok(Some(Vec::new()))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut stream = Flaky {
            failures: 2,
            fatal: false,
            calls: 0,
        };
        let page = next_page_with_retry(&mut stream, &fast_policy(3))
            .await
            .unwrap();
        assert!(page.is_some());
        assert_eq!(stream.calls, 3);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempts() {
        let mut stream = Flaky {
            failures: 5,
            fatal: false,
            calls: 0,
        };
        let err = next_page_with_retry(&mut stream, &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TransientSource { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mut stream = Flaky {
            failures: 1,
            fatal: true,
            calls: 0,
        };
        let err = next_page_with_retry(&mut stream, &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FatalSource(_)));
        assert_eq!(stream.calls, 1);
    }
}
