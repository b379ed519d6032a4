
use std::time::Duration;

use tracing::{debug, warn};

pub(crate) const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub(crate) const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Retry budget for one logical request against a remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Failure surfaced once the retry budget is exhausted (or immediately, for
/// errors that retrying cannot fix)
#[derive(Debug)]
pub(crate) struct RetryError {
    pub attempts: u32,
    pub message: String,
}

/// Delay before the retry following `attempt` (1-based), doubling each time
pub(crate) fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    policy.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Run `request_fn` until it succeeds or the retry budget is spent.
///
/// Rate limiting (429), server errors (5xx), timeouts, and transport errors
/// are transient; any other HTTP status fails immediately. The caller maps
/// the resulting [`RetryError`] into its own service-unavailable variant.
pub(crate) fn request_with_retry<T, F>(
    policy: &RetryPolicy,
    mut request_fn: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> std::result::Result<T, ureq::Error>,
{
    let mut last_message = String::new();

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{}", attempt, policy.attempts);

        match request_fn() {
            Ok(response) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response);
            }
            Err(error) => {
                let transient = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status == 429 || *status >= 500 {
                            warn!(
                                "Server busy or failing (status {}), attempt {}/{}",
                                status, attempt, policy.attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(RetryError {
                                attempts: attempt,
                                message: format!("HTTP {}", status),
                            });
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, policy.attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !transient {
                    return Err(RetryError {
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }

                last_message = error.to_string();

                if attempt < policy.attempts {
                    let delay = backoff_delay(policy, attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    Err(RetryError {
        attempts: policy.attempts,
        message: last_message,
    })
}

/// Build a blocking HTTP agent with a global request timeout
pub(crate) fn agent_with_timeout(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
