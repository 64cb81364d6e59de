//! Bounded retry with exponential backoff and jitter.
//!
//! [`retry_with_backoff`] wraps any fallible async operation. Failures are
//! classified through [`CrawlError::kind`]:
//!
//! - [`ErrorKind::Retryable`] (timeouts, connection resets, 5xx, 429): sleep
//!   for the computed backoff, then retry.
//! - [`ErrorKind::SessionExpired`]: run the supplied re-authentication step,
//!   then retry. Re-authentication failures (typically
//!   [`CrawlError::AuthRequired`]) are returned as-is.
//! - everything else: returned immediately.
//!
//! When every attempt fails the last error is wrapped in
//! [`CrawlError::Exhausted`].

use std::future::Future;
use std::time::Duration;

use jdcrawl_core::RetrySettings;

use crate::error::{CrawlError, ErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Fractional jitter: each delay is scaled by a random factor in
    /// `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.25,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_base_ms),
            multiplier: settings.backoff_multiplier,
            jitter: settings.backoff_jitter.clamp(0.0, 1.0),
            max_delay: Duration::from_millis(settings.backoff_max_ms),
        }
    }

    /// A policy with no delays between attempts.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based):
    /// `base * multiplier^(retry - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1).min(30)).unwrap_or(30);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let scaled = self.base_delay.as_secs_f64() * factor;
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jittered_delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = 1.0 - self.jitter + rand::random::<f64>() * 2.0 * self.jitter;
        nominal.mul_f64(factor.max(0.0))
    }
}

/// Runs `operation` under `policy`.
///
/// `operation` receives the 1-based attempt number. `reauthenticate` is only
/// called after a [`CrawlError::SessionExpired`] and before the next attempt;
/// no backoff sleep is applied in that case.
///
/// A `retry_after_secs` hint on [`CrawlError::RateLimited`] raises the sleep
/// to at least that long.
///
/// # Errors
///
/// Returns the first non-retriable error, any error from `reauthenticate`,
/// or [`CrawlError::Exhausted`] once `policy.max_attempts` attempts failed.
pub async fn retry_with_backoff<T, F, Fut, R, RFut>(
    policy: &RetryPolicy,
    mut operation: F,
    mut reauthenticate: R,
) -> Result<T, CrawlError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CrawlError>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<(), CrawlError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let kind = err.kind();
        if !matches!(kind, ErrorKind::Retryable | ErrorKind::SessionExpired) {
            return Err(err);
        }

        if attempt >= max_attempts {
            tracing::warn!(attempt, error = %err, "retry budget exhausted");
            return Err(CrawlError::Exhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        if kind == ErrorKind::SessionExpired {
            tracing::warn!(attempt, error = %err, "session expired, re-authenticating before retry");
            reauthenticate().await?;
            continue;
        }

        let mut delay = policy.jittered_delay(attempt);
        if let CrawlError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = &err
        {
            delay = delay.max(Duration::from_secs(*secs));
        }
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms,
            error = %err,
            "transient crawl error, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn server_error() -> CrawlError {
        CrawlError::ServerError {
            status: 503,
            url: "https://api.example.com/".to_owned(),
        }
    }

    async fn no_reauth() -> Result<(), CrawlError> {
        panic!("reauthenticate must not be called")
    }

    #[test]
    fn nominal_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(200));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(400));
        assert_eq!(policy.nominal_delay(4), Duration::from_millis(500));
        assert_eq!(policy.nominal_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter: 0.25,
            max_delay: Duration::from_secs(60),
        };
        for _ in 0..200 {
            let d = policy.jittered_delay(1);
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn from_settings_clamps_attempts_and_jitter() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 0,
            backoff_base_ms: 250,
            backoff_multiplier: 3.0,
            backoff_jitter: 4.0,
            backoff_max_ms: 10_000,
        });
        assert_eq!(policy.max_attempts, 1);
        assert!((policy.jitter - 1.0).abs() < f64::EPSILON);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(3),
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, CrawlError>(42)
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(5),
            |attempt| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(server_error())
                    } else {
                        Ok::<u32, CrawlError>(attempt)
                    }
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(4),
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, CrawlError>(server_error())
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(CrawlError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, CrawlError::ServerError { status: 503, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(5),
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, CrawlError>(CrawlError::UnexpectedStatus {
                        status: 403,
                        url: "https://api.example.com/".to_owned(),
                    })
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(CrawlError::UnexpectedStatus { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn schema_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(5),
            |_| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, CrawlError>(CrawlError::schema("reviews", "missing comments"))
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CrawlError::Schema { .. })));
    }

    #[tokio::test]
    async fn session_expiry_triggers_reauthentication_then_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let reauths = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let r = Arc::clone(&reauths);
        let result = retry_with_backoff(
            &RetryPolicy::immediate(5),
            |attempt| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        Err(CrawlError::SessionExpired {
                            url: "https://api.example.com/".to_owned(),
                        })
                    } else {
                        Ok::<&str, CrawlError>("body")
                    }
                }
            },
            || {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_reauthentication_surfaces_auth_required() {
        let result = retry_with_backoff(
            &RetryPolicy::immediate(5),
            |_| async {
                Err::<u32, CrawlError>(CrawlError::SessionExpired {
                    url: "https://api.example.com/".to_owned(),
                })
            },
            || async {
                Err(CrawlError::AuthRequired {
                    reason: "no operator".to_owned(),
                })
            },
        )
        .await;
        assert!(matches!(result, Err(CrawlError::AuthRequired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_extends_backoff() {
        let started = tokio::time::Instant::now();
        let result = retry_with_backoff(
            &RetryPolicy::immediate(2),
            |attempt| async move {
                if attempt == 1 {
                    Err(CrawlError::RateLimited {
                        url: "https://api.example.com/".to_owned(),
                        retry_after_secs: Some(7),
                    })
                } else {
                    Ok::<u32, CrawlError>(attempt)
                }
            },
            no_reauth,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert!(started.elapsed() >= Duration::from_secs(7));
    }
}
