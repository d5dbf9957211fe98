//! Error taxonomy and backoff-retry (§4.A).
//!
//! Every error that can arise while driving a test case is classified into
//! one of three categories before it is allowed to cross a retry boundary.
//! Only [`ErrorCategory::Infrastructure`] errors are retried; the other two
//! are conservative defaults that halt the enclosing action immediately.

use std::fmt;
use std::io;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Adds up to 25% random jitter to a backoff delay, so a batch of retrying
/// connections doesn't all wake up and hammer the device at once.
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0..1.25);
    delay.mul_f64(factor)
}

/// The three-way taxonomy from spec.md §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network I/O, timeouts, device-busy/cooldown, TLS handshake failures.
    /// Retryable.
    Infrastructure,
    /// Explicit DUT rejection. Not retryable.
    Device,
    /// Malformed frames, decode errors, anything unclassified. Not
    /// retryable (conservative default).
    Protocol,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Infrastructure)
    }
}

/// A classified error, carrying its category through unwrap chains so any
/// retry boundary can decide without re-inspecting the underlying cause.
#[derive(Debug, Error)]
#[error("{category:?} error: {message}")]
pub struct MashError {
    pub category: ErrorCategory,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MashError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        MashError {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Infrastructure, message)
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Device, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, message)
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Classify a raw I/O error per the rules in spec.md §4.A: EOF, reset,
/// refused, deadline-exceeded, and broken-pipe are Infrastructure; anything
/// else falls back to Protocol, since an unclassified I/O error is not
/// something we know is safe to retry against a real device.
pub fn classify_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind::*;
    match error.kind() {
        UnexpectedEof | ConnectionReset | ConnectionAborted | ConnectionRefused
        | TimedOut | BrokenPipe | NotConnected => ErrorCategory::Infrastructure,
        _ => ErrorCategory::Protocol,
    }
}

/// PASE error codes from spec.md §4.F: code 5 (busy) is Infrastructure,
/// codes 1-4 and 10 are Device, anything else is Protocol.
pub fn classify_pase_error_code(code: u32) -> ErrorCategory {
    match code {
        5 => ErrorCategory::Infrastructure,
        1..=4 | 10 => ErrorCategory::Device,
        _ => ErrorCategory::Protocol,
    }
}

/// Classify a free-form device message against the phrase rules in §4.A.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("cooldown active") || lower.contains("commissioning already in progress") {
        ErrorCategory::Infrastructure
    } else if lower.contains("zone slots full") {
        ErrorCategory::Device
    } else {
        ErrorCategory::Protocol
    }
}

/// Backoff configuration for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub const fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        RetryConfig {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// The configuration `dialWithRetry` wraps `retryWithBackoff` with in
    /// spec.md §4.A.
    pub const fn dial_defaults(max_attempts: usize) -> Self {
        RetryConfig::new(
            max_attempts,
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let scaled = self.base_delay.saturating_mul(factor);
        let capped = scaled.min(self.max_delay);
        jitter(capped).min(self.max_delay)
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig(attempts={}, base={:?}, max={:?})",
            self.max_attempts, self.base_delay, self.max_delay
        )
    }
}

/// Classifies the errors produced by a retried operation.
pub trait Classify {
    fn category(&self) -> ErrorCategory;
}

impl Classify for MashError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// Call `fn` up to `cfg.max_attempts` times, sleeping with exponential
/// backoff between attempts, per spec.md §4.A:
///
/// - stops immediately on any non-Infrastructure classified error;
/// - honors cancellation at each sleep, returning the cancellation error;
/// - never sleeps after the final attempt;
/// - rejects `max_attempts == 0` up front.
pub async fn retry_with_backoff<T, E, F, Fut>(
    cfg: RetryConfig,
    cancel: &tokio_util::sync::CancellationToken,
    mut f: F,
) -> Result<T, RetryOutcome<E>>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    if cfg.max_attempts == 0 {
        return Err(RetryOutcome::InvalidConfig);
    }

    let mut last_err = None;
    for attempt in 0..cfg.max_attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let category = err.category();
                if !category.is_retryable() {
                    debug!(?category, "retry loop: non-retryable error, stopping");
                    return Err(RetryOutcome::Permanent(err));
                }
                last_err = Some(err);

                let is_last_attempt = attempt + 1 == cfg.max_attempts;
                if is_last_attempt {
                    break;
                }

                let delay = cfg.delay_for_attempt(attempt);
                warn!(attempt, ?delay, "retry loop: infrastructure error, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryOutcome::Cancelled),
                }
            }
        }
    }

    // Unwrap is safe: the loop only exits without returning when
    // `last_err` has been set on every non-final iteration and the loop
    // ran at least once (max_attempts > 0 was checked above).
    Err(RetryOutcome::Exhausted(last_err.expect(
        "retry loop exhausted without recording an error",
    )))
}

/// The three ways a retry loop can end without producing a value.
#[derive(Debug, Error)]
pub enum RetryOutcome<E> {
    #[error("MaxAttempts must be greater than zero")]
    InvalidConfig,
    #[error("retry cancelled")]
    Cancelled,
    #[error("non-retryable error")]
    Permanent(E),
    #[error("retries exhausted")]
    Exhausted(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestErr(ErrorCategory);
    impl Classify for TestErr {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    #[tokio::test]
    async fn max_attempts_zero_is_rejected_without_calling_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cfg = RetryConfig::new(0, Duration::from_millis(1), Duration::from_millis(1));
        let result: Result<(), RetryOutcome<TestErr>> = retry_with_backoff(cfg, &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(matches!(result, Err(RetryOutcome::InvalidConfig)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stops_immediately_on_device_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cfg = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(1));
        let result: Result<(), RetryOutcome<TestErr>> = retry_with_backoff(cfg, &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestErr(ErrorCategory::Device))
            }
        })
        .await;
        assert!(matches!(result, Err(RetryOutcome::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_and_no_more() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cfg = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let result: Result<(), RetryOutcome<TestErr>> = retry_with_backoff(cfg, &cancel, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestErr(ErrorCategory::Infrastructure))
            }
        })
        .await;
        assert!(matches!(result, Err(RetryOutcome::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_infrastructure_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cfg = RetryConfig::new(5, Duration::from_millis(1), Duration::from_millis(2));
        let result = retry_with_backoff(cfg, &cancel, || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestErr(ErrorCategory::Infrastructure))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn classifies_io_errors() {
        assert_eq!(
            classify_io_error(&io::Error::new(io::ErrorKind::ConnectionReset, "x")),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            classify_io_error(&io::Error::new(io::ErrorKind::InvalidData, "x")),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn classifies_pase_codes() {
        assert_eq!(classify_pase_error_code(5), ErrorCategory::Infrastructure);
        assert_eq!(classify_pase_error_code(2), ErrorCategory::Device);
        assert_eq!(classify_pase_error_code(99), ErrorCategory::Protocol);
    }

    #[test]
    fn classifies_messages() {
        assert_eq!(
            classify_message("Cooldown active, try later"),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            classify_message("zone slots full"),
            ErrorCategory::Device
        );
        assert_eq!(classify_message("garbled nonsense"), ErrorCategory::Protocol);
    }
}
