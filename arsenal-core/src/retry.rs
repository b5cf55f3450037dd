//! Retry policy for network-facing operations
//!
//! Update strategies and the reasoning service share the same transient-error
//! classification: DNS/TLS/timeout style failures get one more attempt with
//! backoff, permanent failures (auth, bad request) surface immediately.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy for reasoning-service calls (more patient than tool updates)
    pub fn reasoning() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Classify an error message as transient (retriable) or permanent
pub fn is_transient_error(error_message: &str) -> bool {
    let lower = error_message.to_lowercase();

    let transient_patterns = [
        // HTTP 5xx server errors
        "500",
        "502",
        "503",
        "504",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
        // Rate limiting
        "429",
        "rate limit",
        "too many requests",
        // Connection issues
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "could not resolve",
        "name resolution",
        "network error",
        "tls handshake",
        // Provider overload
        "overloaded",
        "temporarily unavailable",
        "try again",
    ];

    transient_patterns
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Build an exponential backoff strategy from configuration
pub fn build_backoff(config: &RetryConfig) -> ExponentialBuilder {
    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_max_times(config.max_retries);

    if config.jitter {
        builder = builder.with_jitter();
    }

    builder
}
