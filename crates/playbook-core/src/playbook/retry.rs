//! Error classification and retry decisions for step execution.
//!
//! Stateless: every decision is a pure function of the step's
//! `RetryPolicy`, its `ErrorStrategy`, the classified error and the
//! attempt number (1-based, the first execution is attempt 1).

use playbook_types::execution::ErrorKind;
use playbook_types::playbook::{Backoff, ErrorStrategy, RetryPolicy};

use crate::tool::ToolError;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify an error message by keyword. Unmatched messages are `Unknown`.
pub fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if has(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if has(&["rate limit", "rate-limit", "429", "too many requests"]) {
        ErrorKind::RateLimit
    } else if has(&["connection", "network", "refused", "dns"]) {
        ErrorKind::Network
    } else if has(&["not found", "404"]) {
        ErrorKind::NotFound
    } else if has(&["permission", "forbidden", "unauthorized", "401", "403"]) {
        ErrorKind::Permission
    } else if has(&["invalid", "validation", "400"]) {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

/// Classify a tool error: its explicit kind wins, else the message decides.
pub fn classify(error: &ToolError) -> ErrorKind {
    error.kind.unwrap_or_else(|| classify_message(&error.message))
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether a failed `attempt` should be followed by another one.
    ///
    /// Only `retry_then_*` strategies retry; non-retryable kinds never do.
    pub fn should_retry(
        policy: &RetryPolicy,
        strategy: ErrorStrategy,
        kind: ErrorKind,
        attempt: u32,
    ) -> bool {
        strategy.retries() && attempt <= policy.max_retries && !policy.non_retryable.contains(&kind)
    }

    /// Whether a failure after `attempts` attempts used up the retry budget.
    pub fn retries_exhausted(policy: &RetryPolicy, strategy: ErrorStrategy, attempts: u32) -> bool {
        strategy.retries() && attempts > policy.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Fixed backoff waits `base_delay_ms`; exponential doubles it per retry.
    /// Both are capped at `max_delay_ms`. A `retry_after_ms` hint extends the
    /// delay and is not capped.
    pub fn delay_ms(policy: &RetryPolicy, retry: u32, retry_after_ms: Option<u64>) -> u64 {
        let computed = match policy.backoff {
            Backoff::Fixed => policy.base_delay_ms,
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
                policy.base_delay_ms.saturating_mul(factor)
            }
        }
        .min(policy.max_delay_ms);

        retry_after_ms.map_or(computed, |hint| computed.max(hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn classifies_by_keyword() {
        assert_eq!(classify_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("Connection refused"), ErrorKind::Network);
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify_message("repo not found"), ErrorKind::NotFound);
        assert_eq!(classify_message("403 Forbidden"), ErrorKind::Permission);
        assert_eq!(classify_message("invalid label name"), ErrorKind::Validation);
        assert_eq!(classify_message("boom"), ErrorKind::Unknown);
    }

    #[test]
    fn explicit_kind_wins() {
        let err = ToolError::with_kind("invalid response", ErrorKind::Network);
        assert_eq!(classify(&err), ErrorKind::Network);
        assert_eq!(classify(&ToolError::new("invalid response")), ErrorKind::Validation);
    }

    #[test]
    fn retries_only_for_retry_strategies() {
        let p = policy(2, Backoff::Fixed);
        assert!(RetryHandler::should_retry(&p, ErrorStrategy::RetryThenStop, ErrorKind::Network, 1));
        assert!(RetryHandler::should_retry(&p, ErrorStrategy::RetryThenContinue, ErrorKind::Network, 2));
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::RetryThenStop, ErrorKind::Network, 3));
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::StopWorkflow, ErrorKind::Network, 1));
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::ContinueOnError, ErrorKind::Network, 1));
    }

    #[test]
    fn non_retryable_kind_is_not_retried() {
        let p = policy(2, Backoff::Fixed);
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::RetryThenStop, ErrorKind::Validation, 1));
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::RetryThenStop, ErrorKind::Permission, 1));
        assert!(!RetryHandler::should_retry(&p, ErrorStrategy::RetryThenStop, ErrorKind::NotFound, 1));
    }

    #[test]
    fn exhaustion() {
        let p = policy(2, Backoff::Fixed);
        assert!(RetryHandler::retries_exhausted(&p, ErrorStrategy::RetryThenStop, 3));
        assert!(!RetryHandler::retries_exhausted(&p, ErrorStrategy::RetryThenStop, 1));
        assert!(!RetryHandler::retries_exhausted(&p, ErrorStrategy::StopWorkflow, 3));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let p = policy(10, Backoff::Exponential);
        assert_eq!(RetryHandler::delay_ms(&p, 1, None), 100);
        assert_eq!(RetryHandler::delay_ms(&p, 2, None), 200);
        assert_eq!(RetryHandler::delay_ms(&p, 3, None), 400);
        assert_eq!(RetryHandler::delay_ms(&p, 5, None), 1_000);
        assert_eq!(RetryHandler::delay_ms(&p, 80, None), 1_000);
    }

    #[test]
    fn fixed_delay_and_hint() {
        let p = policy(3, Backoff::Fixed);
        assert_eq!(RetryHandler::delay_ms(&p, 3, None), 100);
        assert_eq!(RetryHandler::delay_ms(&p, 1, Some(50)), 100);
        assert_eq!(RetryHandler::delay_ms(&p, 1, Some(5_000)), 5_000);
    }
}
