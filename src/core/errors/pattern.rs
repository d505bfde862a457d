//! Ordered error-classification table. Patterns are matched against the raw
//! failure message, case-insensitively, first match wins. Unmatched messages
//! fall back to `system` / `medium` / `manual_intervention`.

use crate::base::{ErrorCategory, RecoveryStrategy, Severity};
use crate::config::DEFAULT_BREAKER_FAILURE_THRESHOLD;
use crate::Result;
use lazy_static::lazy_static;
use regex::RegexBuilder;

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub category: ErrorCategory,
    pub pattern: regex::Regex,
    pub severity: Severity,
    pub strategy: RecoveryStrategy,
    /// Budget of `attempt_recovery` calls for errors matching this row.
    pub max_retries: u32,
    /// Fixed delay before each recovery attempt.
    pub retry_delay_ms: u64,
    /// Failure count opening the breaker when `strategy` is `CircuitBreaker`.
    pub breaker_threshold: u32,
}

impl ErrorPattern {
    pub fn new(
        category: ErrorCategory,
        pattern: &str,
        severity: Severity,
        strategy: RecoveryStrategy,
    ) -> Result<Self> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(ErrorPattern {
            category,
            pattern,
            severity,
            strategy,
            max_retries: 0,
            retry_delay_ms: 0,
            breaker_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
        })
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_breaker_threshold(mut self, threshold: u32) -> Self {
        self.breaker_threshold = threshold;
        self
    }
}

/// `classify` returns the first pattern matching `message`, or `None` for
/// the fallback classification.
pub fn classify<'a>(patterns: &'a [ErrorPattern], message: &str) -> Option<&'a ErrorPattern> {
    patterns.iter().find(|p| p.pattern.is_match(message))
}

lazy_static! {
    /// The built-in classification table. Order matters: rows earlier in the
    /// table shadow later ones.
    pub static ref DEFAULT_PATTERNS: Vec<ErrorPattern> = build_default_patterns();
}

fn build_default_patterns() -> Vec<ErrorPattern> {
    use ErrorCategory::*;
    use RecoveryStrategy::*;
    use Severity::*;

    vec![
        ErrorPattern::new(Network, r"timeout|timed out", Medium, Retry)
            .unwrap()
            .with_retries(3, 1_000),
        ErrorPattern::new(
            Network,
            r"connection (refused|reset)|econnrefused|econnreset|network unreachable",
            High,
            Retry,
        )
        .unwrap()
        .with_retries(3, 2_000),
        ErrorPattern::new(
            Database,
            r"database connection|connection pool|too many connections|connection terminated",
            Critical,
            CircuitBreaker,
        )
        .unwrap()
        .with_retries(2, 5_000)
        .with_breaker_threshold(5),
        ErrorPattern::new(Database, r"deadlock|lock wait timeout", High, Retry)
            .unwrap()
            .with_retries(2, 500),
        ErrorPattern::new(
            Database,
            r"unique constraint|duplicate key|foreign key|violates",
            Medium,
            ManualIntervention,
        )
        .unwrap(),
        ErrorPattern::new(
            Authentication,
            r"invalid credentials|authentication failed|invalid token|token expired|jwt",
            High,
            ManualIntervention,
        )
        .unwrap(),
        ErrorPattern::new(
            Authorization,
            r"permission denied|access denied|forbidden|unauthorized",
            High,
            ManualIntervention,
        )
        .unwrap(),
        ErrorPattern::new(
            Validation,
            r"validation|invalid input|bad request|missing required",
            Low,
            ManualIntervention,
        )
        .unwrap(),
        ErrorPattern::new(
            RateLimit,
            r"rate limit|too many requests|quota exceeded",
            Medium,
            GracefulDegradation,
        )
        .unwrap(),
        ErrorPattern::new(
            ExternalApi,
            r"upstream|bad gateway|service unavailable|gateway timeout|external api",
            High,
            CircuitBreaker,
        )
        .unwrap()
        .with_retries(2, 3_000)
        .with_breaker_threshold(5),
        ErrorPattern::new(
            System,
            r"out of memory|heap limit|memory limit",
            Critical,
            GracefulDegradation,
        )
        .unwrap(),
    ]
}
