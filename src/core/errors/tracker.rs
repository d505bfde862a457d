//! Error classifier and recovery tracker. Raw failures are matched against
//! the pattern table, appended to a bounded ledger and, depending on the
//! matched strategy, fed into the circuit breaker registry. Recovery is
//! orchestrated one attempt at a time; callers re-invoke `attempt_recovery`
//! up to the budget carried by the record.

use super::pattern::{classify, ErrorPattern, DEFAULT_PATTERNS};
use crate::base::{
    ErrorCategory, OpContext, RecoveryStrategy, SecurityEvent, SecurityEventSink, Severity,
};
use crate::circuitbreaker::{Admission, BreakerRegistry, BreakerSnapshot, State};
use crate::config::TrackerConfig;
use crate::health::HealthStatus;
use crate::{logging, utils, Error};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const RECENT_CRITICAL_WINDOW_MS: u64 = 15 * 60 * 1000;
const UNHEALTHY_CRITICAL_COUNT: usize = 5;
const TOP_MESSAGE_COUNT: usize = 10;

/// A classified failure record. `recovery_attempts` never exceeds
/// `max_recovery_attempts`, and once `resolved` a record is never
/// un-resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedError {
    pub id: String,
    pub timestamp_ms: u64,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub service: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub recovery_strategy: RecoveryStrategy,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Reasons `attempt_recovery` refuses to run the recovery operation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("error {0} not found")]
    NotFound(String),
    #[error("Max recovery attempts reached")]
    MaxAttemptsReached,
    #[error("Circuit breaker open")]
    CircuitBreakerOpen,
}

/// Outcome of one admitted recovery attempt.
#[derive(Debug)]
pub struct RecoveryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> RecoveryOutcome<T> {
    fn succeeded(result: T) -> Self {
        RecoveryOutcome {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    fn failed(err: &Error) -> Self {
        RecoveryOutcome {
            success: false,
            result: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageCount {
    pub message: String,
    pub count: usize,
}

/// Aggregate view over the ledger for one time window.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub resolved: usize,
    pub unresolved: usize,
    pub top_messages: Vec<MessageCount>,
}

/// `ErrorTracker` owns the error ledger and the breaker registry. Construct
/// one per process (or per test) and share it behind an `Arc`; there is no
/// hidden global instance.
pub struct ErrorTracker {
    config: TrackerConfig,
    patterns: Vec<ErrorPattern>,
    ledger: Mutex<VecDeque<TrackedError>>,
    breakers: BreakerRegistry,
    security_sink: Option<Arc<dyn SecurityEventSink>>,
}

impl ErrorTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_patterns(config, DEFAULT_PATTERNS.clone())
    }

    pub fn with_patterns(config: TrackerConfig, patterns: Vec<ErrorPattern>) -> Self {
        ErrorTracker {
            config,
            patterns,
            ledger: Mutex::new(VecDeque::new()),
            breakers: BreakerRegistry::new(),
            security_sink: None,
        }
    }

    pub fn with_security_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.security_sink = Some(sink);
        self
    }

    /// `track_error` classifies a failure and appends it to the ledger.
    /// It never fails: classification falls back to
    /// `system`/`medium`/`manual_intervention` for unmatched messages, and
    /// collaborator failures (logger, security sink) are swallowed locally.
    pub fn track_error(&self, err: &Error, ctx: &OpContext) -> TrackedError {
        let message = err.to_string();
        let matched = classify(&self.patterns, &message);
        let (category, severity, strategy, max_retries, breaker_threshold) = match matched {
            Some(p) => (
                p.category,
                p.severity,
                p.strategy,
                p.max_retries,
                p.breaker_threshold,
            ),
            None => (
                ErrorCategory::System,
                Severity::Medium,
                RecoveryStrategy::ManualIntervention,
                0,
                self.config.breaker_failure_threshold,
            ),
        };

        let record = TrackedError {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: utils::curr_time_millis(),
            category,
            severity,
            message: message.clone(),
            service: ctx.service.clone(),
            operation: ctx.operation.clone(),
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            request_id: ctx.request_id.clone(),
            metadata: ctx.metadata.clone(),
            recovery_strategy: strategy,
            recovery_attempts: 0,
            max_recovery_attempts: max_retries,
            resolved: false,
            resolution: None,
        };

        {
            let mut ledger = self.ledger.lock().unwrap();
            if ledger.len() >= self.config.ledger_capacity {
                ledger.pop_front();
            }
            ledger.push_back(record.clone());
        }

        self.log_record(&record);

        if category.is_security_relevant() {
            self.emit_security_event(&record);
        }

        if strategy == RecoveryStrategy::CircuitBreaker {
            self.breakers.record_failure(
                &ctx.breaker_key(),
                breaker_threshold,
                self.config.breaker_timeout_ms,
            );
        }

        record
    }

    fn log_record(&self, record: &TrackedError) {
        match record.severity {
            Severity::Critical | Severity::High => logging::error!(
                "[ErrorTracker] {} error in {}:{}, id: {}, message: {}",
                record.category,
                record.service,
                record.operation,
                record.id,
                record.message
            ),
            Severity::Medium => logging::warn!(
                "[ErrorTracker] {} error in {}:{}, id: {}, message: {}",
                record.category,
                record.service,
                record.operation,
                record.id,
                record.message
            ),
            Severity::Low => logging::info!(
                "[ErrorTracker] {} error in {}:{}, id: {}, message: {}",
                record.category,
                record.service,
                record.operation,
                record.id,
                record.message
            ),
        }
    }

    // fire-and-forget: a sink failure must never affect tracking
    fn emit_security_event(&self, record: &TrackedError) {
        let sink = match &self.security_sink {
            Some(sink) => sink,
            None => return,
        };
        let event = SecurityEvent {
            kind: format!("{}_failure", record.category),
            severity: record.severity,
            source: record.service.clone(),
            details: json!({
                "operation": record.operation,
                "message": record.message,
                "error_id": record.id,
                "request_id": record.request_id,
            }),
            tenant_id: record.tenant_id.clone(),
            user_id: record.user_id.clone(),
        };
        if let Err(err) = sink.record(event) {
            logging::warn!(
                "[ErrorTracker] security event sink failed for {}: {:?}",
                record.id,
                err
            );
        }
    }

    /// `attempt_recovery` runs one bounded recovery attempt for a tracked
    /// error. Refusals (unknown id, exhausted budget, open breaker) are
    /// returned without invoking `recovery_op`; an admitted attempt waits
    /// the pattern's fixed retry delay and invokes `recovery_op` exactly
    /// once. There is no internal retry loop.
    pub async fn attempt_recovery<T, F, Fut>(
        &self,
        error_id: &str,
        recovery_op: F,
    ) -> Result<RecoveryOutcome<T>, RecoveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        // admission and bookkeeping under the ledger lock, released before
        // any await point
        let (key, message) = {
            let mut ledger = self.ledger.lock().unwrap();
            let record = ledger
                .iter_mut()
                .find(|e| e.id == error_id)
                .ok_or_else(|| RecoveryError::NotFound(error_id.into()))?;
            if record.recovery_attempts >= record.max_recovery_attempts {
                return Err(RecoveryError::MaxAttemptsReached);
            }
            let key = format!("{}:{}", record.service, record.operation);
            match self.breakers.check_admission(&key) {
                Admission::Rejected => return Err(RecoveryError::CircuitBreakerOpen),
                Admission::Allowed | Admission::Probe => {}
            }
            record.recovery_attempts += 1;
            (key, record.message.clone())
        };

        let pattern = classify(&self.patterns, &message);
        let retry_delay_ms = pattern.map(|p| p.retry_delay_ms).unwrap_or(0);
        let breaker_threshold = pattern
            .map(|p| p.breaker_threshold)
            .unwrap_or(self.config.breaker_failure_threshold);

        if retry_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
        }

        match recovery_op().await {
            Ok(value) => {
                self.breakers.record_success(&key);
                self.resolve_error(error_id, "Recovered automatically");
                logging::info!("[ErrorTracker] recovery succeeded for {}", error_id);
                Ok(RecoveryOutcome::succeeded(value))
            }
            Err(err) => {
                logging::warn!(
                    "[ErrorTracker] recovery attempt failed for {}: {}",
                    error_id,
                    err
                );
                self.breakers.record_failure(
                    &key,
                    breaker_threshold,
                    self.config.breaker_timeout_ms,
                );
                Ok(RecoveryOutcome::failed(&err))
            }
        }
    }

    /// `resolve_error` is idempotent: the first call fixes the resolution
    /// text and returns true; later calls (and unknown ids) return false.
    pub fn resolve_error(&self, error_id: &str, resolution: &str) -> bool {
        let mut ledger = self.ledger.lock().unwrap();
        match ledger.iter_mut().find(|e| e.id == error_id) {
            Some(record) if !record.resolved => {
                record.resolved = true;
                record.resolution = Some(resolution.into());
                logging::info!(
                    "[ErrorTracker] {} resolved: {}",
                    error_id,
                    resolution
                );
                true
            }
            _ => false,
        }
    }

    /// `get_recent_errors` returns up to `limit` records, newest first,
    /// optionally filtered by category, severity and resolution state.
    pub fn get_recent_errors(
        &self,
        limit: usize,
        category: Option<ErrorCategory>,
        severity: Option<Severity>,
        resolved: Option<bool>,
    ) -> Vec<TrackedError> {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .iter()
            .rev()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .filter(|e| resolved.map_or(true, |r| e.resolved == r))
            .take(limit)
            .cloned()
            .collect()
    }

    /// `get_error_stats` aggregates the ledger over the trailing `window`.
    pub fn get_error_stats(&self, window: Duration) -> ErrorStats {
        let cutoff = utils::curr_time_millis().saturating_sub(window.as_millis() as u64);
        let ledger = self.ledger.lock().unwrap();

        let mut stats = ErrorStats {
            total: 0,
            by_category: HashMap::new(),
            by_severity: HashMap::new(),
            resolved: 0,
            unresolved: 0,
            top_messages: Vec::new(),
        };
        let mut message_counts: HashMap<&str, usize> = HashMap::new();
        for record in ledger.iter().filter(|e| e.timestamp_ms >= cutoff) {
            stats.total += 1;
            *stats
                .by_category
                .entry(record.category.to_string())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(record.severity.to_string())
                .or_insert(0) += 1;
            if record.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *message_counts.entry(record.message.as_str()).or_insert(0) += 1;
        }

        let mut messages: Vec<MessageCount> = message_counts
            .into_iter()
            .map(|(message, count)| MessageCount {
                message: message.into(),
                count,
            })
            .collect();
        messages.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        messages.truncate(TOP_MESSAGE_COUNT);
        stats.top_messages = messages;
        stats
    }

    pub fn circuit_breaker_status(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot()
    }

    pub fn reset_circuit_breaker(&self, service: &str, operation: &str) -> bool {
        self.breakers.reset(&format!("{}:{}", service, operation))
    }

    /// `with_error_tracking` runs `op` once; on failure the error is
    /// classified and, for retry-strategy errors with a positive budget,
    /// `attempt_recovery` is called exactly once with the same `op`. The
    /// recovered value is returned on success, otherwise the **original**
    /// failure — never a secondary recovery error. `op` runs at most twice.
    pub async fn with_error_tracking<T, F, Fut>(&self, ctx: &OpContext, op: F) -> crate::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(original) => {
                let record = self.track_error(&original, ctx);
                if record.recovery_strategy == RecoveryStrategy::Retry
                    && record.max_recovery_attempts > 0
                {
                    if let Ok(outcome) = self.attempt_recovery(&record.id, || op()).await {
                        if outcome.success {
                            if let Some(value) = outcome.result {
                                return Ok(value);
                            }
                        }
                    }
                }
                Err(original)
            }
        }
    }

    /// Self-check consumed by the health aggregator.
    pub fn health(&self) -> (HealthStatus, serde_json::Value) {
        let cutoff = utils::curr_time_millis().saturating_sub(RECENT_CRITICAL_WINDOW_MS);
        let (recent_critical, unresolved_total) = {
            let ledger = self.ledger.lock().unwrap();
            let recent_critical = ledger
                .iter()
                .filter(|e| {
                    !e.resolved && e.severity == Severity::Critical && e.timestamp_ms >= cutoff
                })
                .count();
            let unresolved_total = ledger.iter().filter(|e| !e.resolved).count();
            (recent_critical, unresolved_total)
        };
        let open_breakers = self
            .breakers
            .snapshot()
            .iter()
            .filter(|b| b.state == State::Open)
            .count();

        let status = if recent_critical >= UNHEALTHY_CRITICAL_COUNT {
            HealthStatus::Unhealthy
        } else if open_breakers > 0 || recent_critical > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let details = json!({
            "recent_critical_unresolved": recent_critical,
            "unresolved_total": unresolved_total,
            "open_breakers": open_breakers,
        });
        (status, details)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, error_id: &str, timestamp_ms: u64) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(record) = ledger.iter_mut().find(|e| e.id == error_id) {
            record.timestamp_ms = timestamp_ms;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracker() -> ErrorTracker {
        ErrorTracker::new(TrackerConfig::default())
    }

    fn ctx() -> OpContext {
        OpContext::new("billing", "charge")
    }

    #[test]
    fn classification_follows_pattern_table() {
        let tracker = tracker();
        let record = tracker.track_error(&Error::msg("request timed out after 5s"), &ctx());
        assert_eq!(record.category, ErrorCategory::Network);
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.recovery_strategy, RecoveryStrategy::Retry);
        assert_eq!(record.max_recovery_attempts, 3);
        assert_eq!(record.recovery_attempts, 0);
        assert!(!record.resolved);
    }

    #[test]
    fn unmatched_message_falls_back_to_system() {
        let tracker = tracker();
        let record = tracker.track_error(&Error::msg("some unheard-of condition"), &ctx());
        assert_eq!(record.category, ErrorCategory::System);
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(
            record.recovery_strategy,
            RecoveryStrategy::ManualIntervention
        );
        assert_eq!(record.max_recovery_attempts, 0);
    }

    #[test]
    fn context_round_trips_into_record() {
        let tracker = tracker();
        let mut ctx = ctx().with_tenant("t-1").with_user("u-1").with_request("r-1");
        ctx.metadata
            .insert("invoice".into(), serde_json::json!(42));
        let record = tracker.track_error(&Error::msg("boom"), &ctx);
        assert_eq!(record.service, "billing");
        assert_eq!(record.operation, "charge");
        assert_eq!(record.tenant_id.as_deref(), Some("t-1"));
        assert_eq!(record.user_id.as_deref(), Some("u-1"));
        assert_eq!(record.request_id.as_deref(), Some("r-1"));
        assert_eq!(record.metadata["invoice"], serde_json::json!(42));
    }

    #[test]
    fn ledger_evicts_oldest_past_capacity() {
        let tracker = ErrorTracker::new(TrackerConfig {
            ledger_capacity: 3,
            ..Default::default()
        });
        let first = tracker.track_error(&Error::msg("e0"), &ctx());
        for i in 1..4 {
            tracker.track_error(&Error::msg(format!("e{}", i)), &ctx());
        }
        let recent = tracker.get_recent_errors(10, None, None, None);
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|e| e.id != first.id));
        assert_eq!(recent[0].message, "e3");
    }

    struct FailingSink {
        calls: AtomicUsize,
        kinds: Mutex<Vec<String>>,
    }

    impl FailingSink {
        fn new() -> Self {
            FailingSink {
                calls: AtomicUsize::new(0),
                kinds: Mutex::new(Vec::new()),
            }
        }
    }

    impl SecurityEventSink for FailingSink {
        fn record(&self, event: SecurityEvent) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.kinds.lock().unwrap().push(event.kind);
            Err(Error::msg("sink unavailable"))
        }
    }

    #[test]
    fn sink_failure_does_not_affect_tracking() {
        let sink = Arc::new(FailingSink::new());
        let tracker =
            ErrorTracker::new(TrackerConfig::default()).with_security_sink(sink.clone());

        let record = tracker.track_error(&Error::msg("invalid credentials"), &ctx());
        assert_eq!(record.category, ErrorCategory::Authentication);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.kinds.lock().unwrap()[0], "authentication_failure");
        // the failing sink leaves the ledger untouched
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert_eq!(stored.id, record.id);

        // non-security categories never reach the sink
        tracker.track_error(&Error::msg("request timed out"), &ctx());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.get_recent_errors(10, None, None, None).len(), 2);
    }

    #[test]
    fn authorization_denial_reaches_the_sink() {
        let sink = Arc::new(FailingSink::new());
        let tracker =
            ErrorTracker::new(TrackerConfig::default()).with_security_sink(sink.clone());
        tracker.track_error(&Error::msg("permission denied for admin panel"), &ctx());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.kinds.lock().unwrap()[0], "authorization_failure");
    }

    #[test]
    fn resolve_is_idempotent() {
        let tracker = tracker();
        let record = tracker.track_error(&Error::msg("boom"), &ctx());
        assert!(tracker.resolve_error(&record.id, "fixed by hand"));
        assert!(!tracker.resolve_error(&record.id, "second opinion"));
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert!(stored.resolved);
        assert_eq!(stored.resolution.as_deref(), Some("fixed by hand"));
        assert!(!tracker.resolve_error("no-such-id", "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_unknown_id() {
        let tracker = tracker();
        let result = tracker
            .attempt_recovery("no-such-id", || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(RecoveryError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_budget_is_enforced_without_invoking_op() {
        let tracker = tracker();
        // deadlock row: Retry with budget 2
        let record = tracker.track_error(&Error::msg("deadlock detected"), &ctx());
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let outcome = tracker
                .attempt_recovery::<(), _, _>(&record.id, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::msg("still deadlocked")) }
                })
                .await
                .unwrap();
            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("still deadlocked"));
        }
        let result: Result<RecoveryOutcome<()>, _> = tracker
            .attempt_recovery(&record.id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(RecoveryError::MaxAttemptsReached)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert_eq!(stored.recovery_attempts, stored.max_recovery_attempts);
        assert!(!stored.resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_recovery_resolves_and_closes_breaker() {
        let tracker = tracker();
        let record = tracker.track_error(&Error::msg("database connection lost"), &ctx());
        let outcome = tracker
            .attempt_recovery(&record.id, || async { Ok("reconnected") })
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result, Some("reconnected"));
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert!(stored.resolved);
        assert_eq!(stored.resolution.as_deref(), Some("Recovered automatically"));
        let status = tracker.circuit_breaker_status();
        assert_eq!(status[0].state, State::Closed);
        assert_eq!(status[0].failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_then_admits_probe() {
        let tracker = ErrorTracker::new(TrackerConfig {
            breaker_timeout_ms: 40,
            ..Default::default()
        });
        // five consecutive breaker-gated failures for one service:operation
        let mut last = None;
        for _ in 0..5 {
            last = Some(tracker.track_error(&Error::msg("database connection lost"), &ctx()));
        }
        let record = last.unwrap();
        assert_eq!(tracker.circuit_breaker_status()[0].state, State::Open);

        let calls = AtomicUsize::new(0);
        let result: Result<RecoveryOutcome<()>, _> = tracker
            .attempt_recovery(&record.id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(RecoveryError::CircuitBreakerOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // wall-clock cooldown elapses; the same call becomes the trial request
        std::thread::sleep(Duration::from_millis(50));
        let outcome = tracker
            .attempt_recovery(&record.id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.circuit_breaker_status()[0].state, State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_breaker() {
        let tracker = ErrorTracker::new(TrackerConfig {
            breaker_timeout_ms: 40,
            ..Default::default()
        });
        let mut last = None;
        for _ in 0..5 {
            last = Some(tracker.track_error(&Error::msg("database connection lost"), &ctx()));
        }
        let record = last.unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let outcome: RecoveryOutcome<()> = tracker
            .attempt_recovery(&record.id, || async { Err(Error::msg("still down")) })
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(tracker.circuit_breaker_status()[0].state, State::Open);
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert!(!stored.resolved);
    }

    #[test]
    fn stats_window_excludes_old_entries() {
        let tracker = tracker();
        let old = tracker.track_error(&Error::msg("stale failure"), &ctx());
        tracker.backdate(&old.id, utils::curr_time_millis() - 25 * 3600 * 1000);
        let recent = tracker.track_error(&Error::msg("fresh timeout"), &ctx());
        tracker.backdate(&recent.id, utils::curr_time_millis() - 3600 * 1000);

        let stats = tracker.get_error_stats(Duration::from_secs(24 * 3600));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_category["network"], 1);
        assert_eq!(stats.by_severity["medium"], 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.top_messages[0].message, "fresh timeout");
    }

    #[test]
    fn stats_rank_top_messages() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.track_error(&Error::msg("request timed out"), &ctx());
        }
        tracker.track_error(&Error::msg("deadlock detected"), &ctx());
        let stats = tracker.get_error_stats(Duration::from_secs(3600));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.top_messages[0].message, "request timed out");
        assert_eq!(stats.top_messages[0].count, 3);
    }

    #[test]
    fn recent_errors_filtering() {
        let tracker = tracker();
        tracker.track_error(&Error::msg("request timed out"), &ctx());
        let auth = tracker.track_error(&Error::msg("invalid credentials"), &ctx());
        tracker.resolve_error(&auth.id, "rotated key");

        let unresolved = tracker.get_recent_errors(10, None, None, Some(false));
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].category, ErrorCategory::Network);

        let auth_only =
            tracker.get_recent_errors(10, Some(ErrorCategory::Authentication), None, None);
        assert_eq!(auth_only.len(), 1);
        assert!(auth_only[0].resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn with_error_tracking_retries_once_and_returns_value() {
        let tracker = tracker();
        let calls = AtomicUsize::new(0);
        let value = tracker
            .with_error_tracking(&ctx(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::msg("request timed out"))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stored = &tracker.get_recent_errors(1, None, None, None)[0];
        assert!(stored.resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn with_error_tracking_rethrows_original_error() {
        let tracker = tracker();
        let calls = AtomicUsize::new(0);
        let err = tracker
            .with_error_tracking::<u32, _, _>(&ctx(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::msg("request timed out")) }
            })
            .await
            .unwrap_err();
        // the original failure surfaces, not the secondary recovery error
        assert_eq!(err.to_string(), "request timed out");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn with_error_tracking_skips_recovery_without_budget() {
        let tracker = tracker();
        let calls = AtomicUsize::new(0);
        let err = tracker
            .with_error_tracking::<u32, _, _>(&ctx(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::msg("validation failed for field x")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "validation failed for field x");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tracker_health_degrades_with_open_breakers() {
        let tracker = tracker();
        let (status, _) = tracker.health();
        assert_eq!(status, HealthStatus::Healthy);
        for _ in 0..5 {
            // external-api failures are breaker-gated but not critical
            tracker.track_error(&Error::msg("upstream returned bad gateway"), &ctx());
        }
        let (status, details) = tracker.health();
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(details["open_breakers"], serde_json::json!(1));
    }

    #[test]
    fn tracker_health_unhealthy_on_critical_pileup() {
        let tracker = tracker();
        for _ in 0..5 {
            // out-of-memory rows are Critical and not breaker-gated
            tracker.track_error(&Error::msg("out of memory"), &ctx());
        }
        let (status, _) = tracker.health();
        assert_eq!(status, HealthStatus::Unhealthy);
    }
}
