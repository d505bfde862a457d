//!  Circuit Breaker State Machine:
//!
//! ```text
//!                                switch to open on failure threshold
//!
//!				+-----------------------------------------------------------------------+
//!				|                                                                       |
//!				|                                                                       v
//!		+----------------+                   +----------------+      Probe      +----------------+
//!		|                |                   |                |<----------------|                |
//!		|                |   Probe succeed   |                |                 |                |
//!		|     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!		|                |                   |                |   Probe failed  |                |
//!		|                |                   |                +---------------->|                |
//!		+----------------+                   +----------------+                 +----------------+
//! ```
//!
//! Breakers are keyed per `service:operation`, created lazily on the first
//! relevant failure and kept for the process lifetime; they are reset only
//! manually or by a successful recovery.

use crate::{logging, utils};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// States of the circuit breaker state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl Default for State {
    fn default() -> State {
        State::Closed
    }
}

/// Verdict of an admission check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The breaker is closed (or absent); the call may proceed.
    Allowed,
    /// The open period elapsed; the breaker moved to half-open and this
    /// call is the trial request.
    Probe,
    /// The breaker is open and the cooldown has not elapsed; the call must
    /// fail fast without being made.
    Rejected,
}

/// Copied view of one breaker, handed out to readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: State,
    pub failure_count: u32,
    pub last_failure_ms: u64,
    pub next_attempt_ms: u64,
    pub threshold: u32,
    pub timeout_ms: u64,
}

#[derive(Debug)]
struct BreakerEntry {
    state: State,
    failure_count: u32,
    last_failure_ms: u64,
    // next_attempt_ms is the time at which an open breaker admits a probe
    next_attempt_ms: u64,
    threshold: u32,
    timeout_ms: u64,
}

impl BreakerEntry {
    fn new(threshold: u32, timeout_ms: u64) -> Self {
        BreakerEntry {
            state: State::default(),
            failure_count: 0,
            last_failure_ms: 0,
            next_attempt_ms: 0,
            threshold,
            timeout_ms,
        }
    }
}

/// `BreakerRegistry` holds every breaker of the process. Entries are never
/// garbage-collected; `snapshot` exposes them so operators can watch growth
/// under dynamic operation names.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, BreakerEntry>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        BreakerRegistry::default()
    }

    /// `record_failure` increments the failure count of `key`, creating the
    /// breaker with the given threshold and timeout if absent. The breaker
    /// opens once the count reaches its threshold; a half-open breaker
    /// re-opens on any failure. Returns the resulting state.
    pub fn record_failure(&self, key: &str, threshold: u32, timeout_ms: u64) -> State {
        let mut breakers = self.breakers.lock().unwrap();
        let entry = breakers
            .entry(key.into())
            .or_insert_with(|| BreakerEntry::new(threshold, timeout_ms));
        entry.failure_count += 1;
        entry.last_failure_ms = utils::curr_time_millis();
        match entry.state {
            State::HalfOpen => {
                entry.state = State::Open;
                entry.next_attempt_ms = entry.last_failure_ms + entry.timeout_ms;
                logging::warn!(
                    "[CircuitBreaker] probe failed for {}, re-opened until {}",
                    key,
                    utils::format_time_millis(entry.next_attempt_ms)
                );
            }
            State::Closed if entry.failure_count >= entry.threshold => {
                entry.state = State::Open;
                entry.next_attempt_ms = entry.last_failure_ms + entry.timeout_ms;
                logging::warn!(
                    "[CircuitBreaker] opened for {} after {} failures, next attempt at {}",
                    key,
                    entry.failure_count,
                    utils::format_time_millis(entry.next_attempt_ms)
                );
            }
            _ => {}
        }
        entry.state
    }

    /// `check_admission` decides whether a call guarded by `key` may run.
    /// An open breaker whose cooldown elapsed transitions to half-open here,
    /// so an entry is never observed open with `next_attempt_ms` in the
    /// past.
    pub fn check_admission(&self, key: &str) -> Admission {
        let mut breakers = self.breakers.lock().unwrap();
        match breakers.get_mut(key) {
            None => Admission::Allowed,
            Some(entry) => match entry.state {
                State::Closed | State::HalfOpen => Admission::Allowed,
                State::Open => {
                    if utils::curr_time_millis() >= entry.next_attempt_ms {
                        entry.state = State::HalfOpen;
                        logging::info!(
                            "[CircuitBreaker] {} cooled down, half-open for a trial request",
                            key
                        );
                        Admission::Probe
                    } else {
                        Admission::Rejected
                    }
                }
            },
        }
    }

    /// `record_success` closes the breaker and clears its failure count.
    pub fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.lock().unwrap();
        if let Some(entry) = breakers.get_mut(key) {
            if entry.state != State::Closed {
                logging::info!("[CircuitBreaker] {} closed after successful call", key);
            }
            entry.state = State::Closed;
            entry.failure_count = 0;
            entry.next_attempt_ms = 0;
        }
    }

    /// Manual reset. Returns false when no breaker exists for `key`.
    pub fn reset(&self, key: &str) -> bool {
        let mut breakers = self.breakers.lock().unwrap();
        match breakers.get_mut(key) {
            None => false,
            Some(entry) => {
                entry.state = State::Closed;
                entry.failure_count = 0;
                entry.next_attempt_ms = 0;
                logging::info!("[CircuitBreaker] {} reset manually", key);
                true
            }
        }
    }

    pub fn state_of(&self, key: &str) -> Option<State> {
        self.breakers.lock().unwrap().get(key).map(|e| e.state)
    }

    /// `snapshot` returns a copied view of every breaker, sorted by key.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap();
        let mut snapshots: Vec<BreakerSnapshot> = breakers
            .iter()
            .map(|(key, e)| BreakerSnapshot {
                key: key.clone(),
                state: e.state,
                failure_count: e.failure_count,
                last_failure_ms: e.last_failure_ms,
                next_attempt_ms: e.next_attempt_ms,
                threshold: e.threshold,
                timeout_ms: e.timeout_ms,
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opens_at_threshold() {
        let registry = BreakerRegistry::new();
        for _ in 0..2 {
            assert_eq!(registry.record_failure("svc:op", 3, 60_000), State::Closed);
        }
        assert_eq!(registry.record_failure("svc:op", 3, 60_000), State::Open);
        assert_eq!(registry.check_admission("svc:op"), Admission::Rejected);
    }

    #[test]
    fn unknown_key_is_admitted() {
        let registry = BreakerRegistry::new();
        assert_eq!(registry.check_admission("absent:op"), Admission::Allowed);
        assert!(registry.state_of("absent:op").is_none());
    }

    #[test]
    fn half_open_after_cooldown() {
        let registry = BreakerRegistry::new();
        registry.record_failure("svc:op", 1, 10);
        assert_eq!(registry.state_of("svc:op"), Some(State::Open));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(registry.check_admission("svc:op"), Admission::Probe);
        assert_eq!(registry.state_of("svc:op"), Some(State::HalfOpen));
        // the trial request is admitted without a further transition
        assert_eq!(registry.check_admission("svc:op"), Admission::Allowed);
    }

    #[test]
    fn probe_failure_reopens() {
        let registry = BreakerRegistry::new();
        registry.record_failure("svc:op", 1, 10);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(registry.check_admission("svc:op"), Admission::Probe);
        assert_eq!(registry.record_failure("svc:op", 1, 10), State::Open);
        let snap = &registry.snapshot()[0];
        assert!(snap.next_attempt_ms > utils::curr_time_millis() - 1);
    }

    #[test]
    fn success_closes_and_clears() {
        let registry = BreakerRegistry::new();
        registry.record_failure("svc:op", 1, 60_000);
        registry.record_success("svc:op");
        assert_eq!(registry.state_of("svc:op"), Some(State::Closed));
        assert_eq!(registry.snapshot()[0].failure_count, 0);
    }

    #[test]
    fn manual_reset() {
        let registry = BreakerRegistry::new();
        assert!(!registry.reset("svc:op"));
        registry.record_failure("svc:op", 1, 60_000);
        assert!(registry.reset("svc:op"));
        assert_eq!(registry.check_admission("svc:op"), Admission::Allowed);
    }
}
