//! Health aggregation: named async checks probed concurrently under a
//! shared timeout, with cached last results and a worst-wins verdict.

pub mod probes;

pub use probes::*;

use crate::config::HealthConfig;
use crate::{logging, utils, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const TIMEOUT_ERROR: &str = "Health check timeout";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{}", name)
    }
}

/// What a single probe reports when it completes on its own.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub details: Option<serde_json::Value>,
}

impl ProbeReport {
    pub fn healthy() -> Self {
        ProbeReport {
            status: HealthStatus::Healthy,
            details: None,
        }
    }

    pub fn new(status: HealthStatus, details: serde_json::Value) -> Self {
        ProbeReport {
            status,
            details: Some(details),
        }
    }
}

/// Outcome of one named check, including probes that failed or timed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Roll-up over every registered check at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp_ms: u64,
    pub components: Vec<ComponentHealth>,
}

/// One named probe. Implementations must not panic; report failure
/// through the `Result` instead.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self) -> Result<ProbeReport>;
}

/// `HealthAggregator` owns the registry of named checks. Construct one
/// per process and register checks at startup; checks registered later
/// simply join the next `run_all_checks` sweep.
pub struct HealthAggregator {
    checks: RwLock<HashMap<String, Arc<dyn HealthCheck>>>,
    last_results: RwLock<HashMap<String, ComponentHealth>>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(config: &HealthConfig) -> Self {
        HealthAggregator {
            checks: RwLock::new(HashMap::new()),
            last_results: RwLock::new(HashMap::new()),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    /// Registering under an existing name replaces the old check.
    pub async fn register_check(&self, name: &str, check: Arc<dyn HealthCheck>) {
        self.checks.write().await.insert(name.into(), check);
    }

    /// Runs one named check under the shared timeout and refreshes its
    /// cached result. Unknown names report unhealthy rather than erroring.
    pub async fn run_check(&self, name: &str) -> ComponentHealth {
        let check = self.checks.read().await.get(name).cloned();
        let result = match check {
            Some(check) => execute(name.to_string(), check, self.probe_timeout).await,
            None => ComponentHealth {
                name: name.into(),
                status: HealthStatus::Unhealthy,
                duration_ms: 0,
                details: None,
                error: Some(format!("unknown check: {}", name)),
            },
        };
        self.last_results
            .write()
            .await
            .insert(name.into(), result.clone());
        result
    }

    /// Probes every registered check concurrently. A probe that outlives
    /// the timeout is dropped and reported unhealthy; it never delays the
    /// other probes beyond the shared deadline.
    pub async fn run_all_checks(&self) -> SystemHealth {
        let mut entries: Vec<(String, Arc<dyn HealthCheck>)> = {
            let checks = self.checks.read().await;
            checks
                .iter()
                .map(|(name, check)| (name.clone(), check.clone()))
                .collect()
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let probes = entries
            .into_iter()
            .map(|(name, check)| execute(name, check, self.probe_timeout));
        let components = join_all(probes).await;

        {
            let mut cache = self.last_results.write().await;
            for component in &components {
                cache.insert(component.name.clone(), component.clone());
            }
        }

        let status = overall(&components);
        if status != HealthStatus::Healthy {
            logging::warn!("[HealthAggregator] system status is {}", status);
        }
        SystemHealth {
            status,
            timestamp_ms: utils::curr_time_millis(),
            components,
        }
    }

    /// Cached results from previous runs, keyed by check name.
    pub async fn last_results(&self) -> HashMap<String, ComponentHealth> {
        self.last_results.read().await.clone()
    }
}

async fn execute(
    name: String,
    check: Arc<dyn HealthCheck>,
    probe_timeout: Duration,
) -> ComponentHealth {
    let start = Instant::now();
    let outcome = tokio::time::timeout(probe_timeout, check.probe()).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(report)) => ComponentHealth {
            name,
            status: report.status,
            duration_ms,
            details: report.details,
            error: None,
        },
        Ok(Err(err)) => {
            logging::error!("[HealthAggregator] check {} failed: {:?}", name, err);
            ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                duration_ms,
                details: None,
                error: Some(err.to_string()),
            }
        }
        Err(_) => {
            logging::error!("[HealthAggregator] check {} timed out", name);
            ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                duration_ms,
                details: None,
                error: Some(TIMEOUT_ERROR.into()),
            }
        }
    }
}

/// Worst component wins: any unhealthy beats any degraded beats healthy.
fn overall(components: &[ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}
