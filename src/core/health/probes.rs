//! Ready-made probe adapters over the infrastructure seams (datastore
//! pings, blob storage, HTTP dependencies, queue backlogs) plus the
//! engine's own self-checks.

use super::{HealthAggregator, HealthCheck, HealthStatus, ProbeReport};
use crate::errors::ErrorTracker;
use crate::perf::PerformanceMonitor;
use crate::{system_metric, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

const MEMORY_WARNING_PERCENT: f64 = 75.0;
const MEMORY_CRITICAL_PERCENT: f64 = 90.0;

/// Round-trip connectivity to a datastore or cache.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Object-existence lookups against blob storage.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn object_exists(&self, key: &str) -> Result<bool>;
}

/// Liveness endpoint of an external dependency; returns the HTTP status.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyClient: Send + Sync {
    async fn liveness(&self) -> Result<u16>;
}

/// Backlog depths of the queues under watch, with their per-queue bounds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueInspector: Send + Sync {
    async fn backlog(&self) -> Result<Vec<QueueDepth>>;
}

/// Healthy when the ping round-trips; a transport error surfaces as
/// unhealthy through the aggregator.
pub struct PingProbe {
    pinger: Arc<dyn Pinger>,
}

impl PingProbe {
    pub fn new(pinger: Arc<dyn Pinger>) -> Self {
        PingProbe { pinger }
    }
}

#[async_trait]
impl HealthCheck for PingProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        self.pinger.ping().await?;
        Ok(ProbeReport::healthy())
    }
}

/// Checks that a canary object is reachable. A missing object is degraded
/// rather than unhealthy; only a transport failure is unhealthy.
pub struct BlobStoreProbe {
    store: Arc<dyn BlobStore>,
    canary_key: String,
}

impl BlobStoreProbe {
    pub fn new(store: Arc<dyn BlobStore>, canary_key: &str) -> Self {
        BlobStoreProbe {
            store,
            canary_key: canary_key.into(),
        }
    }
}

#[async_trait]
impl HealthCheck for BlobStoreProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let exists = self.store.object_exists(&self.canary_key).await?;
        let status = if exists {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Ok(ProbeReport::new(
            status,
            json!({ "canary_key": self.canary_key, "exists": exists }),
        ))
    }
}

/// 2xx/3xx liveness is healthy, any other status is degraded, a transport
/// error is unhealthy.
pub struct DependencyProbe {
    client: Arc<dyn DependencyClient>,
}

impl DependencyProbe {
    pub fn new(client: Arc<dyn DependencyClient>) -> Self {
        DependencyProbe { client }
    }
}

#[async_trait]
impl HealthCheck for DependencyProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let status_code = self.client.liveness().await?;
        let status = if (200..400).contains(&status_code) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Ok(ProbeReport::new(status, json!({ "status_code": status_code })))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepth {
    pub queue: String,
    pub depth: u64,
    pub warning: u64,
    pub critical: u64,
}

/// The worst queue wins: unhealthy when any backlog reaches its critical
/// bound, degraded at its warning bound. Details carry every depth.
pub struct QueueBacklogProbe {
    inspector: Arc<dyn QueueInspector>,
}

impl QueueBacklogProbe {
    pub fn new(inspector: Arc<dyn QueueInspector>) -> Self {
        QueueBacklogProbe { inspector }
    }
}

#[async_trait]
impl HealthCheck for QueueBacklogProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let backlog = self.inspector.backlog().await?;
        let mut status = HealthStatus::Healthy;
        for queue in &backlog {
            if queue.depth >= queue.critical {
                status = HealthStatus::Unhealthy;
            } else if queue.depth >= queue.warning && status == HealthStatus::Healthy {
                status = HealthStatus::Degraded;
            }
        }
        Ok(ProbeReport::new(
            status,
            json!({ "queues": serde_json::to_value(&backlog)? }),
        ))
    }
}

/// Process memory pressure via the one-shot system sampler.
pub struct MemoryProbe;

#[async_trait]
impl HealthCheck for MemoryProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let sample = system_metric::sample()?;
        let status = if sample.memory_percent > MEMORY_CRITICAL_PERCENT {
            HealthStatus::Unhealthy
        } else if sample.memory_percent >= MEMORY_WARNING_PERCENT {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Ok(ProbeReport::new(
            status,
            json!({
                "memory_used_bytes": sample.memory_used_bytes,
                "memory_percent": sample.memory_percent,
            }),
        ))
    }
}

/// Surfaces the error tracker's self-check as a component.
pub struct TrackerProbe {
    tracker: Arc<ErrorTracker>,
}

impl TrackerProbe {
    pub fn new(tracker: Arc<ErrorTracker>) -> Self {
        TrackerProbe { tracker }
    }
}

#[async_trait]
impl HealthCheck for TrackerProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let (status, details) = self.tracker.health();
        Ok(ProbeReport::new(status, details))
    }
}

/// Surfaces the performance monitor's self-check as a component.
pub struct PerfProbe {
    monitor: Arc<PerformanceMonitor>,
}

impl PerfProbe {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        PerfProbe { monitor }
    }
}

#[async_trait]
impl HealthCheck for PerfProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let (status, details) = self.monitor.health();
        Ok(ProbeReport::new(status, details))
    }
}

/// Always reports a fixed status. Handy for wiring and for tests.
pub struct StaticProbe {
    status: HealthStatus,
}

impl StaticProbe {
    pub fn new(status: HealthStatus) -> Self {
        StaticProbe { status }
    }
}

#[async_trait]
impl HealthCheck for StaticProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        Ok(ProbeReport::new(self.status, json!({ "static": true })))
    }
}

/// Registers the engine's own components (error tracker, performance
/// monitor, process memory) on the aggregator.
pub async fn register_self_checks(
    aggregator: &HealthAggregator,
    tracker: Arc<ErrorTracker>,
    monitor: Arc<PerformanceMonitor>,
) {
    aggregator
        .register_check("error_tracker", Arc::new(TrackerProbe::new(tracker)))
        .await;
    aggregator
        .register_check("performance", Arc::new(PerfProbe::new(monitor)))
        .await;
    aggregator.register_check("memory", Arc::new(MemoryProbe)).await;
}
