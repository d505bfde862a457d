//! Performance monitor: bounded sample buffer, threshold alerting without
//! coalescing, caller-controlled timers, typed recording wrappers and
//! rolling statistics with floor-indexed percentiles.

use super::metric::{
    percentile, AlertSeverity, MetricKind, MetricSample, MetricStats, PerformanceAlert, Threshold,
    DEFAULT_KIND_THRESHOLDS, DEFAULT_NAME_THRESHOLDS,
};
use crate::base::OpContext;
use crate::config::PerfConfig;
use crate::health::HealthStatus;
use crate::{logging, system_metric, utils};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

const UNHEALTHY_CRITICAL_ALERTS: usize = 5;
const SLOWEST_OPERATION_COUNT: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SlowOperation {
    pub operation: String,
    pub avg_ms: f64,
    pub count: usize,
}

/// High-level digest over one window.
#[derive(Debug, Clone, Serialize)]
pub struct PerfSummary {
    pub total_samples: usize,
    pub avg_response_time_ms: f64,
    /// Share of HTTP samples with status >= 400 (4xx and 5xx mixed).
    pub error_rate: f64,
    pub slowest_operations: Vec<SlowOperation>,
}

/// Caller-controlled stopwatch; `end` records the elapsed milliseconds.
pub struct Timer<'a> {
    monitor: &'a PerformanceMonitor,
    kind: MetricKind,
    name: String,
    tags: HashMap<String, String>,
    ctx: Option<OpContext>,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn end(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1_000.0;
        self.monitor.record_metric(
            self.kind,
            &self.name,
            elapsed_ms,
            "ms",
            self.tags,
            self.ctx.as_ref(),
        );
        elapsed_ms
    }
}

/// `PerformanceMonitor` ingests samples and raises threshold alerts.
/// Construct one per process (or per test); there is no hidden global
/// instance.
pub struct PerformanceMonitor {
    config: PerfConfig,
    samples: Mutex<VecDeque<MetricSample>>,
    alerts: Mutex<VecDeque<PerformanceAlert>>,
    name_thresholds: HashMap<String, Threshold>,
    kind_thresholds: HashMap<MetricKind, Threshold>,
}

impl PerformanceMonitor {
    pub fn new(config: PerfConfig) -> Self {
        PerformanceMonitor {
            config,
            samples: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(VecDeque::new()),
            name_thresholds: DEFAULT_NAME_THRESHOLDS.clone(),
            kind_thresholds: DEFAULT_KIND_THRESHOLDS.clone(),
        }
    }

    /// Override or add the threshold for one metric name.
    pub fn set_threshold(&mut self, name: &str, threshold: Threshold) {
        self.name_thresholds.insert(name.into(), threshold);
    }

    /// `record_metric` appends a sample to the bounded buffer and evaluates
    /// it against the threshold table (name first, kind fallback). Every
    /// qualifying sample creates a new alert; nothing is coalesced.
    pub fn record_metric(
        &self,
        kind: MetricKind,
        name: &str,
        value: f64,
        unit: &str,
        tags: HashMap<String, String>,
        ctx: Option<&OpContext>,
    ) {
        let sample = MetricSample {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: utils::curr_time_millis(),
            kind,
            name: name.into(),
            value,
            unit: unit.into(),
            tags,
            service: ctx.map(|c| c.service.clone()),
            tenant_id: ctx.and_then(|c| c.tenant_id.clone()),
            request_id: ctx.and_then(|c| c.request_id.clone()),
        };
        {
            let mut samples = self.samples.lock().unwrap();
            if samples.len() >= self.config.buffer_capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }

        let threshold = self
            .name_thresholds
            .get(name)
            .or_else(|| self.kind_thresholds.get(&kind));
        if let Some(threshold) = threshold {
            if let Some(severity) = threshold.evaluate(value) {
                self.raise_alert(name, threshold.bound(severity), value, severity);
            }
        }
    }

    fn raise_alert(&self, metric: &str, bound: f64, actual: f64, severity: AlertSeverity) {
        let alert = PerformanceAlert {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: utils::curr_time_millis(),
            metric: metric.into(),
            threshold: bound,
            actual_value: actual,
            severity,
            resolved: false,
        };
        match severity {
            AlertSeverity::Critical => logging::error!(
                "[PerformanceMonitor] critical threshold crossed for {}: {} (bound {})",
                metric,
                actual,
                bound
            ),
            AlertSeverity::Warning => logging::warn!(
                "[PerformanceMonitor] warning threshold crossed for {}: {} (bound {})",
                metric,
                actual,
                bound
            ),
        }
        let mut alerts = self.alerts.lock().unwrap();
        if alerts.len() >= self.config.max_alerts {
            // evict an already-resolved alert before dropping an active one
            match alerts.iter().position(|a| a.resolved) {
                Some(idx) => {
                    let _ = alerts.remove(idx);
                }
                None => {
                    let _ = alerts.pop_front();
                }
            }
        }
        alerts.push_back(alert);
    }

    /// `timer` starts a caller-controlled stopwatch for one operation.
    pub fn timer(
        &self,
        kind: MetricKind,
        name: &str,
        tags: HashMap<String, String>,
        ctx: Option<&OpContext>,
    ) -> Timer<'_> {
        Timer {
            monitor: self,
            kind,
            name: name.into(),
            tags,
            ctx: ctx.cloned(),
            start: Instant::now(),
        }
    }

    pub fn record_http_request(
        &self,
        method: &str,
        path: &str,
        status_code: u16,
        duration_ms: f64,
        ctx: Option<&OpContext>,
    ) {
        let mut tags = HashMap::new();
        tags.insert("method".into(), method.to_uppercase());
        tags.insert("path".into(), path.into());
        tags.insert("status".into(), status_code.to_string());
        self.record_metric(
            MetricKind::HttpRequest,
            "http_request",
            duration_ms,
            "ms",
            tags,
            ctx,
        );
    }

    pub fn record_database_query(
        &self,
        operation: &str,
        table: &str,
        duration_ms: f64,
        ctx: Option<&OpContext>,
    ) {
        let mut tags = HashMap::new();
        tags.insert("operation".into(), operation.into());
        tags.insert("table".into(), table.into());
        self.record_metric(
            MetricKind::DatabaseQuery,
            "database_query",
            duration_ms,
            "ms",
            tags,
            ctx,
        );
    }

    pub fn record_external_api_call(
        &self,
        provider: &str,
        endpoint: &str,
        duration_ms: f64,
        status_code: Option<u16>,
        ctx: Option<&OpContext>,
    ) {
        let mut tags = HashMap::new();
        tags.insert("provider".into(), provider.into());
        tags.insert("endpoint".into(), endpoint.into());
        if let Some(status) = status_code {
            tags.insert("status".into(), status.to_string());
        }
        self.record_metric(
            MetricKind::ExternalApi,
            "external_api",
            duration_ms,
            "ms",
            tags,
            ctx,
        );
    }

    pub fn record_cache_metrics(
        &self,
        operation: &str,
        hit_rate_percent: f64,
        ctx: Option<&OpContext>,
    ) {
        let mut tags = HashMap::new();
        tags.insert("operation".into(), operation.into());
        self.record_metric(
            MetricKind::Cache,
            "cache_hit_rate",
            hit_rate_percent,
            "%",
            tags,
            ctx,
        );
    }

    pub fn record_queue_processing(&self, queue: &str, lag_ms: f64, ctx: Option<&OpContext>) {
        let mut tags = HashMap::new();
        tags.insert("queue".into(), queue.into());
        self.record_metric(MetricKind::Queue, "queue_lag", lag_ms, "ms", tags, ctx);
    }

    /// One-shot sample of process memory/CPU gauges. Must be driven by an
    /// external periodic trigger; the monitor never schedules itself.
    pub fn record_system_metrics(&self) {
        let snapshot = match system_metric::sample() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                logging::warn!("[PerformanceMonitor] system metric sampling failed: {:?}", err);
                return;
            }
        };
        self.record_metric(
            MetricKind::System,
            "memory_usage_bytes",
            snapshot.memory_used_bytes as f64,
            "bytes",
            HashMap::new(),
            None,
        );
        self.record_metric(
            MetricKind::System,
            "memory_usage_percent",
            snapshot.memory_percent,
            "%",
            HashMap::new(),
            None,
        );
        self.record_metric(
            MetricKind::System,
            "cpu_usage_percent",
            snapshot.cpu_percent as f64,
            "%",
            HashMap::new(),
            None,
        );
    }

    /// `get_stats` aggregates one metric name over the trailing window.
    /// Returns `None` when no sample matches; zero samples is not an error.
    pub fn get_stats(
        &self,
        name: &str,
        window: Duration,
        tag_filter: Option<&HashMap<String, String>>,
    ) -> Option<MetricStats> {
        let cutoff = utils::curr_time_millis().saturating_sub(window.as_millis() as u64);
        let samples = self.samples.lock().unwrap();
        let mut unit = String::new();
        let mut values: Vec<f64> = Vec::new();
        for sample in samples.iter() {
            if sample.name != name || sample.timestamp_ms < cutoff {
                continue;
            }
            if let Some(filter) = tag_filter {
                if !filter
                    .iter()
                    .all(|(k, v)| sample.tags.get(k).map_or(false, |t| t == v))
                {
                    continue;
                }
            }
            unit = sample.unit.clone();
            values.push(sample.value);
        }
        drop(samples);
        if values.is_empty() {
            return None;
        }
        Some(aggregate(values, unit))
    }

    /// Stats for every metric name seen in the window, collected in one
    /// pass under a single lock acquisition so concurrent recording cannot
    /// skew one name against another.
    pub fn get_all_stats(&self, window: Duration) -> HashMap<String, MetricStats> {
        let cutoff = utils::curr_time_millis().saturating_sub(window.as_millis() as u64);
        let mut grouped: HashMap<String, (String, Vec<f64>)> = HashMap::new();
        {
            let samples = self.samples.lock().unwrap();
            for sample in samples.iter().filter(|s| s.timestamp_ms >= cutoff) {
                let entry = grouped
                    .entry(sample.name.clone())
                    .or_insert_with(|| (sample.unit.clone(), Vec::new()));
                entry.1.push(sample.value);
            }
        }
        grouped
            .into_iter()
            .map(|(name, (unit, values))| (name, aggregate(values, unit)))
            .collect()
    }

    /// `get_summary` digests the window: HTTP average latency, the mixed
    /// 4xx+5xx error share and the slowest operations by average duration.
    pub fn get_summary(&self, window: Duration) -> PerfSummary {
        let cutoff = utils::curr_time_millis().saturating_sub(window.as_millis() as u64);
        let samples = self.samples.lock().unwrap();

        let mut total_samples = 0usize;
        let mut http_count = 0usize;
        let mut http_sum = 0.0f64;
        let mut http_errors = 0usize;
        let mut durations: HashMap<String, (f64, usize)> = HashMap::new();

        for sample in samples.iter().filter(|s| s.timestamp_ms >= cutoff) {
            total_samples += 1;
            if sample.kind == MetricKind::HttpRequest {
                http_count += 1;
                http_sum += sample.value;
                let is_error = sample
                    .tags
                    .get("status")
                    .and_then(|s| s.parse::<u16>().ok())
                    .map_or(false, |status| status >= 400);
                if is_error {
                    http_errors += 1;
                }
            }
            if sample.unit == "ms" {
                let entry = durations
                    .entry(operation_label(sample))
                    .or_insert((0.0, 0));
                entry.0 += sample.value;
                entry.1 += 1;
            }
        }
        drop(samples);

        let mut slowest: Vec<SlowOperation> = durations
            .into_iter()
            .map(|(operation, (sum, count))| SlowOperation {
                operation,
                avg_ms: sum / count as f64,
                count,
            })
            .collect();
        slowest.sort_by(|a, b| {
            b.avg_ms
                .total_cmp(&a.avg_ms)
                .then(a.operation.cmp(&b.operation))
        });
        slowest.truncate(SLOWEST_OPERATION_COUNT);

        PerfSummary {
            total_samples,
            avg_response_time_ms: if http_count > 0 {
                http_sum / http_count as f64
            } else {
                0.0
            },
            error_rate: if http_count > 0 {
                http_errors as f64 / http_count as f64
            } else {
                0.0
            },
            slowest_operations: slowest,
        }
    }

    pub fn get_active_alerts(&self) -> Vec<PerformanceAlert> {
        let alerts = self.alerts.lock().unwrap();
        alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    pub fn get_recent_alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        let alerts = self.alerts.lock().unwrap();
        alerts.iter().rev().take(limit).cloned().collect()
    }

    /// Manual-only resolution; nothing auto-clears. Idempotent like
    /// `resolve_error`.
    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.lock().unwrap();
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) if !alert.resolved => {
                alert.resolved = true;
                true
            }
            _ => false,
        }
    }

    /// Self-check consumed by the health aggregator.
    pub fn health(&self) -> (HealthStatus, serde_json::Value) {
        let alerts = self.alerts.lock().unwrap();
        let active_critical = alerts
            .iter()
            .filter(|a| !a.resolved && a.severity == AlertSeverity::Critical)
            .count();
        let active_warning = alerts
            .iter()
            .filter(|a| !a.resolved && a.severity == AlertSeverity::Warning)
            .count();
        drop(alerts);
        let buffered = self.samples.lock().unwrap().len();

        let status = if active_critical >= UNHEALTHY_CRITICAL_ALERTS {
            HealthStatus::Unhealthy
        } else if active_critical > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let details = json!({
            "active_critical_alerts": active_critical,
            "active_warning_alerts": active_warning,
            "buffered_samples": buffered,
        });
        (status, details)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, sample_id: &str, timestamp_ms: u64) {
        let mut samples = self.samples.lock().unwrap();
        if let Some(sample) = samples.iter_mut().find(|s| s.id == sample_id) {
            sample.timestamp_ms = timestamp_ms;
        }
    }

    #[cfg(test)]
    pub(crate) fn last_sample_id(&self) -> Option<String> {
        self.samples.lock().unwrap().back().map(|s| s.id.clone())
    }
}

// callers guarantee `values` is non-empty
fn aggregate(mut values: Vec<f64>, unit: String) -> MetricStats {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let count = values.len();
    let sum: f64 = values.iter().sum();
    MetricStats {
        count,
        min: values[0],
        max: values[count - 1],
        avg: sum / count as f64,
        p50: percentile(&values, 50.0),
        p95: percentile(&values, 95.0),
        p99: percentile(&values, 99.0),
        unit,
    }
}

fn operation_label(sample: &MetricSample) -> String {
    for key in &["path", "table", "endpoint", "queue", "operation"] {
        if let Some(tag) = sample.tags.get(*key) {
            return format!("{} {}", sample.name, tag);
        }
    }
    sample.name.clone()
}
