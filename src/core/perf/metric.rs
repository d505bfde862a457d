//! Metric sample, threshold and alert types, plus the built-in threshold
//! tables. Thresholds are looked up by metric name first, falling back to
//! the metric kind.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HttpRequest,
    DatabaseQuery,
    ExternalApi,
    Cache,
    Queue,
    System,
    Custom,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::HttpRequest => "http_request",
            MetricKind::DatabaseQuery => "database_query",
            MetricKind::ExternalApi => "external_api",
            MetricKind::Cache => "cache",
            MetricKind::Queue => "queue",
            MetricKind::System => "system",
            MetricKind::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// One immutable sample in the bounded buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,
    pub timestamp_ms: u64,
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Alerting bounds for one metric. For ordinary metrics higher is worse;
/// for `inverted` metrics (e.g. a hit rate) lower is worse and the
/// comparisons flip.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
    #[serde(default)]
    pub inverted: bool,
}

impl Threshold {
    pub fn new(warning: f64, critical: f64) -> Self {
        Threshold {
            warning,
            critical,
            inverted: false,
        }
    }

    pub fn inverted(warning: f64, critical: f64) -> Self {
        Threshold {
            warning,
            critical,
            inverted: true,
        }
    }

    /// `evaluate` returns the crossed bound, critical taking precedence.
    pub fn evaluate(&self, value: f64) -> Option<AlertSeverity> {
        if self.inverted {
            if value <= self.critical {
                Some(AlertSeverity::Critical)
            } else if value <= self.warning {
                Some(AlertSeverity::Warning)
            } else {
                None
            }
        } else if value >= self.critical {
            Some(AlertSeverity::Critical)
        } else if value >= self.warning {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }

    /// The bound belonging to the given severity, for alert reporting.
    pub fn bound(&self, severity: AlertSeverity) -> f64 {
        match severity {
            AlertSeverity::Warning => self.warning,
            AlertSeverity::Critical => self.critical,
        }
    }
}

/// Raised on every threshold crossing; resolved only manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub timestamp_ms: u64,
    pub metric: String,
    pub threshold: f64,
    pub actual_value: f64,
    pub severity: AlertSeverity,
    pub resolved: bool,
}

/// Rolling statistics over one metric name and window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub unit: String,
}

/// Floor-indexed percentile over an ascending-sorted slice: the value at
/// `floor(p/100 * count)`, clamped to the last element. Not interpolated.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((p / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

lazy_static! {
    /// Built-in per-name thresholds, consulted before the kind fallback.
    pub static ref DEFAULT_NAME_THRESHOLDS: HashMap<String, Threshold> = {
        let mut m = HashMap::new();
        m.insert("http_request".into(), Threshold::new(500.0, 2_000.0));
        m.insert("database_query".into(), Threshold::new(100.0, 500.0));
        m.insert("external_api".into(), Threshold::new(1_000.0, 5_000.0));
        m.insert("cache_hit_rate".into(), Threshold::inverted(80.0, 60.0));
        m.insert("queue_lag".into(), Threshold::new(1_000.0, 5_000.0));
        m.insert("memory_usage_percent".into(), Threshold::new(75.0, 90.0));
        m.insert("cpu_usage_percent".into(), Threshold::new(80.0, 95.0));
        m
    };
    /// Fallback thresholds keyed by metric kind.
    pub static ref DEFAULT_KIND_THRESHOLDS: HashMap<MetricKind, Threshold> = {
        let mut m = HashMap::new();
        m.insert(MetricKind::HttpRequest, Threshold::new(500.0, 2_000.0));
        m.insert(MetricKind::DatabaseQuery, Threshold::new(100.0, 500.0));
        m.insert(MetricKind::ExternalApi, Threshold::new(1_000.0, 5_000.0));
        m.insert(MetricKind::Queue, Threshold::new(1_000.0, 5_000.0));
        m
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordinary_threshold_escalates_upward() {
        let t = Threshold::new(500.0, 2_000.0);
        assert_eq!(t.evaluate(100.0), None);
        assert_eq!(t.evaluate(500.0), Some(AlertSeverity::Warning));
        assert_eq!(t.evaluate(1_999.0), Some(AlertSeverity::Warning));
        assert_eq!(t.evaluate(2_000.0), Some(AlertSeverity::Critical));
    }

    #[test]
    fn inverted_threshold_escalates_downward() {
        let t = Threshold::inverted(80.0, 60.0);
        assert_eq!(t.evaluate(95.0), None);
        assert_eq!(t.evaluate(75.0), Some(AlertSeverity::Warning));
        assert_eq!(t.evaluate(50.0), Some(AlertSeverity::Critical));
    }

    #[test]
    fn percentile_is_floor_indexed() {
        let sorted = [100.0, 150.0, 200.0, 250.0, 300.0];
        assert_eq!(percentile(&sorted, 50.0), 200.0);
        assert_eq!(percentile(&sorted, 95.0), 300.0);
        assert_eq!(percentile(&sorted, 99.0), 300.0);
        assert_eq!(percentile(&[42.0], 99.0), 42.0);
    }
}
