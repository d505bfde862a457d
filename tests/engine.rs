//! End-to-end flow: a failing operation is tracked, recovered, observed by
//! the performance monitor and surfaced through the health aggregator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil_core::base::OpContext;
use vigil_core::config::{ConfigEntity, HealthConfig, PerfConfig, TrackerConfig};
use vigil_core::errors::ErrorTracker;
use vigil_core::health::{
    register_self_checks, HealthAggregator, HealthStatus, PerfProbe, StaticProbe, TrackerProbe,
};
use vigil_core::perf::{MetricKind, PerformanceMonitor};
use vigil_core::Error;

fn engine() -> (Arc<ErrorTracker>, Arc<PerformanceMonitor>, HealthAggregator) {
    let entity = ConfigEntity::default();
    entity.check().unwrap();
    let tracker = Arc::new(ErrorTracker::new(entity.config.tracker.clone()));
    let monitor = Arc::new(PerformanceMonitor::new(entity.config.perf.clone()));
    let aggregator = HealthAggregator::new(&entity.config.health);
    (tracker, monitor, aggregator)
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_and_system_stays_healthy() {
    let (tracker, monitor, aggregator) = engine();
    register_self_checks(&aggregator, tracker.clone(), monitor.clone()).await;

    let ctx = OpContext::new("billing", "charge").with_request("req-1");
    let calls = AtomicUsize::new(0);
    let value = tracker
        .with_error_tracking(&ctx, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::msg("connection refused by payments host"))
                } else {
                    Ok("charged")
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(value, "charged");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let record = &tracker.get_recent_errors(1, None, None, None)[0];
    assert!(record.resolved);
    assert_eq!(record.resolution.as_deref(), Some("Recovered automatically"));

    monitor.record_http_request("post", "/charge", 200, 120.0, Some(&ctx));
    let stats = monitor
        .get_stats("http_request", Duration::from_secs(60), None)
        .unwrap();
    assert_eq!(stats.count, 1);

    let system = aggregator.run_all_checks().await;
    assert_eq!(system.status, HealthStatus::Healthy);
    assert_eq!(system.components.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn breaker_pileup_degrades_the_tracker_component() {
    let tracker = Arc::new(ErrorTracker::new(TrackerConfig::default()));
    let aggregator = HealthAggregator::new(&HealthConfig::default());
    aggregator
        .register_check("error_tracker", Arc::new(TrackerProbe::new(tracker.clone())))
        .await;
    aggregator
        .register_check("static_ok", Arc::new(StaticProbe::new(HealthStatus::Healthy)))
        .await;

    let ctx = OpContext::new("search", "query");
    for _ in 0..5 {
        tracker.track_error(&Error::msg("upstream returned bad gateway"), &ctx);
    }
    assert_eq!(tracker.circuit_breaker_status().len(), 1);

    let system = aggregator.run_all_checks().await;
    assert_eq!(system.status, HealthStatus::Degraded);

    assert!(tracker.reset_circuit_breaker("search", "query"));
    let system = aggregator.run_all_checks().await;
    assert_eq!(system.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn critical_alerts_flow_into_system_health() {
    let monitor = Arc::new(PerformanceMonitor::new(PerfConfig::default()));
    let aggregator = HealthAggregator::new(&HealthConfig::default());
    aggregator
        .register_check("performance", Arc::new(PerfProbe::new(monitor.clone())))
        .await;

    monitor.record_cache_metrics("get", 50.0, None);
    let system = aggregator.run_all_checks().await;
    assert_eq!(system.status, HealthStatus::Degraded);

    let alert_id = monitor.get_active_alerts()[0].id.clone();
    assert!(monitor.resolve_alert(&alert_id));
    let system = aggregator.run_all_checks().await;
    assert_eq!(system.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn summary_reflects_mixed_traffic() {
    let monitor = PerformanceMonitor::new(PerfConfig::default());
    monitor.record_http_request("get", "/ok", 200, 80.0, None);
    monitor.record_http_request("get", "/ok", 200, 120.0, None);
    monitor.record_http_request("post", "/fail", 500, 300.0, None);
    monitor.record_metric(
        MetricKind::Custom,
        "report_render",
        450.0,
        "ms",
        HashMap::new(),
        None,
    );

    let summary = monitor.get_summary(Duration::from_secs(60));
    assert_eq!(summary.total_samples, 4);
    assert!((summary.error_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.slowest_operations[0].operation, "report_render");
}
