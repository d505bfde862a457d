//! # Vigil
//!
//! Vigil is a process-local resilience and observability engine. It turns raw
//! failures into classified, recoverable error records, gates risky calls
//! behind per-operation circuit breakers, collects timing and throughput
//! samples with threshold alerting, and aggregates independent subsystem
//! probes into a single system-health verdict.
//!
//! Generally, there are several steps when using Vigil:
//! 1. Build a [`config::ConfigEntity`] (defaults, YAML file, or by hand).
//! 2. Construct the services you need: [`errors::ErrorTracker`],
//!    [`perf::PerformanceMonitor`], [`health::HealthAggregator`]. They are
//!    plain values with caller-controlled lifetime; share them behind `Arc`.
//! 3. Wrap fallible operations with `ErrorTracker::with_error_tracking`,
//!    record samples through the monitor, and register health probes.
//! 4. Poll `HealthAggregator::run_all_checks` periodically or on demand.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_core::base::OpContext;
//! use vigil_core::config::ConfigEntity;
//! use vigil_core::errors::ErrorTracker;
//!
//! # async fn example() -> vigil_core::Result<()> {
//! let entity = ConfigEntity::default();
//! let tracker = Arc::new(ErrorTracker::new(entity.config.tracker.clone()));
//! let ctx = OpContext::new("billing", "charge");
//! let value = tracker
//!     .with_error_tracking(&ctx, || async { Ok(42u32) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Core implementations: the error classifier and recovery tracker, the
/// circuit breaker registry, the performance monitor and the health
/// aggregator, plus the shared vocabulary and configuration entities.
pub mod core;
/// Adapters for different logging crates.
pub mod logging;
/// Utility functions.
pub mod utils;

// re-export preludes
pub use crate::core::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
