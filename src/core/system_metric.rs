//! One-shot process gauges. Sampling is pull-based: callers (the
//! performance monitor or a memory probe) invoke `sample` from their own
//! trigger; no background collector threads are spawned.

use crate::Result;
use anyhow::anyhow;
use lazy_static::lazy_static;
use std::sync::Mutex;
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};

lazy_static! {
    static ref SYSTEM: Mutex<System> = Mutex::new(System::new_all());
}

#[derive(Debug, Copy, Clone)]
pub struct SystemSample {
    pub memory_used_bytes: u64,
    pub total_memory_bytes: u64,
    /// Process memory as a share of machine memory, 0-100.
    pub memory_percent: f64,
    pub cpu_percent: f32,
}

/// Refreshes and reads the current process's memory and CPU usage.
pub fn sample() -> Result<SystemSample> {
    let mut system = SYSTEM.lock().unwrap();
    let pid = get_current_pid().map_err(|e| anyhow!("cannot resolve current pid: {}", e))?;
    system.refresh_memory();
    system.refresh_process(pid);
    let process = system
        .process(pid)
        .ok_or_else(|| anyhow!("process {:?} not visible to sysinfo", pid))?;

    // sysinfo reports memory in KBytes
    let memory_used_bytes = process.memory() * 1024;
    let total_memory_bytes = system.total_memory() * 1024;
    let memory_percent = if total_memory_bytes > 0 {
        memory_used_bytes as f64 / total_memory_bytes as f64 * 100.0
    } else {
        0.0
    };
    Ok(SystemSample {
        memory_used_bytes,
        total_memory_bytes,
        memory_percent,
        cpu_percent: process.cpu_usage(),
    })
}
