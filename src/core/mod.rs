pub mod base;
pub mod circuitbreaker;
pub mod config;
pub mod errors;
pub mod health;
pub mod perf;
pub mod system_metric;
