pub const VIGIL_VERSION: &str = "v1";

pub const DEFAULT_APP_NAME: &str = "unknown_service";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const CONFIG_FILE_ENV_KEY: &str = "VIGIL_CONFIG_FILE";
pub const LOG_LEVEL_ENV_KEY: &str = "VIGIL_LOG_LEVEL";

// tracked errors kept in memory, oldest evicted first
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;
// metric samples kept in memory, oldest evicted first
pub const DEFAULT_METRIC_BUFFER_CAPACITY: usize = 50_000;
pub const DEFAULT_ALERT_CAPACITY: usize = 1_000;

// breaker cooldown before an open breaker admits a probe
pub const DEFAULT_BREAKER_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
