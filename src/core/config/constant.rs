// default app settings
pub const DEFENDER_VERSION: &str = "v1";
pub const CONF_FILE_PATH_ENV_KEY: &str = "DEFENDER_CONFIG_FILE_PATH";
pub const CONFIG_FILENAME: &str = "USE_DEFAULT_CONFIGURATION";

// built-in per-command defaults, used when `command.<key>` is absent
pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 5000;

// default statistic settings: a 1 s sliding window of 100 ms buckets,
// snapshots emitted once per window
pub const DEFAULT_STAT_INTERVAL_MS: u32 = 1000;
pub const DEFAULT_STAT_SAMPLE_COUNT: u32 = 10;

// default log settings
pub const DEFAULT_LOG_LEVEL: &str = "warn";
