// src/constants.rs

/// The name of the directory holding shellman configuration (inside the system config dir).
pub const CONFIG_DIR_NAME: &str = "shellman";

/// The name of the optional configuration file (inside the config directory).
pub const CONFIG_FILENAME: &str = "config.toml";

/// Upper bound of tracked process entries before the oldest finished ones are evicted.
pub const MAX_TRACKED_PROCESSES: usize = 256;

/// Marker written in front of an output buffer once its oldest bytes were dropped.
pub const TRUNCATION_MARKER: &str = "[... output truncated:";

/// Time allowed for the output readers to drain once the process itself is gone.
pub const READER_GRACE_MS: u64 = 500;

/// Largest slice of child output read from a pipe in one go.
pub const READ_CHUNK_BYTES: usize = 8192;

/// Time allowed for each `--version` query while detecting shells.
pub const VERSION_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Time allowed for each health probe command.
pub const HEALTH_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Text echoed by the health probe.
pub const HEALTH_PROBE_TOKEN: &str = "shellman-health-probe";

/// Number of consecutive sweeps a running entry must be missing from the OS
/// process table before it is declared a zombie.
pub const ZOMBIE_STRIKES: u8 = 2;

/// A command timing out in more than this share of its runs is flagged.
pub const TIMEOUT_RATE_THRESHOLD: f64 = 0.20;

/// Overall success rate (percent) under which a review is recommended.
pub const LOW_SUCCESS_RATE_PERCENT: f64 = 80.0;

/// Average duration above which a command is suggested for background execution.
pub const SLOW_COMMAND_MS: f64 = 10_000.0;

/// Default number of rows in the slow/failing rankings.
pub const DEFAULT_TOP_N: usize = 5;

// --- Validation ranges for numeric settings ---

/// Smallest accepted default timeout.
pub const MIN_TIMEOUT_MS: u64 = 1;
/// Largest accepted default timeout (one hour).
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;
/// Smallest accepted concurrency cap.
pub const MIN_CONCURRENT_PROCESSES: usize = 1;
/// Largest accepted concurrency cap.
pub const MAX_CONCURRENT_PROCESSES: usize = 256;
/// Smallest accepted history capacity.
pub const MIN_HISTORY_CAPACITY: usize = 1;
/// Largest accepted history capacity.
pub const MAX_HISTORY_CAPACITY: usize = 100_000;
/// Smallest accepted zombie sweep interval.
pub const MIN_SWEEP_INTERVAL_MS: u64 = 100;
/// Largest accepted zombie sweep interval.
pub const MAX_SWEEP_INTERVAL_MS: u64 = 600_000;
