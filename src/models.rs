// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::system::{executor::ExecutionError, shell::ShellError};

// --- SHELLS ---

/// The closed set of shells the manager knows how to drive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    /// Windows `cmd.exe`.
    Cmd,
    /// Windows PowerShell 5.x (`powershell.exe`).
    PowerShell,
    /// PowerShell 7+ (`pwsh`), cross-platform.
    Pwsh,
    /// GNU Bash.
    Bash,
    /// POSIX `sh` (dash, busybox, ...).
    Sh,
    /// Z shell.
    Zsh,
}

impl ShellType {
    /// Every shell type, in probing order.
    pub const ALL: [Self; 6] = [
        Self::Cmd,
        Self::PowerShell,
        Self::Pwsh,
        Self::Bash,
        Self::Sh,
        Self::Zsh,
    ];

    /// The canonical lowercase name used in config files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::PowerShell => "powershell",
            Self::Pwsh => "pwsh",
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Zsh => "zsh",
        }
    }

    /// Whether the shell follows POSIX quoting rules.
    pub fn is_posix(self) -> bool {
        matches!(self, Self::Bash | Self::Sh | Self::Zsh)
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShellType {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let bare = lowered.strip_suffix(".exe").unwrap_or(&lowered);
        match bare {
            "cmd" => Ok(Self::Cmd),
            "powershell" => Ok(Self::PowerShell),
            "pwsh" => Ok(Self::Pwsh),
            "bash" => Ok(Self::Bash),
            "sh" => Ok(Self::Sh),
            "zsh" => Ok(Self::Zsh),
            _ => Err(ShellError::UnknownShell(s.to_string())),
        }
    }
}

/// The result of probing the host for one shell type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShellDescriptor {
    pub shell: ShellType,
    /// Resolved binary path; `None` when the shell is unavailable.
    pub path: Option<PathBuf>,
    /// First line reported by the shell's version query, when it has one.
    pub version: Option<String>,
    pub available: bool,
}

impl ShellDescriptor {
    /// Descriptor for a shell that could not be found.
    pub fn unavailable(shell: ShellType) -> Self {
        Self {
            shell,
            path: None,
            version: None,
            available: false,
        }
    }
}

// --- EXECUTION ---

/// Per-call execution options. Unset fields fall back to the active config.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub timeout_ms: Option<u64>,
    pub shell: Option<ShellType>,
    pub sandbox: Option<bool>,
}

/// The outcome of a foreground execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal (including a timeout kill).
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub shell: ShellType,
}

impl ExecResult {
    /// Whether the command ran to completion with exit code 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Converts a timed-out result into [`ExecutionError::Timeout`] for callers
    /// that treat a timeout as a hard failure.
    pub fn check(self, command: &str, timeout_ms: u64) -> Result<Self, ExecutionError> {
        if self.timed_out {
            return Err(ExecutionError::Timeout {
                shell: self.shell,
                command: command.to_string(),
                timeout_ms,
            });
        }
        Ok(self)
    }
}

/// Which captured stream an operation refers to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

// --- PROCESSES ---

/// Lifecycle status of a tracked process. `Running` is the only non-terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Error,
    Killed,
    Zombie,
}

impl ProcessStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only `Running -> terminal` transitions are legal.
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Running && next.is_terminal()
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Killed => "killed",
            Self::Zombie => "zombie",
        };
        f.write_str(label)
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "killed" => Ok(Self::Killed),
            "zombie" => Ok(Self::Zombie),
            other => Err(format!("unknown process status '{other}'")),
        }
    }
}

/// An immutable snapshot of a tracked process, without its output buffers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessSummary {
    pub pid: u32,
    pub command: String,
    pub shell: ShellType,
    pub status: ProcessStatus,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
}

/// Per-status counts of tracked processes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
    pub killed: usize,
    pub zombie: usize,
}

// --- HISTORY ---

/// One finished execution. Immutable once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub command: String,
    pub shell: ShellType,
    /// Milliseconds since the Unix epoch at which the execution started.
    pub timestamp_ms: u64,
    pub exit_code: Option<i32>,
    /// `None` when the process never ran (spawn failure, policy denial).
    pub duration_ms: Option<u64>,
    pub timed_out: bool,
}

impl HistoryEntry {
    /// An execution counts as successful when it exited with 0 and did not time out.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

// --- CONFIGURATION ---

/// A named preset of settings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Default,
    Secure,
    Performance,
    Debug,
}

impl Profile {
    /// Every profile, in display order.
    pub const ALL: [Self; 4] = [Self::Default, Self::Secure, Self::Performance, Self::Debug];

    /// The canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Secure => "secure",
            Self::Performance => "performance",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The effective manager configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub profile: Profile,
    /// `None` selects the platform default shell.
    pub preferred_shell: Option<ShellType>,
    pub default_timeout_ms: u64,
    pub sandbox: bool,
    pub verbose: bool,
    pub max_concurrent_processes: usize,
    pub track_history: bool,
    pub history_capacity: usize,
    /// Per-stream output cap in bytes; `0` means unbounded.
    pub max_output_bytes: usize,
    /// Shells permitted for spawning; empty means any shell.
    pub allowed_shells: Vec<ShellType>,
    pub zombie_sweep_interval_ms: u64,
}

impl Config {
    /// The output cap as an option, `None` meaning unbounded.
    pub fn output_cap(&self) -> Option<usize> {
        (self.max_output_bytes > 0).then_some(self.max_output_bytes)
    }

    /// Whether the profile permits spawning through `shell`.
    pub fn shell_allowed(&self, shell: ShellType) -> bool {
        self.allowed_shells.is_empty() || self.allowed_shells.contains(&shell)
    }
}

/// A partial configuration. Every set field overrides the current value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    pub profile: Option<Profile>,
    pub preferred_shell: Option<ShellType>,
    pub default_timeout_ms: Option<u64>,
    pub sandbox: Option<bool>,
    pub verbose: Option<bool>,
    pub max_concurrent_processes: Option<usize>,
    pub track_history: Option<bool>,
    pub history_capacity: Option<usize>,
    pub max_output_bytes: Option<usize>,
    pub allowed_shells: Option<Vec<ShellType>>,
    pub zombie_sweep_interval_ms: Option<u64>,
}

/// Point-in-time counters of the manager.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
    pub running: usize,
    pub tracked: usize,
    pub history_size: usize,
    /// Foreground executions currently in flight.
    pub sessions_active: usize,
}

// --- DIAGNOSTICS ---

/// Host information plus the detected shells.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub platform: String,
    pub arch: String,
    pub family: String,
    pub hostname: Option<String>,
    pub os_version: Option<String>,
    pub cpu_count: usize,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub uptime_secs: u64,
    pub shells: Vec<ShellDescriptor>,
}

/// The result of running the trivial probe through one shell.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShellProbe {
    pub shell: ShellType,
    pub available: bool,
    pub responsive: bool,
    pub latency_ms: Option<u64>,
    pub detail: Option<String>,
}

/// Aggregated shell health.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub default_shell: Option<ShellType>,
    pub probes: Vec<ShellProbe>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Time window and ranking size for a performance analysis.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PerformanceQuery {
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    pub top_n: usize,
}

impl Default for PerformanceQuery {
    fn default() -> Self {
        Self {
            start_time_ms: None,
            end_time_ms: None,
            top_n: crate::constants::DEFAULT_TOP_N,
        }
    }
}

/// Duration statistics over the executions that actually ran.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionTimeStats {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// One row of the slowest-commands ranking.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SlowCommand {
    pub command: String,
    pub runs: usize,
    pub avg_ms: f64,
    pub max_ms: u64,
}

/// One row of the failing-commands ranking.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailingCommand {
    pub command: String,
    pub runs: usize,
    pub failures: usize,
    pub timeouts: usize,
    /// Percentage of runs that failed.
    pub failure_rate: f64,
}

/// Analytics over the execution history.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub total_executions: usize,
    /// Percentage (0-100) of executions that completed with exit code 0.
    pub success_rate: f64,
    /// Percentage (0-100) of executions that hit their timeout.
    pub timeout_rate: f64,
    pub execution_time: ExecutionTimeStats,
    pub top_slow: Vec<SlowCommand>,
    pub top_failing: Vec<FailingCommand>,
    pub recommendations: Vec<String>,
}

// --- TIME HELPERS ---

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

/// A duration in whole milliseconds, saturating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
