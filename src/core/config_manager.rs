// src/core/config_manager.rs

use crate::{
    constants::{
        MAX_CONCURRENT_PROCESSES, MAX_HISTORY_CAPACITY, MAX_SWEEP_INTERVAL_MS, MAX_TIMEOUT_MS,
        MIN_CONCURRENT_PROCESSES, MIN_HISTORY_CAPACITY, MIN_SWEEP_INTERVAL_MS, MIN_TIMEOUT_MS,
    },
    models::{Config, ConfigUpdate, Profile, ShellType},
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid profile '{0}'. Expected one of: default, secure, performance, debug.")]
    InvalidProfile(String),
    #[error("Setting '{field}' = {value} is out of range (allowed: {min}..={max}).")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("Preferred shell '{0}' is not in the profile's allowed shells.")]
    ShellNotAllowed(ShellType),
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<&Config> for ConfigUpdate {
    fn from(config: &Config) -> Self {
        Self {
            profile: Some(config.profile),
            preferred_shell: config.preferred_shell,
            default_timeout_ms: Some(config.default_timeout_ms),
            sandbox: Some(config.sandbox),
            verbose: Some(config.verbose),
            max_concurrent_processes: Some(config.max_concurrent_processes),
            track_history: Some(config.track_history),
            history_capacity: Some(config.history_capacity),
            max_output_bytes: Some(config.max_output_bytes),
            allowed_shells: Some(config.allowed_shells.clone()),
            zombie_sweep_interval_ms: Some(config.zombie_sweep_interval_ms),
        }
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::InvalidProfile(s.to_string()))
    }
}

impl Profile {
    /// The full settings a profile stands for.
    pub fn preset(self) -> Config {
        let base = Config {
            profile: self,
            preferred_shell: None,
            default_timeout_ms: 30_000,
            sandbox: false,
            verbose: false,
            max_concurrent_processes: 10,
            track_history: true,
            history_capacity: 1_000,
            max_output_bytes: 1024 * 1024,
            allowed_shells: Vec::new(),
            zombie_sweep_interval_ms: 5_000,
        };
        match self {
            Self::Default => base,
            Self::Secure => Config {
                sandbox: true,
                default_timeout_ms: 10_000,
                max_concurrent_processes: 5,
                max_output_bytes: 256 * 1024,
                allowed_shells: vec![
                    ShellType::Bash,
                    ShellType::Sh,
                    ShellType::PowerShell,
                    ShellType::Pwsh,
                ],
                ..base
            },
            Self::Performance => Config {
                default_timeout_ms: 120_000,
                max_concurrent_processes: 50,
                history_capacity: 5_000,
                max_output_bytes: 4 * 1024 * 1024,
                ..base
            },
            Self::Debug => Config {
                verbose: true,
                default_timeout_ms: 60_000,
                max_output_bytes: 0,
                ..base
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Profile::Default.preset()
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Checks every numeric setting against its range and the preferred shell against the allowlist.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    check_range(
        "default_timeout_ms",
        config.default_timeout_ms,
        MIN_TIMEOUT_MS,
        MAX_TIMEOUT_MS,
    )?;
    check_range(
        "max_concurrent_processes",
        as_u64(config.max_concurrent_processes),
        as_u64(MIN_CONCURRENT_PROCESSES),
        as_u64(MAX_CONCURRENT_PROCESSES),
    )?;
    check_range(
        "history_capacity",
        as_u64(config.history_capacity),
        as_u64(MIN_HISTORY_CAPACITY),
        as_u64(MAX_HISTORY_CAPACITY),
    )?;
    check_range(
        "zombie_sweep_interval_ms",
        config.zombie_sweep_interval_ms,
        MIN_SWEEP_INTERVAL_MS,
        MAX_SWEEP_INTERVAL_MS,
    )?;
    if let Some(shell) = config.preferred_shell {
        if !config.shell_allowed(shell) {
            return Err(ConfigError::ShellNotAllowed(shell));
        }
    }
    Ok(())
}

/// Computes the config that results from layering `update` over `current`.
///
/// A profile in the update replaces everything with that profile's preset
/// first; the remaining explicit fields then win over the preset values.
pub fn apply_update(current: &Config, update: &ConfigUpdate) -> Result<Config, ConfigError> {
    let mut next = match update.profile {
        Some(profile) => profile.preset(),
        None => current.clone(),
    };
    if let Some(shell) = update.preferred_shell {
        next.preferred_shell = Some(shell);
    }
    if let Some(timeout) = update.default_timeout_ms {
        next.default_timeout_ms = timeout;
    }
    if let Some(sandbox) = update.sandbox {
        next.sandbox = sandbox;
    }
    if let Some(verbose) = update.verbose {
        next.verbose = verbose;
    }
    if let Some(max) = update.max_concurrent_processes {
        next.max_concurrent_processes = max;
    }
    if let Some(track) = update.track_history {
        next.track_history = track;
    }
    if let Some(capacity) = update.history_capacity {
        next.history_capacity = capacity;
    }
    if let Some(bytes) = update.max_output_bytes {
        next.max_output_bytes = bytes;
    }
    if let Some(shells) = &update.allowed_shells {
        next.allowed_shells = shells.clone();
    }
    if let Some(interval) = update.zombie_sweep_interval_ms {
        next.zombie_sweep_interval_ms = interval;
    }
    validate(&next)?;
    Ok(next)
}

/// Holds the active configuration.
///
/// Updates are validated as a whole and applied atomically: a rejected update
/// leaves the previous configuration untouched.
#[derive(Debug, Default)]
pub struct ConfigManager {
    current: RwLock<Config>,
}

impl ConfigManager {
    /// Creates a manager with a validated initial config.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        validate(&config)?;
        Ok(Self {
            current: RwLock::new(config),
        })
    }

    /// A copy of the active config.
    pub fn get_config(&self) -> Config {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `update` and returns the new config.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Config, ConfigError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = apply_update(&current, update)?;
        if next.profile != current.profile {
            log::info!("Switching profile '{}' -> '{}'", current.profile, next.profile);
        }
        log::debug!("Config updated: {:?}", next);
        *current = next.clone();
        Ok(next)
    }
}
