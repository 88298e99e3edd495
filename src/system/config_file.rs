// src/system/config_file.rs

use crate::{
    constants::{CONFIG_DIR_NAME, CONFIG_FILENAME},
    core::config_manager::{ConfigError, apply_update},
    models::{Config, ConfigUpdate},
};
use std::fs;
use std::path::{Path, PathBuf};

/// `<system config dir>/shellman/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}

/// Expands a leading `~` in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Reads a partial config from a TOML file.
pub fn load_update(path: &Path) -> Result<ConfigUpdate, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Builds the startup config: the `default` preset, then the config file, then `overrides`.
///
/// An explicit `path` must exist. The default location is optional.
pub fn resolve_config(path: Option<&Path>, overrides: &ConfigUpdate) -> Result<Config, ConfigError> {
    let file = match path {
        Some(path) => Some((path.to_path_buf(), load_update(path)?)),
        None => match default_config_path() {
            Some(default) if default.is_file() => {
                let update = load_update(&default)?;
                Some((default, update))
            }
            _ => None,
        },
    };

    let mut config = Config::default();
    if let Some((path, update)) = file {
        log::debug!("Loading config from '{}'", path.display());
        config = apply_update(&config, &update)?;
    }
    apply_update(&config, overrides)
}

/// Writes `config` as a complete TOML file, creating parent directories.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let toml_string = toml::to_string_pretty(&ConfigUpdate::from(config))?;
    fs::write(path, toml_string).map_err(io_error)?;
    log::info!("Config saved to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, ShellType};

    #[test]
    fn test_file_then_overrides_layering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "profile = \"performance\"\npreferred_shell = \"sh\"\ndefault_timeout_ms = 5000\n",
        )
        .expect("write config");

        let overrides = ConfigUpdate {
            default_timeout_ms: Some(7_000),
            ..ConfigUpdate::default()
        };
        let config = resolve_config(Some(&path), &overrides).expect("valid config");
        assert_eq!(config.profile, Profile::Performance);
        assert_eq!(config.preferred_shell, Some(ShellType::Sh));
        assert_eq!(config.default_timeout_ms, 7_000);
        assert_eq!(config.max_concurrent_processes, 50);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = resolve_config(Some(&dir.path().join("nope.toml")), &ConfigUpdate::default());
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_values_in_file_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "history_capacity = 0\n").expect("write config");
        assert!(matches!(
            resolve_config(Some(&path), &ConfigUpdate::default()),
            Err(ConfigError::OutOfRange { field: "history_capacity", .. })
        ));

        fs::write(&path, "profile = \"turbo\"\n").expect("write config");
        assert!(matches!(
            resolve_config(Some(&path), &ConfigUpdate::default()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_saved_config_loads_back_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Profile::Secure.preset();
        config.default_timeout_ms = 1_234;
        save_config(&path, &config).expect("save");
        let loaded = resolve_config(Some(&path), &ConfigUpdate::default()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_tilde_is_expanded() {
        let expanded = expand_path("~/shellman.toml");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/abs/path.toml"), PathBuf::from("/abs/path.toml"));
    }
}
