// src/cli/handlers/config.rs

use crate::{
    cli::{handlers::commons, session::Session},
    models::{ConfigUpdate, Profile},
    system::config_file,
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Shows or changes the active configuration."
)]
struct ConfigArgs {
    /// Switch to a profile preset (default, secure, performance, debug).
    #[arg(long, short)]
    profile: Option<String>,

    /// Override a setting, e.g. `--set default_timeout_ms=5000` (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Write the resulting configuration to the config file.
    #[arg(long)]
    save: bool,

    /// Print the config file location.
    #[arg(long)]
    path: bool,

    /// Show runtime metrics instead of the settings.
    #[arg(long, short)]
    metrics: bool,
}

/// Parses one `--set` value: integers, booleans, `[a, b]` lists, or plain strings.
fn parse_value(raw: &str) -> toml::Value {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<i64>() {
        return toml::Value::Integer(number);
    }
    if let Ok(flag) = raw.parse::<bool>() {
        return toml::Value::Boolean(flag);
    }
    if let Some(inner) = raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_value)
            .collect();
        return toml::Value::Array(items);
    }
    toml::Value::String(raw.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Turns `KEY=VALUE` pairs into a validated-by-type partial config.
fn parse_assignments(pairs: &[String]) -> Result<ConfigUpdate> {
    let mut table = toml::Table::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'.", pair))?;
        table.insert(key.trim().replace('-', "_"), parse_value(raw));
    }
    toml::Value::Table(table)
        .try_into()
        .context("Invalid setting")
}

/// The main handler for the `config` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let config_args = ConfigArgs::try_parse_from(&args)?;
    let manager = session.manager();

    if config_args.path {
        match session.config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", "No config directory on this platform.".yellow()),
        }
        return Ok(());
    }

    if config_args.metrics {
        let metrics = manager.get_metrics();
        if session.json() {
            return commons::print_json(&metrics);
        }
        println!("{}", "--- Metrics ---".bold());
        println!("  {:<18} {}", "running".blue(), metrics.running);
        println!("  {:<18} {}", "tracked".blue(), metrics.tracked);
        println!("  {:<18} {}", "history size".blue(), metrics.history_size);
        println!("  {:<18} {}", "active sessions".blue(), metrics.sessions_active);
        return Ok(());
    }

    let mut update = parse_assignments(&config_args.set)?;
    if let Some(profile) = &config_args.profile {
        update.profile = Some(profile.parse::<Profile>()?);
    }
    let config = if update == ConfigUpdate::default() {
        manager.get_config()
    } else {
        manager.update_config(&update)?
    };

    if config_args.save {
        let path = session
            .config_path()
            .ok_or_else(|| anyhow!("No config directory on this platform; use --config <path>."))?;
        config_file::save_config(&path, &config)?;
        if !session.json() {
            println!("{} {}", "Saved to".green(), path.display());
        }
    }

    if session.json() {
        return commons::print_json(&config);
    }
    println!("{} '{}'", "--- Active profile".bold(), config.profile.to_string().yellow());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShellType;

    #[test]
    fn test_assignments_are_typed() {
        let update = parse_assignments(&[
            "default_timeout_ms=5000".to_string(),
            "sandbox=true".to_string(),
            "preferred-shell=zsh".to_string(),
            "allowed_shells=[bash, sh]".to_string(),
        ])
        .expect("valid assignments");
        assert_eq!(update.default_timeout_ms, Some(5_000));
        assert_eq!(update.sandbox, Some(true));
        assert_eq!(update.preferred_shell, Some(ShellType::Zsh));
        assert_eq!(update.allowed_shells, Some(vec![ShellType::Bash, ShellType::Sh]));
    }

    #[test]
    fn test_unknown_keys_and_bad_pairs_are_rejected() {
        assert!(parse_assignments(&["colour=red".to_string()]).is_err());
        assert!(parse_assignments(&["sandbox".to_string()]).is_err());
        assert!(parse_assignments(&["max_concurrent_processes=-1".to_string()]).is_err());
    }
}
