// src/cli/handlers/commons.rs

// Shared parsing and rendering helpers for the handlers.

use crate::models::{ExecutionOptions, ProcessStatus, ShellType, now_ms};
use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;

/// clap value parser for shell names.
pub fn parse_shell(raw: &str) -> Result<ShellType, String> {
    raw.parse::<ShellType>().map_err(|e| e.to_string())
}

/// clap value parser for process statuses.
pub fn parse_status(raw: &str) -> Result<ProcessStatus, String> {
    raw.parse::<ProcessStatus>()
}

/// Rebuilds the command line from the trailing words given on the CLI.
///
/// A single word is taken as the full command line. With several words, any
/// word holding blanks or quotes is re-quoted POSIX-style so it stays one
/// word; operators such as `|` or `&&` stay bare.
pub fn join_command(words: &[String]) -> String {
    if let [single] = words {
        return single.clone();
    }
    words
        .iter()
        .map(|word| {
            if needs_requoting(word) {
                shlex::try_quote(word).unwrap_or(Cow::Borrowed(word.as_str()))
            } else {
                Cow::Borrowed(word.as_str())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn needs_requoting(word: &str) -> bool {
    word.is_empty() || word.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"')
}

/// Builds execution options from the flags shared by `run` and `bg`.
pub fn execution_options(
    shell: Option<ShellType>,
    timeout_ms: Option<u64>,
    sandbox: bool,
    no_sandbox: bool,
) -> ExecutionOptions {
    let sandbox = match (sandbox, no_sandbox) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    };
    ExecutionOptions {
        timeout_ms,
        shell,
        sandbox,
    }
}

/// Prints any serializable value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn colored_status(status: ProcessStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ProcessStatus::Running => label.cyan().bold(),
        ProcessStatus::Completed => label.green(),
        ProcessStatus::Error => label.red(),
        ProcessStatus::Killed => label.yellow(),
        ProcessStatus::Zombie => label.magenta().bold(),
    }
}

/// Human-readable duration: `850 ms`, `12.3 s`, `4m 05s`.
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms} ms")
    } else if ms < 60_000 {
        format!("{:.1} s", ms as f64 / 1000.0)
    } else {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

/// Formats an averaged duration given in fractional milliseconds.
pub fn format_avg_ms(ms: f64) -> String {
    Duration::try_from_secs_f64(ms / 1000.0)
        .map(|d| format_duration(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)))
        .unwrap_or_else(|_| "-".to_string())
}

/// How long ago an epoch-millisecond timestamp was.
pub fn format_age(timestamp_ms: u64) -> String {
    let age = now_ms().saturating_sub(timestamp_ms);
    format!("{} ago", format_duration(age))
}

/// Shortens a command for one-line listings.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let kept: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_join_command_keeps_words_with_quotes_intact() {
        let original = words(&["echo", "it's", "two  spaces", ""]);
        let joined = join_command(&original);
        assert_eq!(shlex::split(&joined), Some(original));
    }

    #[test]
    fn test_join_command_leaves_operators_bare() {
        assert_eq!(join_command(&words(&["ls", "|", "grep", "x"])), "ls | grep x");
        assert_eq!(join_command(&words(&["true", "&&", "echo", "ok"])), "true && echo ok");
    }

    #[test]
    fn test_join_command_passes_single_word_verbatim() {
        assert_eq!(join_command(&words(&["echo 'a b' | wc -c"])), "echo 'a b' | wc -c");
        assert_eq!(join_command(&[]), "");
    }

    #[test]
    fn test_format_duration_scales() {
        assert_eq!(format_duration(850), "850 ms");
        assert_eq!(format_duration(12_345), "12.3 s");
        assert_eq!(format_duration(245_000), "4m 05s");
        assert_eq!(format_avg_ms(1_500.4), "1.5 s");
        assert_eq!(format_avg_ms(f64::NAN), "-");
    }

    #[test]
    fn test_truncate_flattens_and_shortens() {
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }

    #[test]
    fn test_sandbox_flags_resolve() {
        assert_eq!(execution_options(None, None, true, false).sandbox, Some(true));
        assert_eq!(execution_options(None, None, false, true).sandbox, Some(false));
        assert_eq!(execution_options(None, None, false, false).sandbox, None);
    }
}
