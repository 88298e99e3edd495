// src/cli/dispatcher.rs

use crate::cli::{
    handlers,
    session::{Interrupted, Session},
};
use anyhow::{Result, anyhow};
use colored::*;
use std::io::{self, Write};

// --- Command Definition and Registry ---

/// Defines a command, its aliases, a one-line summary and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    summary: &'static str,
    handler: fn(Vec<String>, &Session) -> Result<()>,
}

/// The single source of truth for all commands.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "run",
        aliases: &["exec"],
        summary: "Run a command and wait for it",
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "bg",
        aliases: &["background"],
        summary: "Start a command in the background",
        handler: handlers::bg::handle,
    },
    CommandDefinition {
        name: "ps",
        aliases: &["list"],
        summary: "List tracked processes",
        handler: handlers::ps::handle,
    },
    CommandDefinition {
        name: "kill",
        aliases: &[],
        summary: "Terminate background processes and their children",
        handler: handlers::kill::handle,
    },
    CommandDefinition {
        name: "output",
        aliases: &["logs"],
        summary: "Show the captured output of a process",
        handler: handlers::output::handle,
    },
    CommandDefinition {
        name: "sysinfo",
        aliases: &[],
        summary: "Show host platform and resources",
        handler: handlers::sysinfo::handle,
    },
    CommandDefinition {
        name: "config",
        aliases: &[],
        summary: "Show or change the configuration",
        handler: handlers::config::handle,
    },
    CommandDefinition {
        name: "history",
        aliases: &["exec-history", "execHistory"],
        summary: "Show past executions",
        handler: handlers::history::handle,
    },
    CommandDefinition {
        name: "shells",
        aliases: &[],
        summary: "List supported shells",
        handler: handlers::shells::handle,
    },
    CommandDefinition {
        name: "escape",
        aliases: &[],
        summary: "Escape text as one literal shell token",
        handler: handlers::escape::handle,
    },
    CommandDefinition {
        name: "diagnostics",
        aliases: &["health"],
        summary: "Probe shells and report problems",
        handler: handlers::diagnostics::handle,
    },
    CommandDefinition {
        name: "processes",
        aliases: &["stats"],
        summary: "Count tracked processes by status",
        handler: handlers::processes::handle,
    },
    CommandDefinition {
        name: "performance",
        aliases: &["perf"],
        summary: "Analyze execution history",
        handler: handlers::performance::handle,
    },
    CommandDefinition {
        name: "clear-history",
        aliases: &["clearHistory"],
        summary: "Delete all recorded executions",
        handler: handlers::clear_history::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// The command list shown by `help` and after `--help`.
pub fn command_overview() -> String {
    let mut overview = String::from("Commands:\n");
    for cmd in COMMAND_REGISTRY {
        overview.push_str(&format!("  {:<15} {}\n", cmd.name, cmd.summary));
    }
    overview.push_str("\nRun '<command> --help' for the options of a command.");
    overview
}

/// Routes `all_args` (command name first) to its handler.
///
/// `--help` output from a handler is printed and treated as success; other
/// argument errors are printed in clap's format and reported as a failure.
pub fn dispatch(all_args: Vec<String>, session: &Session) -> Result<()> {
    log::debug!("Dispatching args: {:?}", all_args);

    let Some((name, rest)) = all_args.split_first() else {
        println!("{}", command_overview());
        return Ok(());
    };
    if matches!(name.as_str(), "help" | "--help" | "-h") {
        println!("{}", command_overview());
        return Ok(());
    }

    let command = find_command(name).ok_or_else(|| {
        anyhow!(
            "Unknown command '{}'. Run 'help' to list the available commands.",
            name
        )
    })?;

    let result = (command.handler)(rest.to_vec(), session);
    let Err(error) = result else {
        return Ok(());
    };
    let Some(clap_error) = error.downcast_ref::<clap::Error>() else {
        return Err(error);
    };
    clap_error.print()?;
    match clap_error.kind() {
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => Ok(()),
        _ => Err(anyhow!("Invalid arguments for '{}'.", command.name)),
    }
}

/// Reads commands from stdin until `exit`, `quit` or end of input.
///
/// Errors are printed and the loop continues; background processes stay
/// tracked for the whole session.
pub fn run_interactive(session: &mut Session) -> Result<()> {
    session.set_interactive(true);
    println!(
        "{} Type {} for commands, {} to leave.",
        "shellman".cyan().bold(),
        "help".bold(),
        "exit".bold()
    );

    let mut line = String::new();
    loop {
        print!("{} ", "shellman>".cyan());
        io::stdout().flush()?;

        // Locks stdin per line only, so prompts inside handlers can read it too.
        line.clear();
        if io::stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit") {
            break;
        }

        let Some(words) = shlex::split(trimmed) else {
            eprintln!("{}: unbalanced quotes", "Error".red().bold());
            continue;
        };
        if let Err(e) = dispatch(words, session) {
            if e.downcast_ref::<Interrupted>().is_some() {
                println!("{}", "^C".dimmed());
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_their_command() {
        assert_eq!(find_command("execHistory").map(|c| c.name), Some("history"));
        assert_eq!(find_command("clearHistory").map(|c| c.name), Some("clear-history"));
        assert_eq!(find_command("bg").map(|c| c.name), Some("bg"));
        assert!(find_command("rm").is_none());
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut names: Vec<&str> = COMMAND_REGISTRY
            .iter()
            .flat_map(|c| std::iter::once(c.name).chain(c.aliases.iter().copied()))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_overview_lists_every_command() {
        let overview = command_overview();
        for cmd in COMMAND_REGISTRY {
            assert!(overview.contains(cmd.name));
        }
    }
}
