// src/cli/handlers/run.rs

use crate::{
    cli::{
        handlers::commons,
        session::{NonZeroExit, Session},
    },
    models::ShellType,
};
use anyhow::Result;
use clap::Parser;
use colored::*;
use std::io::Write;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Runs a command in the foreground and waits for it (or its timeout)."
)]
struct RunArgs {
    /// Timeout in milliseconds. Defaults to the profile's timeout.
    #[arg(long, short)]
    timeout: Option<u64>,

    /// Shell to run through (cmd, powershell, pwsh, bash, sh, zsh).
    #[arg(long, short, value_parser = commons::parse_shell)]
    shell: Option<ShellType>,

    /// Force the sandbox policy on for this call.
    #[arg(long, conflicts_with = "no_sandbox")]
    sandbox: bool,

    /// Skip the sandbox policy for this call.
    #[arg(long)]
    no_sandbox: bool,

    /// The command line to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// The main handler for the `run` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let run_args = RunArgs::try_parse_from(&args)?;
    let command = commons::join_command(&run_args.command);
    let options = commons::execution_options(
        run_args.shell,
        run_args.timeout,
        run_args.sandbox,
        run_args.no_sandbox,
    );
    let timeout_ms = options
        .timeout_ms
        .unwrap_or_else(|| session.manager().get_config().default_timeout_ms);

    let result = session.block_on(session.manager().exec(&command, &options))??;

    if session.json() {
        commons::print_json(&result)?;
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        std::io::stdout().flush()?;
        let outcome = match (result.timed_out, result.exit_code) {
            (true, _) => "timed out".red().bold(),
            (false, Some(0)) => "exit 0".green(),
            (false, Some(code)) => format!("exit {code}").red(),
            (false, None) => "killed by signal".yellow(),
        };
        log::debug!("'{}' finished via {}", command, result.shell);
        eprintln!(
            "{}",
            format!(
                "[{} | {} | {}]",
                outcome,
                commons::format_duration(result.duration_ms),
                result.shell
            )
            .dimmed()
        );
    }

    let result = result.check(&command, timeout_ms)?;
    match result.exit_code {
        Some(0) => Ok(()),
        Some(code) => Err(NonZeroExit { code }.into()),
        None => Err(NonZeroExit { code: 1 }.into()),
    }
}
