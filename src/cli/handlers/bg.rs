// src/cli/handlers/bg.rs

use crate::{
    cli::{handlers::commons, session::Session},
    models::ShellType,
};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Starts a command in the background and prints its pid."
)]
struct BgArgs {
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

/// The main handler for the `bg` command.
///
/// Outside the interactive session the process would die with shellman, so
/// the handler follows it to the end and prints what it produced.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let bg_args = BgArgs::try_parse_from(&args)?;
    let command = commons::join_command(&bg_args.command);
    let options =
        commons::execution_options(bg_args.shell, None, bg_args.sandbox, bg_args.no_sandbox);
    let manager = session.manager();

    let pid = session.block_on(manager.background(&command, &options))??;
    if session.json() && session.is_interactive() {
        return commons::print_json(&serde_json::json!({ "pid": pid }));
    }
    if !session.json() {
        println!("{} {}", "Started background process".green(), pid.to_string().bold());
    }
    if session.is_interactive() {
        return Ok(());
    }

    if !session.json() {
        eprintln!(
            "{}",
            "Not in an interactive session: following the process until it exits (Ctrl+C kills it)."
                .dimmed()
        );
    }
    let status = session.block_on(manager.wait_for_exit(pid))??;
    let stdout = manager.get_output(pid).unwrap_or_default();
    let stderr = manager.get_errors(pid).unwrap_or_default();
    if session.json() {
        return commons::print_json(&serde_json::json!({
            "pid": pid,
            "status": status,
            "stdout": stdout,
            "stderr": stderr,
        }));
    }
    print!("{stdout}");
    eprint!("{stderr}");
    println!("Process {} finished: {}", pid, commons::colored_status(status));
    Ok(())
}
