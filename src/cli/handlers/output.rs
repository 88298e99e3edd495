// src/cli/handlers/output.rs

use crate::{
    cli::{handlers::commons, session::Session},
    core::tracker::TrackerError,
};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Prints the buffered output of a background process."
)]
struct OutputArgs {
    /// Pid of the tracked process.
    pid: u32,

    /// Print stderr instead of stdout.
    #[arg(long, short = 'e')]
    stderr: bool,

    /// Wait for the process to finish before printing.
    #[arg(long, short)]
    wait: bool,
}

/// The main handler for the `output` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let output_args = OutputArgs::try_parse_from(&args)?;
    let manager = session.manager();
    let pid = output_args.pid;

    if output_args.wait {
        session.block_on(manager.wait_for_exit(pid))??;
    }
    let text = if output_args.stderr {
        manager.get_errors(pid)
    } else {
        manager.get_output(pid)
    }
    .ok_or(TrackerError::ProcessNotFound(pid))?;

    if session.json() {
        let stream = if output_args.stderr { "stderr" } else { "stdout" };
        let mut body = serde_json::Map::new();
        body.insert("pid".to_string(), pid.into());
        body.insert(stream.to_string(), text.into());
        return commons::print_json(&body);
    }
    print!("{text}");
    if !text.is_empty() && !text.ends_with('\n') {
        println!();
    }
    Ok(())
}
