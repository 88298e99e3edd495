// src/cli/handlers/escape.rs

use crate::{
    cli::{handlers::commons, session::Session},
    models::ShellType,
};
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Prints a string escaped as one literal token for a shell."
)]
struct EscapeArgs {
    /// Target shell. Defaults to the platform's default shell.
    #[arg(long, short, value_parser = commons::parse_shell)]
    shell: Option<ShellType>,

    /// Only wrap TEXT in the shell's outer quotes (TEXT is already escaped).
    #[arg(long, short)]
    quote: bool,

    /// The text to escape.
    #[arg(allow_hyphen_values = true)]
    text: String,
}

/// The main handler for the `escape` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let escape_args = EscapeArgs::try_parse_from(&args)?;
    let manager = session.manager();
    let escaped = if escape_args.quote {
        session.block_on(manager.quote(&escape_args.text, escape_args.shell))??
    } else {
        session.block_on(manager.escape(&escape_args.text, escape_args.shell))??
    };

    if session.json() {
        return commons::print_json(&serde_json::json!({ "escaped": escaped }));
    }
    println!("{escaped}");
    Ok(())
}
