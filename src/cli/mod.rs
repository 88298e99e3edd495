// src/cli/mod.rs

use clap::Parser;

pub mod dispatcher;
pub mod handlers;
pub mod session;

/// shellman: run, track and diagnose shell commands across platforms.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// Config file to load instead of `<config dir>/shellman/config.toml`.
    #[arg(long, short, value_name = "PATH")]
    pub config: Option<String>,

    /// Profile to start with (default, secure, performance, debug).
    #[arg(long, short)]
    pub profile: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(long, short)]
    pub verbose: bool,

    /// The command and its arguments. Starts an interactive session when empty.
    #[arg(allow_hyphen_values = true, value_name = "COMMAND")]
    pub args: Vec<String>,
}
