// src/bin/shellman.rs

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches};
use colored::*;
use shellman::{
    cli::{
        Cli, dispatcher,
        session::{Interrupted, NonZeroExit, Session},
    },
    manager::ShellManager,
    models::{ConfigUpdate, Profile},
    system::{config_file, executor::ExecutionError},
};

/// Exit code used by coreutils `timeout` for a command that ran out of time.
const EXIT_TIMEOUT: i32 = 124;
const EXIT_INTERRUPTED: i32 = 130;

/// The main entry point of `shellman`.
/// It parses arguments, sets up logging and the runtime, dispatches to the
/// correct handler, and performs centralized error handling.
fn main() {
    let matches = Cli::command()
        .after_help(dispatcher::command_overview())
        .get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    if let Err(e) = run_cli(cli) {
        // --- Centralized Error Handling ---
        if e.downcast_ref::<Interrupted>().is_some() {
            std::process::exit(EXIT_INTERRUPTED);
        }
        // `run` already printed the command's output.
        if let Some(NonZeroExit { code }) = e.downcast_ref::<NonZeroExit>() {
            std::process::exit(*code);
        }
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        if let Some(ExecutionError::Timeout { .. }) = e.downcast_ref::<ExecutionError>() {
            std::process::exit(EXIT_TIMEOUT);
        }
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "shellman=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

fn run_cli(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref().map(config_file::expand_path);
    let overrides = ConfigUpdate {
        profile: cli.profile.as_deref().map(str::parse::<Profile>).transpose()?,
        ..ConfigUpdate::default()
    };
    let config = config_file::resolve_config(config_path.as_deref(), &overrides)?;

    init_logging(cli.verbose || config.verbose);
    log::debug!("CLI args parsed: {:?}", cli);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let manager = {
        let _guard = runtime.enter();
        ShellManager::start(config)?
    };
    let mut session = Session::new(runtime, manager, cli.json, config_path);

    let result = if cli.args.is_empty() {
        dispatcher::run_interactive(&mut session)
    } else {
        dispatcher::dispatch(cli.args, &session)
    };

    let killed = session.close();
    if killed > 0 {
        log::info!("Terminated {} background process(es) on exit", killed);
    }
    result
}
