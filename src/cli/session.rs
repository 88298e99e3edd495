// src/cli/session.rs

use crate::{manager::ShellManager, system::config_file};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tokio::runtime::Runtime;

/// Raised when the user pressed Ctrl+C while a command was in flight.
#[derive(Error, Debug)]
#[error("Operation was interrupted by the user.")]
pub struct Interrupted;

/// Raised by `run` when the command finished with a non-zero exit code.
/// Its output has already been printed.
#[derive(Error, Debug)]
#[error("Command exited with code {code}.")]
pub struct NonZeroExit {
    pub code: i32,
}

/// One CLI session: a runtime and the manager living on it.
///
/// In interactive mode the session outlives single commands, so background
/// processes started with `bg` stay tracked until the user leaves.
#[derive(Debug)]
pub struct Session {
    runtime: Runtime,
    manager: ShellManager,
    json: bool,
    interactive: bool,
    config_path: Option<PathBuf>,
}

impl Session {
    pub fn new(
        runtime: Runtime,
        manager: ShellManager,
        json: bool,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            manager,
            json,
            interactive: false,
            config_path,
        }
    }

    pub fn manager(&self) -> &ShellManager {
        &self.manager
    }

    /// Whether handlers should print JSON instead of text.
    pub fn json(&self) -> bool {
        self.json
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Where `config --save` writes: the explicit `--config` path or the default location.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config_path
            .clone()
            .or_else(config_file::default_config_path)
    }

    /// Drives `future` to completion on the session runtime.
    ///
    /// Ctrl+C drops the future (a foreground process group is torn down with
    /// it) and yields [`Interrupted`].
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        self.runtime.block_on(async {
            tokio::select! {
                value = future => Ok(value),
                _ = tokio::signal::ctrl_c() => Err(anyhow::Error::new(Interrupted)),
            }
        })
    }

    /// Shuts the manager down. Returns how many background processes were killed.
    pub fn close(&self) -> usize {
        self.runtime.block_on(self.manager.shutdown())
    }
}
