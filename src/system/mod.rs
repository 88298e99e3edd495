//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It serves as a boundary between the manager's bookkeeping and the specifics of process
//! management, shell environments, and configuration files.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns commands through a resolved shell, streams and caps their
//!   output, enforces foreground timeouts and supervises background processes.
//! - **`process_control`**: Process-group isolation, whole-tree termination and the
//!   liveness queries behind the zombie sweep.
//! - **`shell`**: Shell detection, default shell selection and per-dialect escaping.
//! - **`config_file`**: Locating, loading and saving the optional `config.toml`.

pub mod config_file;
pub mod executor;
pub mod process_control;
pub mod shell;
