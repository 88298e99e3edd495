// src/cli/handlers/mod.rs

// One module per CLI command. Every handler parses its own arguments.

pub mod commons;

pub mod bg;
pub mod clear_history;
pub mod config;
pub mod diagnostics;
pub mod escape;
pub mod history;
pub mod kill;
pub mod output;
pub mod performance;
pub mod processes;
pub mod ps;
pub mod run;
pub mod shells;
pub mod sysinfo;
