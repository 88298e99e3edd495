use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// A shared stop flag, set once to ask long-running loops to wind down.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod manager;
pub mod models;
pub mod state;
pub mod system;
