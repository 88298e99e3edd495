// src/core/mod.rs

pub mod buffer;
pub mod config_manager;
pub mod diagnostics;
pub mod history;
pub mod policy;
pub mod tracker;
