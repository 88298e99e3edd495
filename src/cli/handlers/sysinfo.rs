// src/cli/handlers/sysinfo.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Shows host platform, resources and shells.")]
struct SysinfoArgs {}

const MIB: u64 = 1024 * 1024;

/// The main handler for the `sysinfo` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let _ = SysinfoArgs::try_parse_from(&args)?;
    let info = session.block_on(session.manager().get_system_info())?;

    if session.json() {
        return commons::print_json(&info);
    }
    println!("{}", "--- System ---".bold());
    println!("  {:<12} {} ({}, {})", "platform".blue(), info.platform, info.family, info.arch);
    if let Some(os) = &info.os_version {
        println!("  {:<12} {}", "os".blue(), os);
    }
    if let Some(host) = &info.hostname {
        println!("  {:<12} {}", "hostname".blue(), host);
    }
    println!("  {:<12} {}", "cpus".blue(), info.cpu_count);
    println!(
        "  {:<12} {} MiB free of {} MiB",
        "memory".blue(),
        info.available_memory_bytes / MIB,
        info.total_memory_bytes / MIB
    );
    println!(
        "  {:<12} {}",
        "uptime".blue(),
        commons::format_duration(info.uptime_secs.saturating_mul(1_000))
    );

    println!("\n{}", "--- Shells ---".bold());
    for descriptor in info.shells.iter().filter(|d| d.available) {
        println!(
            "  {:<12} {}",
            descriptor.shell.to_string().green(),
            descriptor.version.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}
