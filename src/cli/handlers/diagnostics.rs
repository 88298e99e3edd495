// src/cli/handlers/diagnostics.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Probes every available shell and reports problems."
)]
struct DiagnosticsArgs {}

/// The main handler for the `diagnostics` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let _ = DiagnosticsArgs::try_parse_from(&args)?;
    println!("{}", "Probing shells...".dimmed());
    let report = session.block_on(session.manager().check_shell_health())?;

    if session.json() {
        return commons::print_json(&report);
    }

    let verdict = if report.healthy {
        "healthy".green().bold()
    } else {
        "degraded".red().bold()
    };
    println!("{} {}", "Status:".bold(), verdict);
    if let Some(shell) = report.default_shell {
        println!("{} {}", "Default shell:".bold(), shell.to_string().cyan());
    }

    for probe in &report.probes {
        let mark = if probe.responsive {
            "✔".green()
        } else {
            "✘".red()
        };
        let latency = probe
            .latency_ms
            .map(commons::format_duration)
            .unwrap_or_default();
        println!(
            "  {} {:<11} {:>9}  {}",
            mark,
            probe.shell.to_string(),
            latency,
            probe.detail.as_deref().unwrap_or("").dimmed()
        );
    }

    if !report.issues.is_empty() {
        println!("\n{}", "Issues:".red().bold());
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("\n{}", "Recommendations:".yellow().bold());
        for tip in &report.recommendations {
            println!("  - {tip}");
        }
    }
    Ok(())
}
