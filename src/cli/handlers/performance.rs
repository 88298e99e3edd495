// src/cli/handlers/performance.rs

use crate::{
    cli::{handlers::commons, session::Session},
    constants::DEFAULT_TOP_N,
    models::{PerformanceQuery, now_ms},
};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Summarizes execution history: rates, timings, slow and failing commands."
)]
struct PerformanceArgs {
    /// Only include executions from the last N minutes.
    #[arg(long, conflicts_with = "since")]
    last: Option<u64>,

    /// Window start, in epoch milliseconds.
    #[arg(long)]
    since: Option<u64>,

    /// Window end, in epoch milliseconds.
    #[arg(long)]
    until: Option<u64>,

    /// How many slow and failing commands to list.
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    top: usize,
}

impl PerformanceArgs {
    fn query(&self) -> PerformanceQuery {
        let start_time_ms = self
            .last
            .map(|minutes| now_ms().saturating_sub(minutes.saturating_mul(60_000)))
            .or(self.since);
        PerformanceQuery {
            start_time_ms,
            end_time_ms: self.until,
            top_n: self.top,
        }
    }
}

/// The main handler for the `performance` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let perf_args = PerformanceArgs::try_parse_from(&args)?;
    let report = session.manager().analyze_performance(&perf_args.query());

    if session.json() {
        return commons::print_json(&report);
    }
    if report.total_executions == 0 {
        println!("{}", "No executions in this window.".dimmed());
        return Ok(());
    }

    println!("{} {}", "Executions:".bold(), report.total_executions);
    println!("  {:<10} {:.1}%", "success".green(), report.success_rate);
    println!("  {:<10} {:.1}%", "timeouts".red(), report.timeout_rate);
    let time = &report.execution_time;
    println!(
        "  {:<10} avg {} / min {} / max {}",
        "duration".blue(),
        commons::format_avg_ms(time.avg_ms),
        commons::format_duration(time.min_ms),
        commons::format_duration(time.max_ms)
    );

    if !report.top_slow.is_empty() {
        println!("\n{}", "Slowest:".bold());
        for slow in &report.top_slow {
            println!(
                "  {:>9}  x{:<4} {}",
                commons::format_avg_ms(slow.avg_ms),
                slow.runs,
                commons::truncate(&slow.command, 60)
            );
        }
    }
    if !report.top_failing.is_empty() {
        println!("\n{}", "Most failing:".bold());
        for failing in &report.top_failing {
            println!(
                "  {:>3}/{:<3} {:>5.1}%  {}",
                failing.failures,
                failing.runs,
                failing.failure_rate,
                commons::truncate(&failing.command, 60)
            );
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_minutes_becomes_window_start() {
        let args = PerformanceArgs::try_parse_from(["--last", "10", "--top", "3"]).expect("args");
        let query = args.query();
        let start = query.start_time_ms.expect("start set");
        assert!(now_ms() - start >= 600_000);
        assert_eq!(query.end_time_ms, None);
        assert_eq!(query.top_n, 3);
    }

    #[test]
    fn test_last_and_since_conflict() {
        assert!(PerformanceArgs::try_parse_from(["--last", "1", "--since", "5"]).is_err());
    }
}
