// src/core/diagnostics.rs

//! # Diagnostics
//!
//! Read-only aggregation over shell detection, the process registry and the
//! execution history: host information, shell health probes and performance
//! analytics. Everything here works on snapshots handed in by the manager, so
//! none of it holds the state lock while it computes.

use crate::{
    constants::{
        HEALTH_PROBE_TIMEOUT_MS, HEALTH_PROBE_TOKEN, LOW_SUCCESS_RATE_PERCENT, SLOW_COMMAND_MS,
        TIMEOUT_RATE_THRESHOLD,
    },
    models::{
        ExecutionTimeStats, FailingCommand, HealthReport, HistoryEntry, PerformanceQuery,
        PerformanceReport, ShellDescriptor, ShellProbe, ShellType, SlowCommand, SystemInfo,
        duration_ms,
    },
    system::{
        process_control,
        shell::{self, select_default},
    },
};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// --- System information ---

/// Collects host facts and attaches the detected shells.
pub fn system_info(shells: Vec<ShellDescriptor>) -> SystemInfo {
    let mut system = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
    );
    system.refresh_memory();

    SystemInfo {
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        family: std::env::consts::FAMILY.to_string(),
        hostname: System::host_name(),
        os_version: System::long_os_version(),
        cpu_count: std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1),
        total_memory_bytes: system.total_memory(),
        available_memory_bytes: system.available_memory(),
        uptime_secs: System::uptime(),
        shells,
    }
}

// --- Shell health ---

/// Runs `script` through `descriptor` in its own process group.
///
/// On timeout the whole group is killed, not just the shell.
async fn run_probe(
    descriptor: &ShellDescriptor,
    script: &str,
    timeout: Duration,
) -> Result<(Output, u64), String> {
    let mut cmd = shell::command_for(descriptor, script);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    process_control::isolate(&mut cmd);

    let started = Instant::now();
    let child = cmd.spawn().map_err(|e| format!("failed to start: {e}"))?;
    let pid = child.id();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok((output, duration_ms(started.elapsed()))),
        Ok(Err(e)) => Err(format!("failed while waiting: {e}")),
        Err(_) => {
            if let Some(pid) = pid {
                if let Err(e) = process_control::terminate_tree(pid) {
                    log::debug!("Cleanup of hung health check group {} failed: {}", pid, e);
                }
            }
            Err(format!("no answer within {} ms", timeout.as_millis()))
        }
    }
}

/// Runs the echo probe through one shell.
pub async fn probe_shell(descriptor: &ShellDescriptor) -> ShellProbe {
    let unresponsive = |detail: String| ShellProbe {
        shell: descriptor.shell,
        available: descriptor.available,
        responsive: false,
        latency_ms: None,
        detail: Some(detail),
    };
    if !descriptor.available {
        return unresponsive("not installed".to_string());
    }

    let (output, latency) = match run_probe(
        descriptor,
        &format!("echo {HEALTH_PROBE_TOKEN}"),
        Duration::from_millis(HEALTH_PROBE_TIMEOUT_MS),
    )
    .await
    {
        Ok(answer) => answer,
        Err(detail) => return unresponsive(detail),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && stdout.contains(HEALTH_PROBE_TOKEN) {
        log::debug!("Shell '{}' answered the probe in {} ms", descriptor.shell, latency);
        return ShellProbe {
            shell: descriptor.shell,
            available: true,
            responsive: true,
            latency_ms: Some(latency),
            detail: None,
        };
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut probe = unresponsive(format!(
        "unexpected answer (exit {:?}): {}",
        output.status.code(),
        stderr.trim()
    ));
    probe.latency_ms = Some(latency);
    probe
}

/// Turns probe results into issues and recommendations.
pub fn build_health_report(
    shells: &[ShellDescriptor],
    probes: Vec<ShellProbe>,
    preferred: Option<ShellType>,
    windows: bool,
) -> HealthReport {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let available = |shell: ShellType| shells.iter().any(|d| d.shell == shell && d.available);

    if !shells.iter().any(|descriptor| descriptor.available) {
        issues.push("No supported shell is available on this host.".to_string());
    }

    let default_shell = match select_default(shells, preferred, windows) {
        Ok(choice) => {
            if let Some(warning) = choice.warning {
                issues.push(warning);
            }
            Some(choice.shell)
        }
        Err(e) => {
            issues.push(e.to_string());
            None
        }
    };

    for probe in probes.iter().filter(|probe| probe.available && !probe.responsive) {
        issues.push(format!(
            "Shell '{}' is installed but failed the health probe: {}",
            probe.shell,
            probe.detail.as_deref().unwrap_or("unknown failure")
        ));
        recommendations.push(format!(
            "Repair or reinstall '{}', or set a different preferred shell.",
            probe.shell
        ));
    }

    if windows {
        if !ShellType::ALL.iter().any(|shell| shell.is_posix() && available(*shell)) {
            recommendations.push(
                "No POSIX shell found: install Git for Windows (Git Bash) or WSL to run bash/sh commands."
                    .to_string(),
            );
        }
        if !available(ShellType::Pwsh) && available(ShellType::PowerShell) {
            recommendations.push(
                "Install PowerShell 7 (pwsh) for faster startup and cross-platform scripts."
                    .to_string(),
            );
        }
    } else if !available(ShellType::Bash) {
        recommendations.push(
            "bash is not installed: install it for full POSIX scripting support.".to_string(),
        );
    }

    HealthReport {
        healthy: issues.is_empty(),
        default_shell,
        probes,
        issues,
        recommendations,
    }
}

// --- Performance analytics ---

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

#[derive(Debug, Default)]
struct CommandStats {
    runs: usize,
    failures: usize,
    timeouts: usize,
    timed_runs: usize,
    total_ms: u64,
    max_ms: u64,
}

impl CommandStats {
    fn avg_ms(&self) -> Option<f64> {
        (self.timed_runs > 0).then(|| self.total_ms as f64 / self.timed_runs as f64)
    }
}

/// Computes success/timeout rates, duration statistics, rankings and
/// recommendations over the entries inside the query window.
///
/// Rates are percentages of all executions in the window. Duration statistics
/// only cover executions that actually ran (those with a duration).
pub fn analyze_performance(entries: &[HistoryEntry], query: &PerformanceQuery) -> PerformanceReport {
    let window: Vec<&HistoryEntry> = entries
        .iter()
        .filter(|entry| query.start_time_ms.is_none_or(|start| entry.timestamp_ms >= start))
        .filter(|entry| query.end_time_ms.is_none_or(|end| entry.timestamp_ms <= end))
        .collect();

    let total = window.len();
    if total == 0 {
        return PerformanceReport {
            recommendations: vec!["No executions recorded in the selected window.".to_string()],
            ..PerformanceReport::default()
        };
    }

    let succeeded = window.iter().filter(|entry| entry.succeeded()).count();
    let timed_out = window.iter().filter(|entry| entry.timed_out).count();

    let durations: Vec<u64> = window.iter().filter_map(|entry| entry.duration_ms).collect();
    let execution_time = match (durations.iter().min(), durations.iter().max()) {
        (Some(min), Some(max)) => ExecutionTimeStats {
            avg_ms: durations.iter().sum::<u64>() as f64 / durations.len() as f64,
            min_ms: *min,
            max_ms: *max,
        },
        _ => ExecutionTimeStats::default(),
    };

    // BTreeMap keeps ties in a stable, alphabetical order.
    let mut by_command: BTreeMap<&str, CommandStats> = BTreeMap::new();
    for entry in &window {
        let stats = by_command.entry(entry.command.as_str()).or_default();
        stats.runs += 1;
        if !entry.succeeded() {
            stats.failures += 1;
        }
        if entry.timed_out {
            stats.timeouts += 1;
        }
        if let Some(ms) = entry.duration_ms {
            stats.timed_runs += 1;
            stats.total_ms = stats.total_ms.saturating_add(ms);
            stats.max_ms = stats.max_ms.max(ms);
        }
    }

    let mut top_slow: Vec<SlowCommand> = by_command
        .iter()
        .filter_map(|(command, stats)| {
            stats.avg_ms().map(|avg_ms| SlowCommand {
                command: (*command).to_string(),
                runs: stats.runs,
                avg_ms,
                max_ms: stats.max_ms,
            })
        })
        .collect();
    top_slow.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
    top_slow.truncate(query.top_n);

    let mut top_failing: Vec<FailingCommand> = by_command
        .iter()
        .filter(|(_, stats)| stats.failures > 0)
        .map(|(command, stats)| FailingCommand {
            command: (*command).to_string(),
            runs: stats.runs,
            failures: stats.failures,
            timeouts: stats.timeouts,
            failure_rate: percent(stats.failures, stats.runs),
        })
        .collect();
    top_failing.sort_by(|a, b| {
        b.failures
            .cmp(&a.failures)
            .then_with(|| b.failure_rate.total_cmp(&a.failure_rate))
    });
    top_failing.truncate(query.top_n);

    let success_rate = percent(succeeded, total);
    let mut recommendations = Vec::new();
    for (command, stats) in &by_command {
        let share = stats.timeouts as f64 / stats.runs as f64;
        if share > TIMEOUT_RATE_THRESHOLD {
            recommendations.push(format!(
                "'{}' timed out in {} of {} runs ({:.0}%): raise its timeout or investigate why it hangs.",
                command,
                stats.timeouts,
                stats.runs,
                share * 100.0
            ));
        }
    }
    if success_rate < LOW_SUCCESS_RATE_PERCENT {
        recommendations.push(format!(
            "Overall success rate is {success_rate:.1}%: review the most frequently failing commands."
        ));
    }
    for slow in top_slow.iter().filter(|slow| slow.avg_ms > SLOW_COMMAND_MS) {
        recommendations.push(format!(
            "'{}' takes {:.1} s on average: consider running it in the background.",
            slow.command,
            slow.avg_ms / 1000.0
        ));
    }

    PerformanceReport {
        total_executions: total,
        success_rate,
        timeout_rate: percent(timed_out, total),
        execution_time,
        top_slow,
        top_failing,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run(command: &str, ts: u64, exit_code: Option<i32>, ms: Option<u64>, timed_out: bool) -> HistoryEntry {
        HistoryEntry {
            command: command.to_string(),
            shell: ShellType::Bash,
            timestamp_ms: ts,
            exit_code,
            duration_ms: ms,
            timed_out,
        }
    }

    fn descriptor(shell: ShellType, available: bool) -> ShellDescriptor {
        ShellDescriptor {
            shell,
            path: available.then(|| PathBuf::from(format!("/bin/{shell}"))),
            version: None,
            available,
        }
    }

    fn synthetic_history() -> Vec<HistoryEntry> {
        let mut entries = Vec::new();
        for i in 0..7 {
            entries.push(run("echo ok", i, Some(0), Some(10 + i), false));
        }
        entries.push(run("sleep 60", 7, None, Some(1_000), true));
        entries.push(run("sleep 60", 8, None, Some(1_000), true));
        entries.push(run("false", 9, Some(1), Some(5), false));
        entries
    }

    #[test]
    fn test_rates_over_synthetic_history() {
        let report = analyze_performance(&synthetic_history(), &PerformanceQuery::default());
        assert_eq!(report.total_executions, 10);
        assert!((report.success_rate - 70.0).abs() < f64::EPSILON);
        assert!((report.timeout_rate - 20.0).abs() < f64::EPSILON);
        assert_eq!(report.execution_time.min_ms, 5);
        assert_eq!(report.execution_time.max_ms, 1_000);
    }

    #[test]
    fn test_rankings_and_recommendations() {
        let report = analyze_performance(&synthetic_history(), &PerformanceQuery::default());
        assert_eq!(report.top_slow.first().map(|s| s.command.as_str()), Some("sleep 60"));
        let failing: Vec<(&str, usize)> = report
            .top_failing
            .iter()
            .map(|f| (f.command.as_str(), f.failures))
            .collect();
        assert_eq!(failing, vec![("sleep 60", 2), ("false", 1)]);
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.contains("'sleep 60' timed out in 2 of 2 runs"))
        );
        assert!(report.recommendations.iter().any(|r| r.contains("70.0%")));
    }

    #[test]
    fn test_window_and_top_n_are_applied() {
        let query = PerformanceQuery {
            start_time_ms: Some(7),
            end_time_ms: Some(8),
            top_n: 1,
        };
        let report = analyze_performance(&synthetic_history(), &query);
        assert_eq!(report.total_executions, 2);
        assert!((report.timeout_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.top_failing.len(), 1);
    }

    #[test]
    fn test_entries_without_duration_are_excluded_from_time_stats() {
        let entries = vec![
            run("denied", 1, None, None, false),
            run("echo", 2, Some(0), Some(40), false),
        ];
        let report = analyze_performance(&entries, &PerformanceQuery::default());
        assert_eq!(report.total_executions, 2);
        assert!((report.execution_time.avg_ms - 40.0).abs() < f64::EPSILON);
        assert!(report.top_slow.iter().all(|s| s.command != "denied"));
    }

    #[test]
    fn test_slow_commands_get_a_background_hint() {
        let entries = vec![run("make all", 1, Some(0), Some(25_000), false)];
        let report = analyze_performance(&entries, &PerformanceQuery::default());
        assert!(report.recommendations.iter().any(|r| r.contains("background")));
    }

    #[test]
    fn test_empty_window_yields_a_single_hint() {
        let report = analyze_performance(&[], &PerformanceQuery::default());
        assert_eq!(report.total_executions, 0);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_windows_without_posix_shell_recommends_compat_layer() {
        let shells = vec![descriptor(ShellType::Cmd, true), descriptor(ShellType::Bash, false)];
        let report = build_health_report(&shells, Vec::new(), None, true);
        assert!(report.healthy);
        assert_eq!(report.default_shell, Some(ShellType::Cmd));
        assert!(report.recommendations.iter().any(|r| r.contains("WSL")));
    }

    #[test]
    fn test_failed_probe_and_missing_preference_are_issues() {
        let shells = vec![descriptor(ShellType::Bash, true), descriptor(ShellType::Zsh, false)];
        let probes = vec![ShellProbe {
            shell: ShellType::Bash,
            available: true,
            responsive: false,
            latency_ms: None,
            detail: Some("no answer".to_string()),
        }];
        let report = build_health_report(&shells, probes, Some(ShellType::Zsh), false);
        assert!(!report.healthy);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.default_shell, Some(ShellType::Bash));
    }

    #[test]
    fn test_no_shells_is_unhealthy() {
        let shells = vec![descriptor(ShellType::Bash, false)];
        let report = build_health_report(&shells, Vec::new(), None, false);
        assert!(!report.healthy);
        assert_eq!(report.default_shell, None);
    }

    #[tokio::test]
    async fn test_probe_of_missing_shell_is_not_responsive() {
        let probe = probe_shell(&descriptor(ShellType::Zsh, false)).await;
        assert!(!probe.available);
        assert!(!probe.responsive);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_health_check_leaves_no_descendants() {
        let resolver = crate::system::shell::ShellResolver::new();
        let Ok(sh) = resolver.descriptor(ShellType::Sh).await else { return };
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let outcome = run_probe(&sh, &script, Duration::from_millis(300)).await;
        assert!(outcome.is_err_and(|detail| detail.contains("no answer")));

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .expect("pid written before the timeout")
            .trim()
            .parse()
            .expect("numeric pid");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_control::is_alive(grandchild));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_working_shell_answers_health_check() {
        let resolver = crate::system::shell::ShellResolver::new();
        let Ok(sh) = resolver.descriptor(ShellType::Sh).await else { return };
        let probe = probe_shell(&sh).await;
        assert!(probe.responsive);
        assert!(probe.latency_ms.is_some());
    }

    #[test]
    fn test_system_info_reports_host_facts() {
        let info = system_info(Vec::new());
        assert_eq!(info.platform, std::env::consts::OS);
        assert!(info.cpu_count >= 1);
        assert!(info.total_memory_bytes >= info.available_memory_bytes);
    }
}
