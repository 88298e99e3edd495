// src/manager.rs

//! # Shell Manager
//!
//! The one explicitly owned entry point that command handlers talk to. It
//! wires the shell resolver, the config manager, the command policy and the
//! executor together over a single [`StateHandle`], and runs the periodic
//! zombie sweep between [`ShellManager::start`] and [`ShellManager::shutdown`].

use crate::{
    CancellationToken,
    constants::MAX_TRACKED_PROCESSES,
    core::{
        config_manager::{ConfigError, ConfigManager},
        diagnostics,
        history::HistoryStore,
        policy::{AllowlistPolicy, CommandPolicy, PolicyDecision, PolicyError, PolicyRequest},
        tracker::{ProcessTracker, TrackerError},
    },
    models::{
        Config, ConfigUpdate, ExecResult, ExecutionOptions, HealthReport, HistoryEntry,
        ManagedProcessSummary, Metrics, OutputStream, PerformanceQuery, PerformanceReport,
        ProcessStats, ProcessStatus, ShellDescriptor, ShellType, SystemInfo, now_ms,
    },
    state::{SharedState, StateHandle},
    system::{
        executor::{BackgroundRequest, ExecRequest, ExecutionError, Executor, failed_entry},
        process_control,
        shell::{self, ShellError, ShellResolver},
    },
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Checks every running entry against the OS process table once.
/// Returns how many entries were declared zombies.
pub async fn sweep_zombies(state: &StateHandle) -> usize {
    let tokens = state.lock().tracker.running_tokens();
    if tokens.is_empty() {
        return 0;
    }
    let pids: Vec<u32> = tokens.iter().map(|token| token.pid).collect();
    let queried = pids.clone();
    let alive = match tokio::task::spawn_blocking(move || process_control::alive_pids(&queried)).await {
        Ok(alive) => alive,
        Err(e) => {
            log::warn!("Zombie sweep skipped: process table query failed: {}", e);
            pids.into_iter().collect::<HashSet<u32>>()
        }
    };

    let mut state = state.lock();
    let mut zombies = 0;
    for token in tokens {
        let entry = state.tracker.observe(token, alive.contains(&token.pid));
        if entry.is_some() {
            zombies += 1;
        }
        state.record(entry);
    }
    zombies
}

async fn run_sweeper(state: StateHandle, config: Arc<ConfigManager>, stop: CancellationToken) {
    loop {
        let interval = Duration::from_millis(config.get_config().zombie_sweep_interval_ms);
        tokio::time::sleep(interval).await;
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let zombies = sweep_zombies(&state).await;
        if zombies > 0 {
            log::warn!("Zombie sweep marked {} process(es) as zombie.", zombies);
        }
    }
    log::debug!("Zombie sweeper stopped.");
}

/// Owns every component of the execution core.
#[derive(Debug)]
pub struct ShellManager {
    config: Arc<ConfigManager>,
    resolver: ShellResolver,
    policy: Arc<dyn CommandPolicy>,
    executor: Executor,
    stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ShellManager {
    /// Builds a manager without starting the zombie sweeper.
    pub fn new(config: Config, policy: Arc<dyn CommandPolicy>) -> Result<Self, ConfigError> {
        let mut history = HistoryStore::new(config.history_capacity);
        history.set_enabled(config.track_history);
        let state = StateHandle::new(SharedState::new(
            ProcessTracker::new(MAX_TRACKED_PROCESSES),
            history,
        ));
        Ok(Self {
            config: Arc::new(ConfigManager::new(config)?),
            resolver: ShellResolver::new(),
            policy,
            executor: Executor::new(state),
            stop: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
        })
    }

    /// Replaces the shell resolver, e.g. with one seeded with known descriptors.
    pub fn with_resolver(mut self, resolver: ShellResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Builds a manager with the standard sandbox allowlist and starts its sweeper.
    pub fn start(config: Config) -> Result<Self, StartupError> {
        Self::start_with_policy(config, Arc::new(AllowlistPolicy::standard()?))
    }

    /// Builds a manager around `policy` and starts its sweeper on the current Tokio runtime.
    pub fn start_with_policy(
        config: Config,
        policy: Arc<dyn CommandPolicy>,
    ) -> Result<Self, StartupError> {
        let manager = Self::new(config, policy)?;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn(run_sweeper(
                    manager.executor.state().clone(),
                    Arc::clone(&manager.config),
                    Arc::clone(&manager.stop),
                ));
                *manager.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(_) => log::warn!("No async runtime available; the zombie sweeper is disabled."),
        }
        log::debug!("Shell manager started with profile '{}'", manager.config.get_config().profile);
        Ok(manager)
    }

    /// Stops the sweeper and terminates every running background process.
    /// Returns how many processes were killed.
    pub async fn shutdown(&self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sweeper) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            sweeper.abort();
        }
        let killed = self.executor.shutdown().await;
        log::info!("Shell manager shut down ({} background process(es) killed).", killed);
        killed
    }

    // --- Execution ---

    fn refuse(&self, command: &str, shell: ShellType, error: ExecutionError) -> ExecutionError {
        log::warn!("{}", error);
        self.executor
            .state()
            .lock()
            .history
            .record(failed_entry(command, shell, now_ms()));
        error
    }

    /// Resolves the shell and runs the pre-spawn checks for one call.
    /// Any refusal is recorded in history before it is returned.
    async fn prepare(
        &self,
        command: &str,
        options: &ExecutionOptions,
        config: &Config,
    ) -> Result<ShellDescriptor, ExecutionError> {
        let shell = match options.shell {
            Some(shell) => shell,
            None => match self.resolver.default_shell(config).await {
                Ok(choice) => choice.shell,
                Err(_) => {
                    let fallback = config
                        .preferred_shell
                        .or_else(|| shell::platform_preference(cfg!(windows)).first().copied())
                        .unwrap_or(ShellType::Sh);
                    return Err(self.refuse(
                        command,
                        fallback,
                        ExecutionError::NoShell {
                            command: command.to_string(),
                        },
                    ));
                }
            },
        };

        if !config.shell_allowed(shell) {
            return Err(self.refuse(
                command,
                shell,
                ExecutionError::PolicyDenied {
                    shell,
                    command: command.to_string(),
                    reason: format!("shell not allowed by the '{}' profile", config.profile),
                },
            ));
        }

        let descriptor = match self.resolver.descriptor(shell).await {
            Ok(descriptor) => descriptor,
            Err(_) => {
                return Err(self.refuse(
                    command,
                    shell,
                    ExecutionError::ShellUnavailable {
                        shell,
                        command: command.to_string(),
                    },
                ));
            }
        };

        if options.sandbox.unwrap_or(config.sandbox) {
            if let PolicyDecision::Deny(reason) =
                self.policy.evaluate(&PolicyRequest { command, shell })
            {
                return Err(self.refuse(
                    command,
                    shell,
                    ExecutionError::PolicyDenied {
                        shell,
                        command: command.to_string(),
                        reason,
                    },
                ));
            }
        }
        Ok(descriptor)
    }

    /// Runs `command` in the foreground until it exits or times out.
    pub async fn exec(
        &self,
        command: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecResult, ExecutionError> {
        let config = self.config.get_config();
        let descriptor = self.prepare(command, options, &config).await?;
        let timeout_ms = options.timeout_ms.unwrap_or(config.default_timeout_ms);
        self.executor
            .exec(&ExecRequest {
                command,
                descriptor: &descriptor,
                timeout: Duration::from_millis(timeout_ms),
                output_cap: config.output_cap(),
            })
            .await
    }

    /// Starts `command` in the background and returns its pid.
    /// `options.timeout_ms` does not apply to background processes.
    pub async fn background(
        &self,
        command: &str,
        options: &ExecutionOptions,
    ) -> Result<u32, ExecutionError> {
        let config = self.config.get_config();
        let descriptor = self.prepare(command, options, &config).await?;
        self.executor.background(&BackgroundRequest {
            command,
            descriptor: &descriptor,
            output_cap: config.output_cap(),
            max_concurrent: config.max_concurrent_processes,
        })
    }

    // --- Processes ---

    pub fn list_processes(&self, status: Option<ProcessStatus>) -> Vec<ManagedProcessSummary> {
        self.executor.state().lock().tracker.list(status)
    }

    /// Terminates a running background process. `false` for unknown or finished pids.
    pub fn kill(&self, pid: u32) -> bool {
        self.executor.kill(pid)
    }

    /// Buffered stdout of `pid`, or `None` if it is not tracked.
    pub fn get_output(&self, pid: u32) -> Option<String> {
        self.executor.state().lock().tracker.output(pid, OutputStream::Stdout)
    }

    /// Buffered stderr of `pid`, or `None` if it is not tracked.
    pub fn get_errors(&self, pid: u32) -> Option<String> {
        self.executor.state().lock().tracker.output(pid, OutputStream::Stderr)
    }

    pub fn subscribe(&self, pid: u32) -> Result<watch::Receiver<ProcessStatus>, TrackerError> {
        self.executor.state().lock().tracker.subscribe(pid)
    }

    /// Waits until `pid` reaches a terminal status and returns it.
    pub async fn wait_for_exit(&self, pid: u32) -> Result<ProcessStatus, TrackerError> {
        let mut receiver = self.subscribe(pid)?;
        let outcome = receiver
            .wait_for(|status| status.is_terminal())
            .await
            .map(|status| *status);
        // An evicted entry closes its channel; report the last status it published.
        Ok(outcome.unwrap_or_else(|_| *receiver.borrow()))
    }

    /// Evicts every finished entry from the registry.
    pub fn clear_finished(&self) -> usize {
        self.executor.state().lock().tracker.clear_finished()
    }

    /// Runs one zombie sweep immediately.
    pub async fn sweep_zombies(&self) -> usize {
        sweep_zombies(self.executor.state()).await
    }

    // --- Configuration ---

    pub fn get_config(&self) -> Config {
        self.config.get_config()
    }

    /// Applies a partial update. History settings take effect immediately;
    /// output caps and timeouts apply to processes started afterwards.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Config, ConfigError> {
        let config = self.config.update_config(update)?;
        let mut state = self.executor.state().lock();
        state.history.set_capacity(config.history_capacity);
        state.history.set_enabled(config.track_history);
        Ok(config)
    }

    pub fn get_metrics(&self) -> Metrics {
        let state = self.executor.state().lock();
        Metrics {
            running: state.tracker.running_count(),
            tracked: state.tracker.len(),
            history_size: state.history.len(),
            sessions_active: self.executor.sessions_active(),
        }
    }

    // --- History ---

    /// The `limit` most recent executions, newest first.
    pub fn get_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.executor.state().lock().history.recent(limit)
    }

    pub fn search_history(&self, query: &str) -> Vec<HistoryEntry> {
        self.executor.state().lock().history.search(query)
    }

    pub fn clear_history(&self) -> usize {
        let removed = self.executor.state().lock().history.clear();
        log::info!("Cleared {} history entries.", removed);
        removed
    }

    // --- Shells ---

    /// Detected shells, from the cache unless `refresh` is set.
    pub async fn get_available_shells(&self, refresh: bool) -> Vec<ShellDescriptor> {
        if refresh {
            self.resolver.refresh().await
        } else {
            self.resolver.detect_shells().await
        }
    }

    async fn target_shell(&self, shell: Option<ShellType>) -> Result<ShellType, ShellError> {
        match shell {
            Some(shell) => Ok(shell),
            None => Ok(self.resolver.default_shell(&self.get_config()).await?.shell),
        }
    }

    /// Escapes `raw` for `shell`, or for the default shell when `None`.
    pub async fn escape(&self, raw: &str, shell: Option<ShellType>) -> Result<String, ShellError> {
        Ok(shell::escape(raw, self.target_shell(shell).await?))
    }

    /// Wraps an already-escaped `body` in the outer quotes of `shell`, or of the default shell.
    pub async fn quote(&self, body: &str, shell: Option<ShellType>) -> Result<String, ShellError> {
        Ok(shell::quote(body, self.target_shell(shell).await?))
    }

    // --- Diagnostics ---

    pub async fn get_system_info(&self) -> SystemInfo {
        let shells = self.resolver.detect_shells().await;
        match tokio::task::spawn_blocking(move || diagnostics::system_info(shells)).await {
            Ok(info) => info,
            Err(e) => {
                log::warn!("System information task failed: {}", e);
                diagnostics::system_info(Vec::new())
            }
        }
    }

    /// Probes every available shell and aggregates the results.
    pub async fn check_shell_health(&self) -> HealthReport {
        let shells = self.resolver.detect_shells().await;
        let mut probes = JoinSet::new();
        for descriptor in shells.iter().filter(|d| d.available).cloned() {
            probes.spawn(async move { diagnostics::probe_shell(&descriptor).await });
        }
        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(probe) => results.push(probe),
                Err(e) => log::warn!("Shell health probe task failed: {}", e),
            }
        }
        results.sort_by_key(|probe| probe.shell);
        diagnostics::build_health_report(
            &shells,
            results,
            self.get_config().preferred_shell,
            cfg!(windows),
        )
    }

    pub fn get_process_stats(&self) -> ProcessStats {
        self.executor.state().lock().tracker.stats()
    }

    pub fn analyze_performance(&self, query: &PerformanceQuery) -> PerformanceReport {
        let entries = self.executor.state().lock().history.entries();
        diagnostics::analyze_performance(&entries, query)
    }
}

impl Drop for ShellManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sweeper) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::PermissivePolicy;
    use crate::models::Profile;
    use std::time::Instant;

    fn manager(config: Config) -> ShellManager {
        ShellManager::start(config).expect("valid config")
    }

    async fn posix(manager: &ShellManager) -> Option<ShellType> {
        let shells = manager.get_available_shells(false).await;
        [ShellType::Sh, ShellType::Bash]
            .into_iter()
            .find(|shell| shells.iter().any(|d| d.shell == *shell && d.available))
    }

    fn on(shell: ShellType) -> ExecutionOptions {
        ExecutionOptions {
            shell: Some(shell),
            ..ExecutionOptions::default()
        }
    }

    #[tokio::test]
    async fn test_exec_records_one_history_entry_per_call() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        let result = manager.exec("echo hi", &on(sh)).await.expect("exec");
        assert!(result.success());
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(manager.get_metrics().history_size, 1);
        assert_eq!(manager.search_history("ECHO").len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_exec_timeout_returns_result_not_error() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        let started = Instant::now();
        let options = ExecutionOptions {
            timeout_ms: Some(100),
            ..on(sh)
        };
        let result = manager.exec("sleep 10", &options).await.expect("timeout is a result");
        assert!(result.timed_out);
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert!(result.clone().check("sleep 10", 100).is_err());
        let history = manager.get_history(10);
        assert_eq!(history.len(), 1);
        assert!(history.iter().all(|entry| entry.timed_out));
    }

    #[tokio::test]
    async fn test_sandbox_denial_is_typed_and_recorded() {
        let manager = manager(Profile::Secure.preset());
        let Some(sh) = posix(&manager).await else { return };
        let err = manager
            .exec("echo hi && rm -rf /tmp/x", &on(sh))
            .await
            .expect_err("chaining is denied in secure mode");
        assert!(matches!(err, ExecutionError::PolicyDenied { .. }));
        assert_eq!(manager.get_history(10).len(), 1);

        let allowed = manager.exec("echo fine", &on(sh)).await.expect("allowlisted");
        assert_eq!(allowed.stdout, "fine\n");

        let opt_out = ExecutionOptions {
            sandbox: Some(false),
            ..on(sh)
        };
        assert!(manager.exec("printf ok", &opt_out).await.is_ok());
    }

    #[tokio::test]
    async fn test_disallowed_shell_is_denied_regardless_of_sandbox() {
        let mut config = Config::default();
        config.allowed_shells = vec![ShellType::Pwsh];
        let manager = ShellManager::new(config, Arc::new(PermissivePolicy)).expect("valid");
        let err = manager
            .exec("echo hi", &on(ShellType::Sh))
            .await
            .expect_err("sh is not allowed");
        assert!(matches!(err, ExecutionError::PolicyDenied { shell: ShellType::Sh, .. }));
    }

    #[tokio::test]
    async fn test_unavailable_shell_is_reported() {
        let manager = ShellManager::new(Config::default(), Arc::new(PermissivePolicy))
            .expect("valid")
            .with_resolver(ShellResolver::with_descriptors(vec![ShellDescriptor::unavailable(
                ShellType::Zsh,
            )]));
        let err = manager
            .background("sleep 1", &on(ShellType::Zsh))
            .await
            .expect_err("zsh is missing");
        assert!(matches!(err, ExecutionError::ShellUnavailable { shell: ShellType::Zsh, .. }));
        assert!(manager.escape("x", None).await.is_err());
        assert_eq!(manager.escape("it's", Some(ShellType::Bash)).await.ok().as_deref(), Some("'it'\\''s'"));
    }

    #[tokio::test]
    async fn test_background_lifecycle_through_the_manager() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        let pid = manager
            .background("echo started; sleep 30", &on(sh))
            .await
            .expect("spawn");
        assert_eq!(manager.list_processes(Some(ProcessStatus::Running)).len(), 1);
        assert_eq!(manager.get_metrics().running, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.get_output(pid).as_deref(), Some("started\n"));
        assert_eq!(manager.get_errors(pid).as_deref(), Some(""));

        assert!(manager.kill(pid));
        assert_eq!(manager.wait_for_exit(pid).await, Ok(ProcessStatus::Killed));
        assert!(!manager.kill(pid));
        assert_eq!(manager.get_process_stats().killed, 1);
        assert_eq!(manager.clear_finished(), 1);
        assert!(manager.get_output(pid).is_none());
        assert_eq!(manager.wait_for_exit(pid).await, Err(TrackerError::ProcessNotFound(pid)));
    }

    #[tokio::test]
    async fn test_background_cap_through_config() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        manager
            .update_config(&ConfigUpdate {
                max_concurrent_processes: Some(1),
                ..ConfigUpdate::default()
            })
            .expect("valid update");
        manager.background("sleep 5", &on(sh)).await.expect("first fits");
        let err = manager
            .background("sleep 5", &on(sh))
            .await
            .expect_err("second exceeds the cap");
        assert!(matches!(err, ExecutionError::ConcurrencyLimit { limit: 1, .. }));
        assert_eq!(manager.shutdown().await, 1);
    }

    #[tokio::test]
    async fn test_history_settings_follow_config_updates() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        manager
            .update_config(&ConfigUpdate {
                track_history: Some(false),
                ..ConfigUpdate::default()
            })
            .expect("valid update");
        manager.exec("true", &on(sh)).await.expect("exec");
        assert_eq!(manager.get_metrics().history_size, 0);
        assert_eq!(manager.clear_history(), 0);
    }

    #[tokio::test]
    async fn test_performance_report_reads_history() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        manager.exec("true", &on(sh)).await.expect("exec");
        manager.exec("false", &on(sh)).await.expect("exec");
        let report = manager.analyze_performance(&PerformanceQuery::default());
        assert_eq!(report.total_executions, 2);
        assert!((report.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(report.top_failing.first().map(|f| f.command.as_str()), Some("false"));
    }

    #[tokio::test]
    async fn test_health_report_covers_available_shells() {
        let manager = manager(Config::default());
        let shells = manager.get_available_shells(false).await;
        let report = manager.check_shell_health().await;
        let available = shells.iter().filter(|d| d.available).count();
        assert_eq!(report.probes.len(), available);
        if available > 0 {
            assert!(report.default_shell.is_some());
        }
        let info = manager.get_system_info().await;
        assert_eq!(info.shells.len(), ShellType::ALL.len());
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_processes_running() {
        let manager = manager(Config::default());
        let Some(sh) = posix(&manager).await else { return };
        let pid = manager.background("sleep 5", &on(sh)).await.expect("spawn");
        assert_eq!(manager.sweep_zombies().await, 0);
        assert_eq!(manager.sweep_zombies().await, 0);
        assert_eq!(
            manager.list_processes(None).first().map(|p| p.status),
            Some(ProcessStatus::Running)
        );
        assert!(manager.kill(pid));
    }
}
