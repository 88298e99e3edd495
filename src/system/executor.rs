// src/system/executor.rs

use crate::{
    CancellationToken,
    constants::{READ_CHUNK_BYTES, READER_GRACE_MS},
    core::{buffer::OutputBuffer, tracker::ProcessToken},
    models::{
        ExecResult, HistoryEntry, OutputStream, ProcessStatus, ShellDescriptor, ShellType,
        duration_ms, now_ms,
    },
    state::StateHandle,
    system::{process_control, shell},
};
use scopeguard::ScopeGuard;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to run '{command}' through {shell}: {source}")]
    Spawn {
        shell: ShellType,
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Command '{command}' timed out after {timeout_ms} ms ({shell}).")]
    Timeout {
        shell: ShellType,
        command: String,
        timeout_ms: u64,
    },
    #[error("Shell '{shell}' is not available to run '{command}'.")]
    ShellUnavailable { shell: ShellType, command: String },
    #[error("No shell is available on this host to run '{command}'.")]
    NoShell { command: String },
    #[error("Concurrency limit of {limit} background processes reached; refusing to start '{command}'.")]
    ConcurrencyLimit { limit: usize, command: String },
    #[error("Command '{command}' was denied for {shell}: {reason}")]
    PolicyDenied {
        shell: ShellType,
        command: String,
        reason: String,
    },
    #[error("The manager is shutting down and accepts no new processes.")]
    ShuttingDown,
}

/// A resolved foreground execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecRequest<'a> {
    pub command: &'a str,
    pub descriptor: &'a ShellDescriptor,
    pub timeout: Duration,
    pub output_cap: Option<usize>,
}

/// A resolved background spawn.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundRequest<'a> {
    pub command: &'a str,
    pub descriptor: &'a ShellDescriptor,
    pub output_cap: Option<usize>,
    pub max_concurrent: usize,
}

/// Spawns processes and keeps the shared state in sync with their lifecycles.
///
/// Every process is started at the head of its own process group, so a
/// timeout, a `kill` or a shutdown takes its descendants down with it.
#[derive(Debug)]
pub struct Executor {
    state: StateHandle,
    sessions: Arc<AtomicUsize>,
    shutting_down: CancellationToken,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

/// Builds the failure entry for a call that never produced an exit status.
pub fn failed_entry(command: &str, shell: ShellType, timestamp_ms: u64) -> HistoryEntry {
    HistoryEntry {
        command: command.to_string(),
        shell,
        timestamp_ms,
        exit_code: None,
        duration_ms: None,
        timed_out: false,
    }
}

fn piped(descriptor: &ShellDescriptor, command: &str) -> Command {
    let mut cmd = shell::command_for(descriptor, command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    process_control::isolate(&mut cmd);
    cmd
}

/// Reads `reader` in chunks of at most [`READ_CHUNK_BYTES`] and hands each
/// decoded chunk to `sink`.
///
/// A multi-byte character split by a read is held back until its remaining
/// bytes arrive.
async fn pump<R, F>(mut reader: R, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK_BYTES + 4);
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend(chunk.iter().take(n));
                let complete = split_point(&pending);
                if complete > 0 {
                    sink(&String::from_utf8_lossy(pending.get(..complete).unwrap_or_default()));
                    pending.drain(..complete);
                }
            }
            Err(e) => {
                log::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
    if !pending.is_empty() {
        sink(&String::from_utf8_lossy(&pending));
    }
}

/// Length of the prefix of `bytes` that does not end inside a UTF-8 sequence.
fn split_point(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let Some(&byte) = bytes.get(len - back) else { break };
        if (0x80..=0xBF).contains(&byte) {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

/// Waits for the reader tasks, giving up after a short grace period.
///
/// Descendants that outlive the shell may keep the pipes open; their output
/// is not waited for.
async fn drain(readers: Vec<JoinHandle<()>>) {
    let deadline = Duration::from_millis(READER_GRACE_MS);
    for mut reader in readers {
        if tokio::time::timeout(deadline, &mut reader).await.is_err() {
            log::debug!("Output reader still busy after {} ms; detaching it.", READER_GRACE_MS);
            reader.abort();
        }
    }
}

fn spawn_error(descriptor: &ShellDescriptor, command: &str, source: io::Error) -> ExecutionError {
    ExecutionError::Spawn {
        shell: descriptor.shell,
        command: command.to_string(),
        source,
    }
}

/// Runs one command to completion or timeout. Does not touch the shared state.
async fn run_foreground(request: &ExecRequest<'_>) -> Result<ExecResult, ExecutionError> {
    let descriptor = request.descriptor;
    let started = Instant::now();
    let mut child = piped(descriptor, request.command)
        .spawn()
        .map_err(|e| spawn_error(descriptor, request.command, e))?;
    let pid = child.id();
    log::debug!(
        "Spawned '{}' via {} (pid {:?}, timeout {:?})",
        request.command,
        descriptor.shell,
        pid,
        request.timeout
    );

    // If this future is dropped mid-run, the whole group goes with it.
    let group = scopeguard::guard(pid, |pid| {
        if let Some(pid) = pid {
            if let Err(e) = process_control::terminate_tree(pid) {
                log::debug!("Cleanup of abandoned process group {} failed: {}", pid, e);
            }
        }
    });

    let stdout = Arc::new(Mutex::new(OutputBuffer::new(request.output_cap)));
    let stderr = Arc::new(Mutex::new(OutputBuffer::new(request.output_cap)));
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        let buffer = Arc::clone(&stdout);
        readers.push(tokio::spawn(pump(out, move |chunk| {
            buffer.lock().unwrap_or_else(PoisonError::into_inner).push(chunk);
        })));
    }
    if let Some(err) = child.stderr.take() {
        let buffer = Arc::clone(&stderr);
        readers.push(tokio::spawn(pump(err, move |chunk| {
            buffer.lock().unwrap_or_else(PoisonError::into_inner).push(chunk);
        })));
    }

    let (exit_code, timed_out) = match tokio::time::timeout(request.timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => return Err(spawn_error(descriptor, request.command, e)),
        Err(_) => {
            log::warn!(
                "'{}' exceeded its {} ms timeout; terminating its process tree.",
                request.command,
                request.timeout.as_millis()
            );
            if let Some(pid) = pid {
                if let Err(e) = process_control::terminate_tree(pid) {
                    log::warn!("Failed to terminate process group {}: {}", pid, e);
                }
            }
            if let Err(e) = child.start_kill() {
                log::debug!("Direct kill after group kill: {}", e);
            }
            if let Err(e) = child.wait().await {
                log::debug!("Reaping timed-out process failed: {}", e);
            }
            (None, true)
        }
    };
    ScopeGuard::into_inner(group);
    let elapsed = duration_ms(started.elapsed());
    drain(readers).await;

    let contents = |buffer: &Arc<Mutex<OutputBuffer>>| {
        buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contents()
    };
    Ok(ExecResult {
        stdout: contents(&stdout),
        stderr: contents(&stderr),
        exit_code,
        duration_ms: elapsed,
        timed_out,
        shell: descriptor.shell,
    })
}

/// Owns a background child until it exits, then finalizes its tracker entry.
async fn watch_background(
    state: StateHandle,
    token: ProcessToken,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
) {
    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            log::warn!("Lost track of background process {}: {}", token.pid, e);
            None
        }
    };
    {
        let mut state = state.lock();
        let entry = state.tracker.finish(token, exit_code);
        state.record(entry);
    }
    log::debug!("Background process {} exited with {:?}", token.pid, exit_code);
    drain(readers).await;
}

impl Executor {
    pub fn new(state: StateHandle) -> Self {
        Self {
            state,
            sessions: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// The shared state this executor writes to.
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Foreground executions currently in flight.
    pub fn sessions_active(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Runs `request` in the foreground and records exactly one history entry.
    ///
    /// A timeout is a completion mode: the result comes back with
    /// `timed_out = true` and no exit code.
    pub async fn exec(&self, request: &ExecRequest<'_>) -> Result<ExecResult, ExecutionError> {
        let started_at = now_ms();
        if self.is_shutting_down() {
            self.state.lock().history.record(failed_entry(
                request.command,
                request.descriptor.shell,
                started_at,
            ));
            return Err(ExecutionError::ShuttingDown);
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let _session = scopeguard::guard(Arc::clone(&self.sessions), |sessions| {
            sessions.fetch_sub(1, Ordering::SeqCst);
        });

        let outcome = run_foreground(request).await;
        let entry = match &outcome {
            Ok(result) => HistoryEntry {
                command: request.command.to_string(),
                shell: result.shell,
                timestamp_ms: started_at,
                exit_code: result.exit_code,
                duration_ms: Some(result.duration_ms),
                timed_out: result.timed_out,
            },
            Err(e) => {
                log::warn!("{}", e);
                failed_entry(request.command, request.descriptor.shell, started_at)
            }
        };
        self.state.lock().history.record(entry);
        outcome
    }

    /// Spawns `request` detached, registers it as `Running` and returns its pid.
    ///
    /// Fails immediately with [`ExecutionError::ConcurrencyLimit`] when all
    /// slots are taken. Must be called from within a Tokio runtime.
    pub fn background(&self, request: &BackgroundRequest<'_>) -> Result<u32, ExecutionError> {
        let descriptor = request.descriptor;
        let started_at = now_ms();
        let refuse = |error: ExecutionError| {
            self.state
                .lock()
                .history
                .record(failed_entry(request.command, descriptor.shell, started_at));
            Err(error)
        };

        if self.is_shutting_down() {
            return refuse(ExecutionError::ShuttingDown);
        }
        let Some(reservation) = self.state.reserve(request.max_concurrent) else {
            log::warn!(
                "Refusing '{}': {} background processes already running.",
                request.command,
                request.max_concurrent
            );
            return refuse(ExecutionError::ConcurrencyLimit {
                limit: request.max_concurrent,
                command: request.command.to_string(),
            });
        };

        let mut child = match piped(descriptor, request.command).spawn() {
            Ok(child) => child,
            Err(e) => return refuse(spawn_error(descriptor, request.command, e)),
        };
        let Some(pid) = child.id() else {
            return refuse(spawn_error(
                descriptor,
                request.command,
                io::Error::other("process exited before it could be tracked"),
            ));
        };
        let token = reservation.register(pid, request.command, descriptor.shell, request.output_cap);

        let mut readers = Vec::with_capacity(2);
        for (stream, reader) in [
            (
                OutputStream::Stdout,
                child.stdout.take().map(|r| Box::new(r) as Box<dyn AsyncRead + Send + Unpin>),
            ),
            (
                OutputStream::Stderr,
                child.stderr.take().map(|r| Box::new(r) as Box<dyn AsyncRead + Send + Unpin>),
            ),
        ] {
            let Some(reader) = reader else { continue };
            let state = self.state.clone();
            readers.push(tokio::spawn(pump(reader, move |chunk| {
                state.lock().tracker.append(token, stream, chunk);
            })));
        }

        let watcher = tokio::spawn(watch_background(self.state.clone(), token, child, readers));
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|handle| !handle.is_finished());
        watchers.push(watcher);

        log::info!("Started background process {} ('{}') via {}", pid, request.command, descriptor.shell);
        Ok(pid)
    }

    /// Terminates a running background process and its descendants.
    ///
    /// Returns `false` for unknown or already finished pids, and when the
    /// termination signal could not be delivered.
    pub fn kill(&self, pid: u32) -> bool {
        let Some(token) = self.state.lock().tracker.request_kill(pid) else {
            log::debug!("kill({}) ignored: not a running tracked process.", pid);
            return false;
        };

        match process_control::terminate_tree(pid) {
            Ok(()) => {
                let mut state = self.state.lock();
                let entry = state.tracker.mark_killed(token);
                state.record(entry);
                log::info!("Killed process {}", pid);
                true
            }
            Err(e) => {
                log::warn!("Failed to terminate process {}: {}", pid, e);
                let mut state = self.state.lock();
                state.tracker.cancel_kill(token);
                // The process may have exited on its own while the flag was set.
                state.tracker.status(pid) == Some(ProcessStatus::Killed)
            }
        }
    }

    /// Rejects new work, then terminates every running background process.
    /// Returns how many were killed.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let running: Vec<u32> = self
            .state
            .lock()
            .tracker
            .running_tokens()
            .into_iter()
            .map(|token| token.pid)
            .collect();
        let killed = running.into_iter().filter(|pid| self.kill(*pid)).count();

        let watchers: Vec<JoinHandle<()>> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for mut watcher in watchers {
            if tokio::time::timeout(Duration::from_millis(READER_GRACE_MS), &mut watcher)
                .await
                .is_err()
            {
                watcher.abort();
            }
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{history::HistoryStore, tracker::ProcessTracker};
    use crate::state::SharedState;
    use crate::system::shell::ShellResolver;

    fn executor() -> Executor {
        Executor::new(StateHandle::new(SharedState::new(
            ProcessTracker::new(64),
            HistoryStore::new(100),
        )))
    }

    async fn posix_shell() -> Option<ShellDescriptor> {
        let resolver = ShellResolver::new();
        for shell in [ShellType::Sh, ShellType::Bash] {
            if let Ok(descriptor) = resolver.descriptor(shell).await {
                return Some(descriptor);
            }
        }
        None
    }

    fn foreground<'a>(descriptor: &'a ShellDescriptor, command: &'a str, timeout_ms: u64) -> ExecRequest<'a> {
        ExecRequest {
            command,
            descriptor,
            timeout: Duration::from_millis(timeout_ms),
            output_cap: None,
        }
    }

    #[tokio::test]
    async fn test_pump_bounds_chunks_without_newlines() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let mut largest = 0;
        let mut total = 0;
        pump(input.as_slice(), |chunk| {
            largest = largest.max(chunk.len());
            total += chunk.len();
        })
        .await;
        assert!(largest <= READ_CHUNK_BYTES);
        assert_eq!(total, input.len());
    }

    #[tokio::test]
    async fn test_pump_keeps_characters_split_across_reads() {
        let text = format!("a{}", "é".repeat(READ_CHUNK_BYTES));
        let mut chunks = Vec::new();
        pump(text.as_bytes(), |chunk| chunks.push(chunk.to_string())).await;
        assert!(chunks.len() > 1);
        let joined = chunks.concat();
        assert!(!joined.contains('\u{FFFD}'));
        assert_eq!(joined, text);
    }

    #[test]
    fn test_split_point_holds_back_incomplete_sequences() {
        assert_eq!(split_point(b""), 0);
        assert_eq!(split_point(b"abc"), 3);
        assert_eq!(split_point("aé".as_bytes()), 3);
        assert_eq!(split_point(&[b'a', 0xC3]), 1);
        assert_eq!(split_point(&[b'a', 0xE2, 0x82]), 1);
        assert_eq!(split_point(&[0xF0, 0x9F, 0x98]), 0);
        assert_eq!(split_point("€".as_bytes()), 3);
    }

    #[tokio::test]
    async fn test_exec_collects_long_unbroken_output() {
        let Some(sh) = posix_shell().await else { return };
        let result = executor()
            .exec(&foreground(&sh, "head -c 100000 /dev/zero | tr '\\0' x", 10_000))
            .await
            .expect("exec");
        assert_eq!(result.stdout.trim_end().len(), 100_000);
    }

    fn detached<'a>(descriptor: &'a ShellDescriptor, command: &'a str, max: usize) -> BackgroundRequest<'a> {
        BackgroundRequest {
            command,
            descriptor,
            output_cap: None,
            max_concurrent: max,
        }
    }

    #[tokio::test]
    async fn test_exec_captures_streams_and_exit_code() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let result = executor
            .exec(&foreground(&sh, "echo out; echo err >&2; exit 3", 5_000))
            .await
            .expect("exec runs");
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
        assert_eq!(executor.state().lock().history.len(), 1);
        assert_eq!(executor.sessions_active(), 0);
    }

    #[tokio::test]
    async fn test_exec_timeout_kills_the_whole_tree() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let started = Instant::now();
        let result = executor
            .exec(&foreground(&sh, "sleep 10 & echo $!; wait", 100))
            .await
            .expect("a timeout is still a result");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(started.elapsed() < Duration::from_millis(1_500));

        let grandchild: u32 = result.stdout.trim().parse().expect("pid of the sleep");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_control::is_alive(grandchild));

        let history = executor.state().lock().history.entries();
        assert_eq!(history.len(), 1);
        assert!(history.iter().all(|entry| entry.timed_out));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_typed_and_recorded() {
        let executor = executor();
        let ghost = ShellDescriptor {
            shell: ShellType::Bash,
            path: Some("/definitely/not/a/shell".into()),
            version: None,
            available: true,
        };
        let err = executor
            .exec(&foreground(&ghost, "echo hi", 1_000))
            .await
            .expect_err("missing binary cannot spawn");
        assert!(matches!(err, ExecutionError::Spawn { shell: ShellType::Bash, .. }));
        let history = executor.state().lock().history.entries();
        assert_eq!(history.len(), 1);
        assert_eq!(history.first().and_then(|e| e.duration_ms), None);
    }

    #[tokio::test]
    async fn test_background_returns_fast_and_stays_running() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let started = Instant::now();
        let pid = executor
            .background(&detached(&sh, "sleep 5", 4))
            .expect("spawn succeeds");
        assert!(started.elapsed() < Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(
            executor.state().lock().tracker.status(pid),
            Some(ProcessStatus::Running)
        );
        assert!(executor.kill(pid));
    }

    #[tokio::test]
    async fn test_background_collects_output_and_exit() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let pid = executor
            .background(&detached(&sh, "echo hello; echo oops >&2; exit 2", 4))
            .expect("spawn succeeds");
        let mut status = executor
            .state()
            .lock()
            .tracker
            .subscribe(pid)
            .expect("tracked");
        status
            .wait_for(|s| s.is_terminal())
            .await
            .expect("watcher finishes");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = executor.state().lock();
        assert_eq!(state.tracker.status(pid), Some(ProcessStatus::Error));
        assert_eq!(state.tracker.output(pid, OutputStream::Stdout).as_deref(), Some("hello\n"));
        assert_eq!(state.tracker.output(pid, OutputStream::Stderr).as_deref(), Some("oops\n"));
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap_fails_immediately() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let first = executor.background(&detached(&sh, "sleep 5", 2)).expect("slot 1");
        let second = executor.background(&detached(&sh, "sleep 5", 2)).expect("slot 2");

        let started = Instant::now();
        let err = executor
            .background(&detached(&sh, "sleep 5", 2))
            .expect_err("third exceeds the cap");
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(matches!(err, ExecutionError::ConcurrencyLimit { limit: 2, .. }));
        assert!(err.to_string().contains("Concurrency limit"));

        assert!(executor.kill(first));
        assert!(executor.kill(second));
    }

    #[tokio::test]
    async fn test_kill_running_then_terminal() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        let pid = executor.background(&detached(&sh, "sleep 30", 4)).expect("spawn");
        assert!(executor.kill(pid));
        assert_eq!(
            executor.state().lock().tracker.status(pid),
            Some(ProcessStatus::Killed)
        );
        assert!(!executor.kill(pid));
        assert!(!executor.kill(u32::MAX));

        // The watcher's exit notification must not overwrite Killed.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let state = executor.state().lock();
        assert_eq!(state.tracker.status(pid), Some(ProcessStatus::Killed));
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_and_rejects_new_work() {
        let Some(sh) = posix_shell().await else { return };
        let executor = executor();
        executor.background(&detached(&sh, "sleep 30", 4)).expect("spawn");
        assert_eq!(executor.shutdown().await, 1);
        assert_eq!(executor.state().lock().tracker.running_count(), 0);
        assert!(matches!(
            executor.exec(&foreground(&sh, "echo late", 1_000)).await,
            Err(ExecutionError::ShuttingDown)
        ));
    }
}
