// src/core/tracker.rs

//! # Process Tracker
//!
//! Owns the registry of background processes: their status, their bounded
//! output buffers and one completion channel per entry.
//!
//! Entries are keyed by OS pid and stamped with a generation number taken from
//! a monotonically increasing counter. Every asynchronous event (an output line,
//! an exit notification, a sweep observation) carries the [`ProcessToken`] it
//! was issued for, so an event that outlives its entry can never land on a newer
//! process that happens to reuse the same pid.
//!
//! The tracker itself is plain data mutated through `&mut self`; the manager
//! keeps it behind its single state mutex.

use crate::{
    constants::ZOMBIE_STRIKES,
    core::buffer::OutputBuffer,
    models::{
        HistoryEntry, ManagedProcessSummary, OutputStream, ProcessStats, ProcessStatus, ShellType,
        duration_ms, now_ms,
    },
};
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("No tracked process with pid {0}.")]
    ProcessNotFound(u32),
}

/// Identifies one registration of a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessToken {
    pub pid: u32,
    pub generation: u64,
}

/// A tracked background process with its buffered output.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub pid: u32,
    pub command: String,
    pub shell: ShellType,
    pub status: ProcessStatus,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub exit_code: Option<i32>,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    process: ManagedProcess,
    started: Instant,
    finished: Option<Instant>,
    kill_requested: bool,
    missed_sweeps: u8,
    status_tx: watch::Sender<ProcessStatus>,
}

impl Slot {
    fn token(&self) -> ProcessToken {
        ProcessToken {
            pid: self.process.pid,
            generation: self.generation,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        let end = self.finished.unwrap_or_else(Instant::now);
        duration_ms(end.saturating_duration_since(self.started))
    }

    fn summary(&self) -> ManagedProcessSummary {
        let process = &self.process;
        ManagedProcessSummary {
            pid: process.pid,
            command: process.command.clone(),
            shell: process.shell,
            status: process.status,
            start_time_ms: process.start_time_ms,
            end_time_ms: process.end_time_ms,
            exit_code: process.exit_code,
            duration_ms: self.finished.map(|_| self.elapsed_ms()),
            stdout_bytes: process.stdout.len(),
            stderr_bytes: process.stderr.len(),
        }
    }

    /// Moves a running entry to `next` and returns the history entry describing the run.
    fn transition(&mut self, next: ProcessStatus, exit_code: Option<i32>) -> Option<HistoryEntry> {
        if !self.process.status.can_transition_to(next) {
            return None;
        }
        self.finished = Some(Instant::now());
        self.process.status = next;
        self.process.end_time_ms = Some(now_ms());
        self.process.exit_code = exit_code;
        self.status_tx.send_replace(next);
        log::debug!(
            "Process {} (gen {}) -> {}",
            self.process.pid,
            self.generation,
            next
        );

        Some(HistoryEntry {
            command: self.process.command.clone(),
            shell: self.process.shell,
            timestamp_ms: self.process.start_time_ms,
            exit_code,
            duration_ms: Some(self.elapsed_ms()),
            timed_out: false,
        })
    }
}

/// Registry of background processes keyed by pid.
#[derive(Debug)]
pub struct ProcessTracker {
    slots: HashMap<u32, Slot>,
    next_generation: u64,
    max_tracked: usize,
}

impl ProcessTracker {
    /// Creates a tracker that keeps at most `max_tracked` entries before evicting finished ones.
    pub fn new(max_tracked: usize) -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 1,
            max_tracked: max_tracked.max(1),
        }
    }

    /// Registers a freshly spawned process as `Running`.
    ///
    /// If the OS handed out a pid that is still tracked, the stale entry is
    /// evicted first. When the registry is full, the oldest finished entries go.
    pub fn register(
        &mut self,
        pid: u32,
        command: &str,
        shell: ShellType,
        output_cap: Option<usize>,
    ) -> ProcessToken {
        if let Some(stale) = self.slots.remove(&pid) {
            if stale.process.status == ProcessStatus::Running {
                log::warn!(
                    "Pid {} was reused while its previous entry (gen {}) still looked running; evicting it.",
                    pid,
                    stale.generation
                );
            } else {
                log::debug!("Evicting finished entry for reused pid {}.", pid);
            }
        }
        while self.slots.len() >= self.max_tracked {
            if !self.evict_oldest_finished() {
                break;
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let (status_tx, _) = watch::channel(ProcessStatus::Running);
        let slot = Slot {
            generation,
            process: ManagedProcess {
                pid,
                command: command.to_string(),
                shell,
                status: ProcessStatus::Running,
                start_time_ms: now_ms(),
                end_time_ms: None,
                exit_code: None,
                stdout: OutputBuffer::new(output_cap),
                stderr: OutputBuffer::new(output_cap),
            },
            started: Instant::now(),
            finished: None,
            kill_requested: false,
            missed_sweeps: 0,
            status_tx,
        };
        self.slots.insert(pid, slot);
        ProcessToken { pid, generation }
    }

    fn evict_oldest_finished(&mut self) -> bool {
        let oldest = self
            .slots
            .values()
            .filter(|slot| slot.process.status.is_terminal())
            .min_by_key(|slot| slot.generation)
            .map(|slot| slot.process.pid);
        match oldest {
            Some(pid) => {
                log::debug!("Tracker full; evicting finished process {}.", pid);
                self.slots.remove(&pid);
                true
            }
            None => false,
        }
    }

    fn slot_mut(&mut self, token: ProcessToken) -> Option<&mut Slot> {
        self.slots
            .get_mut(&token.pid)
            .filter(|slot| slot.generation == token.generation)
    }

    /// Appends output to the entry identified by `token`. Stale tokens are ignored.
    pub fn append(&mut self, token: ProcessToken, stream: OutputStream, chunk: &str) -> bool {
        let Some(slot) = self.slot_mut(token) else {
            return false;
        };
        match stream {
            OutputStream::Stdout => slot.process.stdout.push(chunk),
            OutputStream::Stderr => slot.process.stderr.push(chunk),
        }
        true
    }

    /// Applies an OS exit notification. Returns the history entry if this caused the transition.
    pub fn finish(&mut self, token: ProcessToken, exit_code: Option<i32>) -> Option<HistoryEntry> {
        let slot = self.slot_mut(token)?;
        let next = if slot.kill_requested {
            ProcessStatus::Killed
        } else if exit_code == Some(0) {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Error
        };
        slot.transition(next, exit_code)
    }

    /// Flags a running entry for termination and returns its token.
    /// Returns `None` for unknown or already finished pids.
    pub fn request_kill(&mut self, pid: u32) -> Option<ProcessToken> {
        let slot = self.slots.get_mut(&pid)?;
        if slot.process.status.is_terminal() {
            return None;
        }
        slot.kill_requested = true;
        Some(slot.token())
    }

    /// Withdraws a kill request whose signal could not be delivered.
    pub fn cancel_kill(&mut self, token: ProcessToken) {
        if let Some(slot) = self.slot_mut(token) {
            slot.kill_requested = false;
        }
    }

    /// Marks the entry `Killed` once the termination signal was delivered.
    pub fn mark_killed(&mut self, token: ProcessToken) -> Option<HistoryEntry> {
        self.slot_mut(token)?
            .transition(ProcessStatus::Killed, None)
    }

    /// Records one sweep observation. An entry missing from the OS process table
    /// on consecutive sweeps without an exit notification becomes `Zombie`.
    pub fn observe(&mut self, token: ProcessToken, alive: bool) -> Option<HistoryEntry> {
        let slot = self.slot_mut(token)?;
        if slot.process.status.is_terminal() {
            return None;
        }
        if alive {
            slot.missed_sweeps = 0;
            return None;
        }
        slot.missed_sweeps = slot.missed_sweeps.saturating_add(1);
        if slot.missed_sweeps < ZOMBIE_STRIKES {
            return None;
        }
        log::warn!(
            "Process {} vanished without an exit notification; marking it as zombie.",
            token.pid
        );
        slot.transition(ProcessStatus::Zombie, None)
    }

    /// Tokens of every running entry.
    pub fn running_tokens(&self) -> Vec<ProcessToken> {
        self.slots
            .values()
            .filter(|slot| slot.process.status == ProcessStatus::Running)
            .map(Slot::token)
            .collect()
    }

    /// Number of running entries.
    pub fn running_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.process.status == ProcessStatus::Running)
            .count()
    }

    /// Number of tracked entries, finished ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot summaries ordered by registration, optionally filtered by status.
    pub fn list(&self, status: Option<ProcessStatus>) -> Vec<ManagedProcessSummary> {
        let mut slots: Vec<&Slot> = self
            .slots
            .values()
            .filter(|slot| status.is_none_or(|wanted| slot.process.status == wanted))
            .collect();
        slots.sort_by_key(|slot| slot.generation);
        slots.into_iter().map(Slot::summary).collect()
    }

    /// Current status of `pid`, if tracked.
    pub fn status(&self, pid: u32) -> Option<ProcessStatus> {
        self.slots.get(&pid).map(|slot| slot.process.status)
    }

    /// A full copy of one entry, buffers included.
    pub fn get(&self, pid: u32) -> Option<ManagedProcess> {
        self.slots.get(&pid).map(|slot| slot.process.clone())
    }

    /// The joined buffer contents of one stream, or `None` for unknown pids.
    pub fn output(&self, pid: u32, stream: OutputStream) -> Option<String> {
        self.slots.get(&pid).map(|slot| match stream {
            OutputStream::Stdout => slot.process.stdout.contents(),
            OutputStream::Stderr => slot.process.stderr.contents(),
        })
    }

    /// Subscribes to status changes of `pid`.
    pub fn subscribe(&self, pid: u32) -> Result<watch::Receiver<ProcessStatus>, TrackerError> {
        self.slots
            .get(&pid)
            .map(|slot| slot.status_tx.subscribe())
            .ok_or(TrackerError::ProcessNotFound(pid))
    }

    /// Evicts every finished entry and returns how many were removed.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.process.status == ProcessStatus::Running);
        before - self.slots.len()
    }

    /// Counts of tracked entries grouped by status.
    pub fn stats(&self) -> ProcessStats {
        let mut stats = ProcessStats {
            total: self.slots.len(),
            ..ProcessStats::default()
        };
        for slot in self.slots.values() {
            match slot.process.status {
                ProcessStatus::Running => stats.running += 1,
                ProcessStatus::Completed => stats.completed += 1,
                ProcessStatus::Error => stats.error += 1,
                ProcessStatus::Killed => stats.killed += 1,
                ProcessStatus::Zombie => stats.zombie += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(pids: &[u32]) -> (ProcessTracker, Vec<ProcessToken>) {
        let mut tracker = ProcessTracker::new(16);
        let tokens = pids
            .iter()
            .map(|pid| tracker.register(*pid, &format!("job {pid}"), ShellType::Sh, Some(64)))
            .collect();
        (tracker, tokens)
    }

    #[test]
    fn test_exit_code_decides_terminal_status() {
        let (mut tracker, tokens) = tracker_with(&[10, 11]);
        let ok = tracker.finish(tokens[0], Some(0)).expect("transition happens");
        assert_eq!(ok.exit_code, Some(0));
        assert!(tracker.finish(tokens[1], Some(3)).is_some());
        let stats = tracker.stats();
        assert_eq!((stats.completed, stats.error, stats.running), (1, 1, 0));
    }

    #[test]
    fn test_terminal_states_never_transition_again() {
        let (mut tracker, tokens) = tracker_with(&[20]);
        assert!(tracker.finish(tokens[0], Some(0)).is_some());
        assert!(tracker.finish(tokens[0], Some(1)).is_none());
        assert!(tracker.mark_killed(tokens[0]).is_none());
        assert!(tracker.request_kill(20).is_none());
        assert_eq!(tracker.list(None)[0].status, ProcessStatus::Completed);
    }

    #[test]
    fn test_kill_request_turns_exit_into_killed() {
        let (mut tracker, tokens) = tracker_with(&[30]);
        let token = tracker.request_kill(30).expect("running entry");
        assert_eq!(token, tokens[0]);
        // The exit notification races ahead of the explicit mark.
        assert!(tracker.finish(token, None).is_some());
        assert!(tracker.mark_killed(token).is_none());
        assert_eq!(tracker.list(None)[0].status, ProcessStatus::Killed);
    }

    #[test]
    fn test_stale_token_cannot_touch_reused_pid() {
        let (mut tracker, tokens) = tracker_with(&[40]);
        let old = tokens[0];
        assert!(tracker.finish(old, Some(0)).is_some());
        let fresh = tracker.register(40, "new job", ShellType::Bash, None);
        assert_ne!(old.generation, fresh.generation);
        assert_eq!(tracker.len(), 1);

        assert!(!tracker.append(old, OutputStream::Stdout, "late line\n"));
        assert!(tracker.finish(old, Some(0)).is_none());
        assert_eq!(tracker.list(None)[0].status, ProcessStatus::Running);
        assert_eq!(tracker.output(40, OutputStream::Stdout).as_deref(), Some(""));
    }

    #[test]
    fn test_zombie_needs_consecutive_misses() {
        let (mut tracker, tokens) = tracker_with(&[50]);
        let token = tokens[0];
        assert!(tracker.observe(token, false).is_none());
        assert!(tracker.observe(token, true).is_none());
        assert!(tracker.observe(token, false).is_none());
        let entry = tracker.observe(token, false).expect("second strike");
        assert_eq!(entry.exit_code, None);
        assert_eq!(tracker.stats().zombie, 1);
    }

    #[test]
    fn test_list_filters_by_status_and_keeps_order() {
        let (mut tracker, tokens) = tracker_with(&[60, 61, 62]);
        tracker.finish(tokens[1], Some(0));
        let running: Vec<u32> = tracker
            .list(Some(ProcessStatus::Running))
            .into_iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(running, vec![60, 62]);
        assert_eq!(tracker.list(Some(ProcessStatus::Completed)).len(), 1);
    }

    #[test]
    fn test_output_is_bounded_per_stream() {
        let (mut tracker, tokens) = tracker_with(&[70]);
        for i in 0..100 {
            tracker.append(tokens[0], OutputStream::Stdout, &format!("line {i:03}\n"));
        }
        tracker.append(tokens[0], OutputStream::Stderr, "boom\n");
        let stdout = tracker.output(70, OutputStream::Stdout).expect("known pid");
        assert!(stdout.starts_with(crate::constants::TRUNCATION_MARKER));
        assert!(stdout.ends_with("line 099\n"));
        assert_eq!(tracker.output(70, OutputStream::Stderr).as_deref(), Some("boom\n"));
        assert!(tracker.output(71, OutputStream::Stdout).is_none());
    }

    #[test]
    fn test_full_tracker_evicts_oldest_finished() {
        let mut tracker = ProcessTracker::new(2);
        let first = tracker.register(1, "a", ShellType::Sh, None);
        tracker.register(2, "b", ShellType::Sh, None);
        tracker.finish(first, Some(0));
        tracker.register(3, "c", ShellType::Sh, None);
        let pids: Vec<u32> = tracker.list(None).into_iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![2, 3]);
    }

    #[test]
    fn test_clear_finished_keeps_running() {
        let (mut tracker, tokens) = tracker_with(&[80, 81]);
        tracker.finish(tokens[0], Some(0));
        assert_eq!(tracker.clear_finished(), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn test_subscribers_see_the_transition() {
        let (mut tracker, tokens) = tracker_with(&[90]);
        let receiver = tracker.subscribe(90).expect("known pid");
        assert_eq!(*receiver.borrow(), ProcessStatus::Running);
        tracker.finish(tokens[0], Some(2));
        assert_eq!(*receiver.borrow(), ProcessStatus::Error);
        assert_eq!(
            tracker.subscribe(91).err(),
            Some(TrackerError::ProcessNotFound(91))
        );
    }
}
