// src/system/process_control.rs

//! OS-level process operations: spawn isolation, process-tree termination and
//! liveness checks against the process table.

use std::collections::HashSet;
use std::io;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus as OsStatus, ProcessesToUpdate, System};
use tokio::process::Command;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Puts the spawned process at the head of its own process group, so the
/// whole tree can be signalled at once.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}

/// Force-kills `pid` and every process in its tree.
///
/// Expects `pid` to lead its own process group (see [`isolate`]).
#[cfg(unix)]
pub fn terminate_tree(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid as NixPid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    let target = NixPid::from_raw(raw);
    match killpg(target, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // No group by that id: the leader may not have been isolated.
        Err(nix::errno::Errno::ESRCH) => kill(target, Signal::SIGKILL).map_err(io::Error::from),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Force-kills `pid` and every process in its tree.
#[cfg(windows)]
pub fn terminate_tree(pid: u32) -> io::Result<()> {
    use std::process::{Command as StdCommand, Stdio};

    let status = StdCommand::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("taskkill could not terminate process {pid}"),
        ))
    }
}

/// Returns the subset of `pids` that are still alive.
///
/// Processes the OS reports as zombie/dead (exited but unreaped) count as gone.
pub fn alive_pids(pids: &[u32]) -> HashSet<u32> {
    if pids.is_empty() {
        return HashSet::new();
    }
    let targets: Vec<Pid> = pids.iter().map(|pid| Pid::from_u32(*pid)).collect();
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&targets),
        true,
        ProcessRefreshKind::new(),
    );
    targets
        .iter()
        .filter(|pid| {
            system
                .process(**pid)
                .is_some_and(|process| !matches!(process.status(), OsStatus::Zombie | OsStatus::Dead))
        })
        .map(|pid| pid.as_u32())
        .collect()
}

/// Whether a single process is still alive.
pub fn is_alive(pid: u32) -> bool {
    alive_pids(&[pid]).contains(&pid)
}
