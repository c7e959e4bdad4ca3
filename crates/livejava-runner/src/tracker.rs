//! Shared table of live child processes and the sweep-and-kill policy.
//!
//! Each spawned process gets an entry keyed by pid. The OS handle stays with a
//! supervisor task (see `process.rs`); the entry only carries a kill request
//! channel and an exit acknowledgment, so a pid is never signalled after its
//! process has been reaped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One tracked child process.
#[derive(Debug)]
pub struct TrackedProcess {
    pub pid: u32,
    pub program: String,
    serial: u64,
    kill_tx: oneshot::Sender<()>,
    exited_rx: oneshot::Receiver<()>,
}

/// Supervisor side of a tracker entry.
#[derive(Debug)]
pub(crate) struct Registration {
    pub pid: u32,
    pub serial: u64,
    pub kill_rx: oneshot::Receiver<()>,
    pub exited_tx: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    table: Arc<Mutex<HashMap<u32, TrackedProcess>>>,
    serial: Arc<AtomicU64>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, TrackedProcess>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, pid: u32, program: &str) -> Registration {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();
        let entry = TrackedProcess {
            pid,
            program: program.to_string(),
            serial,
            kill_tx,
            exited_rx,
        };
        if let Some(stale) = self.lock().insert(pid, entry) {
            // The previous holder of this pid has been reaped; its supervisor
            // can no longer signal anything.
            debug!(pid, program = %stale.program, "replaced stale tracker entry");
        }
        Registration {
            pid,
            serial,
            kill_rx,
            exited_tx,
        }
    }

    /// Drop the entry for `pid` if it still belongs to the given registration.
    pub(crate) fn release(&self, pid: u32, serial: u64) -> bool {
        let mut table = self.lock();
        if table.get(&pid).is_some_and(|p| p.serial == serial) {
            table.remove(&pid);
            true
        } else {
            false
        }
    }

    /// Request termination of a single registration, if still tracked.
    pub(crate) fn kill(&self, pid: u32, serial: u64) -> bool {
        let entry = {
            let mut table = self.lock();
            if table.get(&pid).is_some_and(|p| p.serial == serial) {
                table.remove(&pid)
            } else {
                None
            }
        };
        match entry {
            Some(entry) => {
                let _ = entry.kill_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Remove every tracked process and ask each supervisor to kill it.
    ///
    /// The table is empty when this returns; await the [`Sweep`] to confirm
    /// the processes are gone.
    pub fn sweep(&self) -> Sweep {
        let drained: Vec<TrackedProcess> = self.lock().drain().map(|(_, p)| p).collect();
        let mut pending = Vec::with_capacity(drained.len());
        for process in drained {
            debug!(pid = process.pid, program = %process.program, "requesting kill");
            let _ = process.kill_tx.send(());
            pending.push((process.pid, process.exited_rx));
        }
        Sweep { pending }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Outstanding kill requests issued by [`ProcessTracker::sweep`].
#[derive(Debug, Default)]
#[must_use = "a sweep should be awaited before spawning replacements"]
pub struct Sweep {
    pending: Vec<(u32, oneshot::Receiver<()>)>,
}

impl Sweep {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait up to `grace` for every swept process to be reaped.
    ///
    /// Returns the number of processes confirmed gone.
    pub async fn wait(self, grace: Duration) -> usize {
        let mut confirmed = 0;
        let deadline = tokio::time::Instant::now() + grace;
        for (pid, exited) in self.pending {
            // A dropped sender means the supervisor is gone, which only happens
            // after the child was reaped.
            match tokio::time::timeout_at(deadline, exited).await {
                Ok(_) => confirmed += 1,
                Err(_) => warn!(pid, "process did not exit within grace period"),
            }
        }
        confirmed
    }
}

/// Forcefully terminate `pid` and everything it spawned.
///
/// Children are started as process-group leaders on unix, so the whole group
/// is signalled. Windows delegates to `taskkill /T`.
#[cfg(unix)]
pub async fn terminate_process_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, error = %e, "killpg failed");
    }
}

#[cfg(windows)]
pub async fn terminate_process_tree(pid: u32) {
    let status = tokio::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => debug!(pid, status = %s, "taskkill reported failure"),
        Err(e) => warn!(pid, error = %e, "failed to run taskkill"),
    }
}

#[cfg(not(any(unix, windows)))]
pub async fn terminate_process_tree(_pid: u32) {}
