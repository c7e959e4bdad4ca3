use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use livejava_core::CycleError;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::capture::{decode_line, OutputCapture};
use crate::tracker::{terminate_process_tree, ProcessTracker};

/// Launches external commands and streams their combined output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    tracker: ProcessTracker,
}

impl ProcessRunner {
    pub fn new(tracker: ProcessTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Spawn `program args...` in `cwd` with stdout and stderr merged.
    ///
    /// Both streams share one pipe, so lines arrive in the order the program
    /// wrote them. The child is registered with the tracker before this
    /// returns, so a sweep issued at any later point can find it.
    pub fn spawn(&self, program: &str, args: &[String], cwd: &Path) -> Result<ProcessLines, CycleError> {
        let spawn_error = |source: io::Error| CycleError::ProcessSpawn {
            program: program.to_string(),
            source,
        };
        let (reader, writer) = os_pipe::pipe().map_err(spawn_error)?;
        let stdout = writer.try_clone().map_err(spawn_error)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let spawned = cmd.spawn();
        // The command holds the parent's copies of the write end; the reader
        // only sees EOF once they are closed.
        drop(cmd);
        let mut child = spawned.map_err(spawn_error)?;
        let Some(pid) = child.id() else {
            return Err(spawn_error(io::Error::other("process exited before its pid was observed")));
        };

        let registration = self.tracker.register(pid, program);
        let serial = registration.serial;
        debug!(pid, program, ?args, "spawned");

        let (line_tx, lines) = mpsc::unbounded_channel();
        let forwarder = std::thread::Builder::new()
            .name(format!("livejava-output-{pid}"))
            .spawn(move || forward_lines(reader, line_tx));
        if let Err(e) = forwarder {
            self.tracker.release(pid, serial);
            return Err(spawn_error(e));
        }

        let (status_tx, status) = oneshot::channel();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            let mut kill_rx = registration.kill_rx;
            let result = tokio::select! {
                res = child.wait() => res,
                Ok(()) = &mut kill_rx => {
                    debug!(pid, "terminating process tree");
                    terminate_process_tree(pid).await;
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            tracker.release(pid, serial);
            let _ = registration.exited_tx.send(());
            let _ = status_tx.send(result);
        });

        Ok(ProcessLines {
            pid,
            serial,
            tracker: self.tracker.clone(),
            lines,
            status: Some(status),
        })
    }
}

// Runs on a dedicated thread: the pipe is a blocking handle, and a reader
// stuck behind a surviving grandchild must not hold up runtime shutdown.
fn forward_lines<R: Read>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let raw = buf.strip_suffix(b"\n").unwrap_or(&buf);
                if tx.send(decode_line(raw)).is_err() {
                    break;
                }
            }
        }
    }
}

/// Output of a running process, consumed as it arrives.
///
/// Dropping this before the process has been waited on kills the process tree.
#[derive(Debug)]
pub struct ProcessLines {
    pid: u32,
    serial: u64,
    tracker: ProcessTracker,
    lines: mpsc::UnboundedReceiver<String>,
    status: Option<oneshot::Receiver<io::Result<ExitStatus>>>,
}

impl ProcessLines {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next line of combined output; `None` once both streams are closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for exit, discarding any output not yet read.
    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        while self.lines.recv().await.is_some() {}
        self.exit_status().await
    }

    /// Forward every remaining line into `capture`, then wait for exit.
    ///
    /// Lines land in the capture as they arrive, so they survive if this
    /// future is dropped part-way.
    pub async fn pipe_into(mut self, capture: &OutputCapture) -> io::Result<ExitStatus> {
        while let Some(line) = self.lines.recv().await {
            capture.push_line(line);
        }
        self.exit_status().await
    }

    /// Drain everything into a vector.
    pub async fn collect(mut self) -> (Vec<String>, io::Result<ExitStatus>) {
        let mut out = Vec::new();
        while let Some(line) = self.lines.recv().await {
            out.push(line);
        }
        let status = self.exit_status().await;
        (out, status)
    }

    async fn exit_status(&mut self) -> io::Result<ExitStatus> {
        let Some(status) = self.status.take() else {
            return Err(io::Error::other("exit status already taken"));
        };
        status
            .await
            .unwrap_or_else(|_| Err(io::Error::other("process supervisor went away")))
    }
}

impl Drop for ProcessLines {
    fn drop(&mut self) {
        if self.status.is_some() && self.tracker.kill(self.pid, self.serial) {
            debug!(pid = self.pid, "output abandoned; killing process");
        }
    }
}

/// Short description of how a process ended.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "terminated".to_string()
}
