//! Line-oriented output sinks.
//!
//! [`OutputCapture`] collects combined output for one cycle. [`ScopedRedirect`]
//! points program output at a capture for the lifetime of a guard, so code
//! running through the embedded compiler prints into the cycle that owns it.

use std::cell::RefCell;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct CaptureState {
    lines: Vec<String>,
    pending: Vec<u8>,
}

/// Thread-safe accumulator of output lines. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one complete line.
    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().lines.push(line.into());
    }

    /// Append raw bytes, splitting on `\n`. An unterminated tail is held back
    /// until more bytes arrive or [`finish`](Self::finish) is called.
    pub fn write_bytes(&self, bytes: &[u8]) {
        let mut state = self.lock();
        for &b in bytes {
            if b == b'\n' {
                let raw = std::mem::take(&mut state.pending);
                state.lines.push(decode_line(&raw));
            } else {
                state.pending.push(b);
            }
        }
    }

    /// Flush a trailing fragment without newline as its own line.
    pub fn finish(&self) {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            let raw = std::mem::take(&mut state.pending);
            state.lines.push(decode_line(&raw));
        }
    }

    /// Snapshot of everything captured so far, including an unterminated tail.
    pub fn lines(&self) -> Vec<String> {
        let state = self.lock();
        let mut lines = state.lines.clone();
        if !state.pending.is_empty() {
            lines.push(decode_line(&state.pending));
        }
        lines
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.lines.is_empty() && state.pending.is_empty()
    }
}

impl Write for OutputCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decode one line of process output, dropping a trailing `\r`.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

thread_local! {
    static REDIRECTS: RefCell<Vec<OutputCapture>> = const { RefCell::new(Vec::new()) };
}

/// Guard that routes [`program_print`] / [`program_println`] into a capture.
///
/// Redirections nest; dropping a guard restores whatever was active before it,
/// including when the scope is left by a panic.
#[must_use = "output is only redirected while the guard is alive"]
pub struct ScopedRedirect {
    target: OutputCapture,
}

impl ScopedRedirect {
    pub fn install(target: OutputCapture) -> Self {
        REDIRECTS.with(|stack| stack.borrow_mut().push(target.clone()));
        Self { target }
    }
}

impl Drop for ScopedRedirect {
    fn drop(&mut self) {
        REDIRECTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack
                .iter()
                .rposition(|c| Arc::ptr_eq(&c.state, &self.target.state))
            {
                stack.remove(pos);
            }
        });
    }
}

/// Number of redirections active on the current thread.
pub fn redirect_depth() -> usize {
    REDIRECTS.with(|stack| stack.borrow().len())
}

fn active_sink() -> Option<OutputCapture> {
    REDIRECTS.with(|stack| stack.borrow().last().cloned())
}

/// Print through the active redirect, or to stdout when none is installed.
pub fn program_print(text: &str) {
    match active_sink() {
        Some(sink) => sink.write_bytes(text.as_bytes()),
        None => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

/// Like [`program_print`] with a trailing newline.
pub fn program_println(line: &str) {
    match active_sink() {
        Some(sink) => {
            sink.write_bytes(line.as_bytes());
            sink.write_bytes(b"\n");
        }
        None => println!("{line}"),
    }
}
