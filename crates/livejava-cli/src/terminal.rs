use std::io::{self, Write};

use livejava_core::{ErrorKind, RunError, RunResult};
use livejava_runner::Projection;
use tracing::warn;

/// Left status label when no public class could be found.
const NO_PUBLIC_CLASS: &str = "no public class";

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Renders cycle outcomes as an output panel with a status line underneath.
pub struct TerminalProjection<W: Write> {
    out: W,
    clear_screen: bool,
    class_label: String,
    status_label: String,
    panel: Vec<String>,
}

impl<W: Write> TerminalProjection<W> {
    /// With `clear_screen`, each publish repaints the terminal.
    pub fn new(out: W, clear_screen: bool) -> Self {
        Self {
            out,
            clear_screen,
            class_label: String::new(),
            status_label: String::new(),
            panel: Vec::new(),
        }
    }

    fn render(&mut self) -> io::Result<()> {
        if self.clear_screen {
            self.out.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        for line in &self.panel {
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out, "-- {} | {}", self.class_label, self.status_label)
    }

    fn repaint(&mut self) {
        if let Err(e) = self.render() {
            warn!(error = %e, "terminal write failed");
        }
    }
}

#[cfg(test)]
impl<W: Write> TerminalProjection<W> {
    fn class_label(&self) -> &str {
        &self.class_label
    }

    fn status_label(&self) -> &str {
        &self.status_label
    }

    fn panel(&self) -> &[String] {
        &self.panel
    }

    fn into_inner(self) -> W {
        self.out
    }
}

fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MalformedSource => "malformed source",
        ErrorKind::Io => "write failed",
        ErrorKind::ProcessSpawn => "launch failed",
        ErrorKind::Compile => "compile error",
        ErrorKind::Runtime => "runtime error",
        ErrorKind::TimedOut => "timed out",
        ErrorKind::Cancelled => "cancelled",
    }
}

impl<W: Write> Projection for TerminalProjection<W> {
    fn publish_result(&mut self, result: &RunResult) {
        self.panel = result.output_lines.clone();
        self.class_label = result.class_name.clone();
        self.status_label = format!("Took {}ms", result.elapsed.as_millis());
        self.repaint();
    }

    fn publish_error(&mut self, error: &RunError) {
        self.panel = error.partial_output.clone();
        self.panel.push(format!("error: {}", error.message));
        self.class_label = match (&error.class_name, error.kind) {
            (Some(name), _) => name.clone(),
            (None, ErrorKind::MalformedSource) => NO_PUBLIC_CLASS.to_string(),
            (None, _) => std::mem::take(&mut self.class_label),
        };
        self.status_label = error_label(error.kind).to_string();
        self.repaint();
    }

    // A terminal has no selection; flushing leaves the view at the bottom.
    fn clear_selection_and_scroll(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!(error = %e, "terminal flush failed");
        }
    }
}
