//! Value types shared by the pipeline and its front-ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable snapshot of the editor contents taken when a cycle is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText(Arc<str>);

impl SourceText {
    /// Snapshot the given text.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// Borrow the snapshot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes, as written to `<Class>.java`.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for SourceText {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SourceText {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Generation of work minted once per edit.
///
/// Tokens are strictly increasing within a session; a cycle's outcome is only
/// valid while its token is still the session's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeToken(pub u64);

impl ChangeToken {
    /// Token value before any edit was seen.
    pub const INITIAL: ChangeToken = ChangeToken(0);

    /// The next generation.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Successful outcome of one compile-and-run cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Public class resolved from the source.
    pub class_name: String,
    /// Combined compiler and program output, in arrival order.
    pub output_lines: Vec<String>,
    /// Wall-clock time for the whole cycle.
    pub elapsed: Duration,
}

/// Failure category of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No public class name could be extracted.
    MalformedSource,
    /// The snapshot could not be persisted.
    Io,
    /// The compiler or launcher could not be started.
    ProcessSpawn,
    /// The compiler rejected the source.
    Compile,
    /// The program failed while running.
    Runtime,
    /// The cycle exceeded the configured timeout.
    TimedOut,
    /// A newer edit superseded the cycle. Never shown to the user.
    Cancelled,
}

/// Failed outcome of one cycle. Mutually exclusive with [`RunResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: String,
    /// Output captured up to the failure point.
    pub partial_output: Vec<String>,
    /// Class name, when extraction got that far.
    #[serde(default)]
    pub class_name: Option<String>,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RunError {}

/// How sources are compiled and executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStrategy {
    /// Separate compiler and launcher processes.
    #[default]
    External,
    /// Embedded compiler that loads and runs `main` directly.
    InProcess,
}

impl fmt::Display for CompileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileStrategy::External => f.write_str("external"),
            CompileStrategy::InProcess => f.write_str("in_process"),
        }
    }
}

impl std::str::FromStr for CompileStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external" => Ok(Self::External),
            "in_process" | "in-process" => Ok(Self::InProcess),
            other => Err(format!("unknown compile strategy '{other}' (expected external|in_process)")),
        }
    }
}
