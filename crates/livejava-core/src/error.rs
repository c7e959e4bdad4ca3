//! Failure taxonomy for a compile-and-run cycle.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ErrorKind, RunError};

/// Everything that can end a compile-and-run cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    /// No `class <Name>` declaration found.
    #[error("no public class declaration found in source")]
    MalformedSource,

    /// Writing the source snapshot failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The program could not be launched.
    #[error("failed to launch '{program}': {source}")]
    ProcessSpawn {
        /// Program name as configured.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The compiler reported errors.
    #[error("compilation of {class_name} failed{}", exit_suffix(.exit_code))]
    Compile {
        /// Class being compiled.
        class_name: String,
        /// Compiler exit code, if it exited normally.
        exit_code: Option<i32>,
    },

    /// The program failed at runtime.
    #[error("{class_name} failed: {detail}")]
    Runtime {
        /// Class being executed.
        class_name: String,
        /// Exit status or panic message.
        detail: String,
    },

    /// The cycle ran past its deadline.
    #[error("timed out after {secs}s")]
    TimedOut {
        /// Configured limit.
        secs: u64,
    },

    /// Superseded by a newer edit.
    #[error("cancelled by a newer edit")]
    Cancelled,
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {c})"),
        None => String::new(),
    }
}

impl CycleError {
    /// Category used by the UI.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CycleError::MalformedSource => ErrorKind::MalformedSource,
            CycleError::Io { .. } => ErrorKind::Io,
            CycleError::ProcessSpawn { .. } => ErrorKind::ProcessSpawn,
            CycleError::Compile { .. } => ErrorKind::Compile,
            CycleError::Runtime { .. } => ErrorKind::Runtime,
            CycleError::TimedOut { .. } => ErrorKind::TimedOut,
            CycleError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Convert into the UI-facing error, keeping whatever output was captured.
    pub fn into_run_error(self, class_name: Option<String>, partial_output: Vec<String>) -> RunError {
        RunError {
            kind: self.kind(),
            message: self.to_string(),
            partial_output,
            class_name,
        }
    }
}
