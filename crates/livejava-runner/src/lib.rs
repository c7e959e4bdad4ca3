//! Incremental compile-and-run pipeline behind the live Java editor.

pub mod capture;
pub mod config;
pub mod embedded;
pub mod engine;
#[cfg(feature = "jvm")]
pub mod jvm;
pub mod process;
pub mod session;
pub mod tracker;

pub use capture::{program_print, program_println, OutputCapture, ScopedRedirect};
pub use config::*;
pub use embedded::{EmbedContext, EmbeddedCompiler, LoadedProgram, SourceLauncher};
pub use engine::{Backend, CompileAndRun, CompileAndRunEngine, Toolchain};
#[cfg(feature = "jvm")]
pub use jvm::JvmCompiler;
pub use process::{describe_exit, ProcessLines, ProcessRunner};
pub use session::{CycleOutcome, EditSession, Projection, SessionOptions, SessionState};
pub use tracker::{terminate_process_tree, ProcessTracker, Sweep, TrackedProcess};
