//! Embedded compiler seam used by the in-process strategy.
//!
//! An [`EmbeddedCompiler`] turns a source file into a [`LoadedProgram`] whose
//! `main` is then invoked directly. Both calls run on a blocking thread with
//! program output redirected into the cycle's capture.

use std::path::{Path, PathBuf};

use livejava_core::CycleError;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::capture::program_println;
use crate::process::{describe_exit, ProcessRunner};

/// What an embedded compiler may use while compiling and running.
#[derive(Debug, Clone)]
pub struct EmbedContext {
    pub runner: ProcessRunner,
    pub workdir: PathBuf,
    pub runtime: Handle,
    pub cancel: CancellationToken,
}

pub trait EmbeddedCompiler: Send + Sync {
    /// Compile `source_file` and load `class_name` from the result.
    fn compile(
        &self,
        ctx: &EmbedContext,
        source_file: &Path,
        class_name: &str,
    ) -> Result<Box<dyn LoadedProgram>, CycleError>;
}

pub trait LoadedProgram: Send {
    /// Invoke the program's `main(String[])`.
    fn run_main(&self, ctx: &EmbedContext) -> Result<(), CycleError>;
}

/// Marker the JDK source launcher prints when in-memory compilation fails.
const COMPILATION_FAILED: &str = "error: compilation failed";

/// Backend built on the JDK single-file source launcher.
///
/// `java [-cp <library>] <Class>.java` compiles in memory and invokes `main`
/// inside one JVM.
#[derive(Debug, Clone)]
pub struct SourceLauncher {
    launcher: Vec<String>,
    classpath: Option<PathBuf>,
}

impl SourceLauncher {
    pub fn new(launcher: Vec<String>, classpath: Option<PathBuf>) -> Self {
        Self { launcher, classpath }
    }
}

impl SourceLauncher {
    fn command_for(&self, source_file: &Path, class_name: &str) -> Option<(String, Vec<String>)> {
        let (program, prefix) = self.launcher.split_first()?;
        let mut args = prefix.to_vec();
        if let Some(cp) = &self.classpath {
            args.push("-cp".into());
            args.push(cp.display().to_string());
        }
        let file_name = source_file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{class_name}.java"));
        args.push(file_name);
        Some((program.clone(), args))
    }
}

impl EmbeddedCompiler for SourceLauncher {
    // Compilation happens in memory when the launcher starts, so this only
    // prepares the invocation.
    fn compile(
        &self,
        _ctx: &EmbedContext,
        source_file: &Path,
        class_name: &str,
    ) -> Result<Box<dyn LoadedProgram>, CycleError> {
        let (program, args) =
            self.command_for(source_file, class_name)
                .ok_or_else(|| CycleError::ProcessSpawn {
                    program: String::new(),
                    source: std::io::Error::other("launcher command is empty"),
                })?;
        Ok(Box::new(LaunchedSource {
            program,
            args,
            class_name: class_name.to_string(),
        }))
    }
}

struct LaunchedSource {
    program: String,
    args: Vec<String>,
    class_name: String,
}

impl LoadedProgram for LaunchedSource {
    fn run_main(&self, ctx: &EmbedContext) -> Result<(), CycleError> {
        ctx.runtime.block_on(async {
            let mut lines = ctx.runner.spawn(&self.program, &self.args, &ctx.workdir)?;
            let mut compile_failed = false;
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Some(line) => {
                            compile_failed |= line.trim_start().starts_with(COMPILATION_FAILED);
                            program_println(&line);
                        }
                        None => break,
                    },
                    _ = ctx.cancel.cancelled() => return Err(CycleError::Cancelled),
                }
            }
            let status = lines.wait().await.map_err(|e| CycleError::Runtime {
                class_name: self.class_name.clone(),
                detail: format!("wait failed: {e}"),
            })?;
            if status.success() {
                Ok(())
            } else if compile_failed {
                Err(CycleError::Compile {
                    class_name: self.class_name.clone(),
                    exit_code: status.code(),
                })
            } else {
                Err(CycleError::Runtime {
                    class_name: self.class_name.clone(),
                    detail: describe_exit(&status),
                })
            }
        })
    }
}

/// Resolve a library path against the directory holding the running executable.
pub fn resolve_from_install_dir(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| std::io::Error::other("executable has no parent directory"))?;
    Ok(dir.join(path))
}
