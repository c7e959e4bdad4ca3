use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use livejava_core::{extract_class_name, is_java_identifier, CycleError, RunError, RunResult, SourceText};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{OutputCapture, ScopedRedirect};
use crate::embedded::{EmbedContext, EmbeddedCompiler};
use crate::process::{describe_exit, ProcessRunner};

/// One compile-and-run attempt for a source snapshot.
///
/// Implementations must honour `cancel` at their own checkpoints; the session
/// discards the outcome of a cancelled cycle either way.
pub trait CompileAndRun: Send + Sync + 'static {
    fn run_cycle(
        &self,
        source: SourceText,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<RunResult, RunError>> + Send;
}

/// Argv prefixes for the two-process strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Invoked as `<compiler...> <Class>.java`.
    pub compiler: Vec<String>,
    /// Invoked as `<launcher...> <Class>`.
    pub launcher: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compiler: vec!["javac".into()],
            launcher: vec!["java".into()],
        }
    }
}

#[derive(Clone)]
pub enum Backend {
    /// Standalone compiler and launcher processes.
    External(Toolchain),
    /// Embedded compiler, `main` invoked directly.
    InProcess(Arc<dyn EmbeddedCompiler>),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::External(tc) => f.debug_tuple("External").field(tc).finish(),
            Backend::InProcess(_) => f.write_str("InProcess(..)"),
        }
    }
}

/// Writes the snapshot to `<workdir>/<Class>.java`, compiles it and runs it.
#[derive(Debug, Clone)]
pub struct CompileAndRunEngine {
    workdir: PathBuf,
    runner: ProcessRunner,
    backend: Backend,
    timeout: Option<Duration>,
}

impl CompileAndRunEngine {
    pub fn new(workdir: PathBuf, runner: ProcessRunner, backend: Backend) -> Self {
        Self {
            workdir,
            runner,
            backend,
            timeout: None,
        }
    }

    /// Give up on a cycle after `timeout`, killing whatever it spawned.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn source_path(&self, class_name: &str) -> PathBuf {
        self.workdir.join(format!("{class_name}.java"))
    }

    /// Persist the snapshot, replacing any earlier one for the same class.
    pub async fn write_source(&self, source: &SourceText, class_name: &str) -> Result<PathBuf, CycleError> {
        if !is_java_identifier(class_name) {
            return Err(CycleError::MalformedSource);
        }
        let path = self.source_path(class_name);
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|source| CycleError::Io {
                path: self.workdir.clone(),
                source,
            })?;
        tokio::fs::write(&path, source.as_bytes())
            .await
            .map_err(|source| CycleError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Write, compile and execute, appending all output to `capture`.
    pub async fn compile_and_run(
        &self,
        source: &SourceText,
        class_name: &str,
        capture: &OutputCapture,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let path = self.write_source(source, class_name).await?;
        checkpoint(cancel)?;
        match &self.backend {
            Backend::External(toolchain) => {
                self.run_external(toolchain, class_name, capture, cancel).await
            }
            Backend::InProcess(compiler) => {
                self.run_in_process(Arc::clone(compiler), path, class_name, capture, cancel)
                    .await
            }
        }
    }

    async fn run_external(
        &self,
        toolchain: &Toolchain,
        class_name: &str,
        capture: &OutputCapture,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let (program, args) = argv(&toolchain.compiler, format!("{class_name}.java"))?;
        let compile = self.runner.spawn(program, &args, &self.workdir)?;
        let status = compile.pipe_into(capture).await.map_err(|e| {
            warn!(class = %class_name, error = %e, "waiting for compiler failed");
            CycleError::Compile {
                class_name: class_name.to_string(),
                exit_code: None,
            }
        })?;
        if !status.success() {
            return Err(CycleError::Compile {
                class_name: class_name.to_string(),
                exit_code: status.code(),
            });
        }
        debug!(class = %class_name, "compiled");

        checkpoint(cancel)?;
        let (program, args) = argv(&toolchain.launcher, class_name.to_string())?;
        let run = self.runner.spawn(program, &args, &self.workdir)?;
        let status = run.pipe_into(capture).await.map_err(|e| CycleError::Runtime {
            class_name: class_name.to_string(),
            detail: format!("wait failed: {e}"),
        })?;
        if !status.success() {
            return Err(CycleError::Runtime {
                class_name: class_name.to_string(),
                detail: describe_exit(&status),
            });
        }
        Ok(())
    }

    async fn run_in_process(
        &self,
        compiler: Arc<dyn EmbeddedCompiler>,
        source_file: PathBuf,
        class_name: &str,
        capture: &OutputCapture,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let ctx = EmbedContext {
            runner: self.runner.clone(),
            workdir: self.workdir.clone(),
            runtime: tokio::runtime::Handle::current(),
            cancel: cancel.clone(),
        };
        let sink = capture.clone();
        let class = class_name.to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let _redirect = ScopedRedirect::install(sink);
            let program = compiler.compile(&ctx, &source_file, &class)?;
            debug!(class = %class, "loaded");
            program.run_main(&ctx)
        })
        .await;

        match joined {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(CycleError::Runtime {
                class_name: class_name.to_string(),
                detail: panic_message(e.into_panic()),
            }),
            Err(e) => Err(CycleError::Runtime {
                class_name: class_name.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

impl CompileAndRun for CompileAndRunEngine {
    async fn run_cycle(&self, source: SourceText, cancel: CancellationToken) -> Result<RunResult, RunError> {
        let started = Instant::now();
        let class_name = extract_class_name(source.as_str()).map_err(|e| e.into_run_error(None, Vec::new()))?;

        // Scoped to this cycle so timing out never cancels the caller's token.
        let cycle_cancel = cancel.child_token();
        let capture = OutputCapture::new();
        let work = self.compile_and_run(&source, &class_name, &capture, &cycle_cancel);

        let outcome = tokio::select! {
            res = work => res,
            _ = cycle_cancel.cancelled() => Err(CycleError::Cancelled),
            _ = deadline(self.timeout) => Err(CycleError::TimedOut {
                secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
        };
        // Anything still running for this cycle (in-process backends included)
        // stops at its next checkpoint.
        cycle_cancel.cancel();
        capture.finish();

        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                info!(
                    class = %class_name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    lines = capture.len(),
                    "cycle succeeded"
                );
                Ok(RunResult {
                    class_name,
                    output_lines: capture.lines(),
                    elapsed,
                })
            }
            Err(e) => {
                debug!(class = %class_name, error = %e, "cycle failed");
                Err(e.into_run_error(Some(class_name), capture.lines()))
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), CycleError> {
    if cancel.is_cancelled() {
        Err(CycleError::Cancelled)
    } else {
        Ok(())
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

fn argv(prefix: &[String], last: String) -> Result<(&str, Vec<String>), CycleError> {
    let (program, rest) = prefix.split_first().ok_or_else(|| CycleError::ProcessSpawn {
        program: String::new(),
        source: std::io::Error::other("command is empty"),
    })?;
    let mut args = rest.to_vec();
    args.push(last);
    Ok((program.as_str(), args))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
