#![forbid(unsafe_code)]

//! `livejava`: compile and run a Java file every time it changes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use livejava_core::{CompileStrategy, SourceText};
use livejava_runner::{CompileAndRun, Config, ProcessRunner, Projection};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod terminal;
mod watch;

use crate::terminal::TerminalProjection;

#[derive(Parser, Debug)]
#[command(name = "livejava", version, about = "Live Java editor pipeline")]
struct Cli {
    /// Log filter (env-filter syntax). Defaults to RUST_LOG, then `info`.
    #[arg(long, global = true)]
    log: Option<String>,

    /// Project root holding `.livejava/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write `.livejava/livejava.toml` with default settings.
    Init {
        /// Replace an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Re-run FILE on every change until interrupted.
    Watch {
        file: PathBuf,
        /// How often FILE is checked for changes.
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Compile and run FILE once.
    Run {
        file: PathBuf,
        /// Print the RunResult or RunError as JSON.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Per-invocation overrides for values in the config file.
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    /// external | in_process
    #[arg(long)]
    strategy: Option<CompileStrategy>,
    #[arg(long)]
    workdir: Option<String>,
    /// 0 disables the timeout.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    debounce_ms: Option<u64>,
}

impl Overrides {
    fn apply(&self, cfg: &mut Config) {
        if let Some(strategy) = self.strategy {
            cfg.strategy = strategy;
        }
        if let Some(workdir) = &self.workdir {
            cfg.workdir = workdir.clone();
        }
        if let Some(secs) = self.timeout_secs {
            cfg.session.timeout_secs = Some(secs);
        }
        if let Some(ms) = self.debounce_ms {
            cfg.session.debounce_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Init { force } => {
            let path = Config::config_path(&cli.root);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default()
                .save_to(&path)
                .with_context(|| format!("write {}", path.display()))?;
            println!("Initialized livejava in {}", cli.root.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch {
            file,
            poll_ms,
            overrides,
        } => {
            let cfg = load_config(&cli.root, &overrides)?;
            watch::watch(&file, &cli.root, &cfg, Duration::from_millis(poll_ms)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { file, json, overrides } => {
            let cfg = load_config(&cli.root, &overrides)?;
            run_once(&file, &cli.root, &cfg, json).await
        }
    }
}

fn load_config(root: &Path, overrides: &Overrides) -> anyhow::Result<Config> {
    let mut cfg = Config::load_or_default(root).context("load config")?;
    overrides.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

async fn run_once(file: &Path, root: &Path, cfg: &Config, json: bool) -> anyhow::Result<ExitCode> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    let engine = cfg.build_engine(root, ProcessRunner::default())?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = engine.run_cycle(SourceText::from(text), cancel).await;
    let code = if outcome.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE };

    if json {
        let rendered = match &outcome {
            Ok(result) => serde_json::to_string_pretty(result)?,
            Err(error) => serde_json::to_string_pretty(error)?,
        };
        println!("{rendered}");
    } else {
        let mut ui = TerminalProjection::new(std::io::stdout().lock(), false);
        match &outcome {
            Ok(result) => ui.publish_result(result),
            Err(error) => ui.publish_error(error),
        }
        ui.clear_selection_and_scroll();
    }
    Ok(code)
}
