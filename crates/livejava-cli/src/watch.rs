use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use livejava_runner::{Config, EditSession, ProcessRunner, ProcessTracker};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::terminal::TerminalProjection;

/// The live editor loop. Every content change of `file` is a new edit; the
/// file is also run once on start. Returns after Ctrl-C, once every
/// tracked process is gone.
pub async fn watch(file: &Path, root: &Path, cfg: &Config, poll: Duration) -> anyhow::Result<()> {
    let tracker = ProcessTracker::new();
    let engine = cfg.build_engine(root, ProcessRunner::new(tracker.clone()))?;
    let (mut session, mut outcomes) = EditSession::new(Arc::new(engine), tracker, cfg.session_options());
    let mut ui = TerminalProjection::new(std::io::stdout(), true);

    let mut last = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    info!(session = %session.id(), file = %file.display(), strategy = %cfg.strategy, "watching");
    session.source_changed(last.as_str());

    let mut ticks = tokio::time::interval(poll);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                break;
            }
            Some(outcome) = outcomes.recv() => {
                session.reconcile(outcome, &mut ui);
            }
            _ = ticks.tick() => match tokio::fs::read_to_string(file).await {
                Ok(text) if text != last => {
                    last = text;
                    let token = session.source_changed(last.as_str());
                    debug!(token = %token, "source changed");
                }
                Ok(_) => {}
                Err(e) => warn!(file = %file.display(), error = %e, "read failed"),
            },
        }
    }

    session.shutdown().await;
    Ok(())
}
