//! Latest-edit-wins scheduling of compile-and-run cycles.
//!
//! Every edit mints a new [`ChangeToken`], cancels the previous cycle, sweeps
//! all tracked processes and starts a fresh worker. A cycle's outcome reaches
//! the [`Projection`] only if its token is still current at each hand-off:
//! before spawning, before sending to the UI task, and in
//! [`EditSession::reconcile`] on the UI task itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use livejava_core::{new_ulid, ChangeToken, RunError, RunResult, SourceText, Ulid};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::CompileAndRun;
use crate::tracker::{ProcessTracker, Sweep};

/// Rendering surface fed by the session. Called only from the UI task.
pub trait Projection {
    fn publish_result(&mut self, result: &RunResult);
    fn publish_error(&mut self, error: &RunError);
    fn clear_selection_and_scroll(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running(ChangeToken),
    /// A newer edit arrived while this cycle was running.
    Superseded(ChangeToken),
    Completed(ChangeToken),
}

/// Result of one cycle, tagged with the edit that produced it.
#[derive(Debug)]
pub struct CycleOutcome {
    pub token: ChangeToken,
    pub result: Result<RunResult, RunError>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Quiet period before a cycle starts; newer edits restart it.
    pub debounce: Duration,
    /// How long a new cycle waits for swept processes to die.
    pub kill_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::ZERO,
            kill_grace: Duration::from_secs(2),
        }
    }
}

pub struct EditSession<E> {
    id: Ulid,
    engine: Arc<E>,
    tracker: ProcessTracker,
    generation: Arc<AtomicU64>,
    active: Option<CancellationToken>,
    state: SessionState,
    options: SessionOptions,
    outcomes: mpsc::UnboundedSender<CycleOutcome>,
}

impl<E: CompileAndRun> EditSession<E> {
    /// Create a session plus the receiver the UI task drains outcomes from.
    pub fn new(
        engine: Arc<E>,
        tracker: ProcessTracker,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<CycleOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: new_ulid(),
            engine,
            tracker,
            generation: Arc::new(AtomicU64::new(ChangeToken::INITIAL.0)),
            active: None,
            state: SessionState::Idle,
            options,
            outcomes,
        };
        (session, rx)
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_token(&self) -> ChangeToken {
        ChangeToken(self.generation.load(Ordering::SeqCst))
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Handle a "source changed" event. Must be called inside a tokio runtime.
    pub fn source_changed(&mut self, text: impl Into<SourceText>) -> ChangeToken {
        let token = ChangeToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1);

        if let Some(previous) = self.active.take() {
            previous.cancel();
        }
        if let SessionState::Running(old) = self.state {
            self.state = SessionState::Superseded(old);
            debug!(session = %self.id, token = %old, "superseded");
        }
        // The previous cycle's pids may not be known yet, so kill everything.
        let sweep = self.tracker.sweep();

        let cancel = CancellationToken::new();
        self.active = Some(cancel.clone());
        self.state = SessionState::Running(token);
        debug!(session = %self.id, token = %token, swept = sweep.len(), "cycle scheduled");

        tokio::spawn(drive_cycle(Worker {
            session: self.id,
            engine: Arc::clone(&self.engine),
            source: text.into(),
            token,
            generation: Arc::clone(&self.generation),
            cancel,
            sweep,
            options: self.options.clone(),
            outcomes: self.outcomes.clone(),
        }));
        token
    }

    /// Publish `outcome` if it belongs to the latest edit. Returns whether it did.
    pub fn reconcile<P>(&mut self, outcome: CycleOutcome, projection: &mut P) -> bool
    where
        P: Projection + ?Sized,
    {
        let current = self.current_token();
        if outcome.token != current {
            debug!(session = %self.id, token = %outcome.token, current = %current, "discarding stale outcome");
            return false;
        }

        self.state = SessionState::Completed(outcome.token);
        self.active = None;
        match &outcome.result {
            Ok(result) => projection.publish_result(result),
            Err(error) => {
                info!(session = %self.id, token = %outcome.token, kind = ?error.kind, error = %error, "cycle failed");
                projection.publish_error(error);
            }
        }
        projection.clear_selection_and_scroll();
        true
    }

    /// Cancel the running cycle and kill every tracked process.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
        // Invalidate anything still in flight.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let sweep = self.tracker.sweep();
        let killed = sweep.wait(self.options.kill_grace).await;
        info!(session = %self.id, killed, "session shut down");
        self.state = SessionState::Idle;
    }
}

struct Worker<E> {
    session: Ulid,
    engine: Arc<E>,
    source: SourceText,
    token: ChangeToken,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
    sweep: Sweep,
    options: SessionOptions,
    outcomes: mpsc::UnboundedSender<CycleOutcome>,
}

impl<E> Worker<E> {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.generation.load(Ordering::SeqCst) == self.token.0
    }
}

async fn drive_cycle<E: CompileAndRun>(mut worker: Worker<E>) {
    let sweep = std::mem::take(&mut worker.sweep);
    if !sweep.is_empty() {
        let swept = sweep.len();
        let confirmed = sweep.wait(worker.options.kill_grace).await;
        debug!(
            session = %worker.session,
            token = %worker.token,
            swept,
            confirmed,
            "previous processes terminated"
        );
    }

    if !worker.options.debounce.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(worker.options.debounce) => {}
            _ = worker.cancel.cancelled() => {}
        }
    }

    if !worker.is_current() {
        debug!(session = %worker.session, token = %worker.token, "superseded before spawning");
        return;
    }

    let result = worker
        .engine
        .run_cycle(worker.source.clone(), worker.cancel.clone())
        .await;

    if !worker.is_current() {
        debug!(session = %worker.session, token = %worker.token, "superseded before publishing");
        return;
    }
    let _ = worker.outcomes.send(CycleOutcome {
        token: worker.token,
        result,
    });
}
