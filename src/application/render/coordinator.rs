//! Render coordinator for one preview surface.
//!
//! The coordinator is an actor: a single task owns the cache, the pipeline
//! state and the retry bookkeeping, and reacts to one event at a time:
//!
//! - `Edited` applies a change to the latest request and (re)starts the
//!   debounce window.
//! - `DebounceExpired` asks for a run with whatever the latest request is.
//! - `ForceRetry` bypasses the cache entry for the latest request, rate limited.
//! - `RunCompleted` caches and publishes the result of a backend run.
//!
//! Backend calls run on spawned tasks so edits keep arriving while a run is in
//! flight; the concurrency guard rejects any second run until it completes.

use std::{fmt, num::NonZeroUsize, str::FromStr, sync::Arc, time::Duration};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::backend::BackendDispatcher;
use super::cache::{DEFAULT_CACHE_CAPACITY, RenderCache};
use super::fingerprint::Fingerprint;
use super::publish::{PipelineState, PreviewSnapshot, RenderConsumer, ResultPublisher};
use super::retry::{DEFAULT_MANUAL_RETRY_COOLDOWN, ManualRetryController};
use super::runtime::{ActiveRun, CompletedRun, ConcurrencyGuard, RunGuard, RunTrigger};
use super::types::{Dialect, RenderOutcome, RenderRequest, Theme, UnknownVariant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

const METRIC_RENDER_MS: &str = "ritratto_render_ms";
const METRIC_DROPPED: &str = "ritratto_render_dropped_total";
const METRIC_RETRY_THROTTLED: &str = "ritratto_render_manual_retry_throttled_total";
const METRIC_STALE_SUPPRESSED: &str = "ritratto_render_stale_suppressed_total";

/// What to do with the result of a run that newer edits have superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Cache it, but only publish results of runs that saw the newest edit.
    #[default]
    Suppress,
    /// Publish every completed run, even if a newer edit is pending.
    Publish,
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StalePolicy::Suppress => "suppress",
            StalePolicy::Publish => "publish",
        })
    }
}

impl FromStr for StalePolicy {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suppress" => Ok(StalePolicy::Suppress),
            "publish" => Ok(StalePolicy::Publish),
            _ => Err(UnknownVariant {
                kind: "stale result policy",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub debounce: Duration,
    pub cache_capacity: NonZeroUsize,
    pub manual_retry_cooldown: Duration,
    pub stale_results: StalePolicy,
    /// State the surface starts with, before the first edit.
    pub initial: RenderRequest,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            cache_capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            manual_retry_cooldown: DEFAULT_MANUAL_RETRY_COOLDOWN,
            stale_results: StalePolicy::default(),
            initial: RenderRequest::default(),
        }
    }
}

impl From<&crate::config::RenderSettings> for CoordinatorSettings {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            debounce: settings.debounce,
            cache_capacity: settings.cache_capacity,
            manual_retry_cooldown: settings.manual_retry_cooldown,
            stale_results: settings.stale_results,
            initial: RenderRequest::new(String::new(), settings.local_dialect, settings.default_theme),
        }
    }
}

/// A change to the observed `(source, dialect, theme)` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Replace(RenderRequest),
    Source(String),
    Dialect(Dialect),
    Theme(Theme),
}

#[derive(Debug)]
pub(crate) enum CoordinatorEvent {
    Edited(Edit),
    DebounceExpired,
    ForceRetry,
    RunCompleted(CompletedRun),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("render coordinator has shut down")]
pub struct CoordinatorClosed;

/// Cloneable front door to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<CoordinatorEvent>,
    snapshots: watch::Receiver<PreviewSnapshot>,
}

impl CoordinatorHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn edit(&self, request: RenderRequest) -> Result<(), CoordinatorClosed> {
        self.send(CoordinatorEvent::Edited(Edit::Replace(request)))
    }

    pub fn set_source(&self, source: impl Into<String>) -> Result<(), CoordinatorClosed> {
        self.send(CoordinatorEvent::Edited(Edit::Source(source.into())))
    }

    pub fn set_dialect(&self, dialect: Dialect) -> Result<(), CoordinatorClosed> {
        self.send(CoordinatorEvent::Edited(Edit::Dialect(dialect)))
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), CoordinatorClosed> {
        self.send(CoordinatorEvent::Edited(Edit::Theme(theme)))
    }

    /// Re-render the current state bypassing its cache entry. Calls inside
    /// the cooldown window are ignored.
    pub fn force_retry(&self) -> Result<(), CoordinatorClosed> {
        self.send(CoordinatorEvent::ForceRetry)
    }

    pub fn snapshot(&self) -> PreviewSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewSnapshot> {
        self.snapshots.clone()
    }

    /// Stop accepting edits, let any in-flight run publish, then wait for the
    /// coordinator task to exit. Other handles see [`CoordinatorClosed`].
    pub async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.send(CoordinatorEvent::Shutdown(ack_tx)).is_ok() && ack_rx.await.is_ok() {
            return;
        }

        // Another handle already started the shutdown; the snapshot sender
        // is dropped when the task exits.
        let mut snapshots = self.snapshots;
        while snapshots.changed().await.is_ok() {}
    }

    fn send(&self, event: CoordinatorEvent) -> Result<(), CoordinatorClosed> {
        self.commands.send(event).map_err(|_| CoordinatorClosed)
    }
}

pub struct RenderCoordinator {
    settings: CoordinatorSettings,
    dispatcher: BackendDispatcher,
    cache: RenderCache,
    guard: ConcurrencyGuard,
    retry: ManualRetryController,
    publisher: ResultPublisher,
    latest: RenderRequest,
    /// Incremented on every edit.
    revision: u64,
    debounce_deadline: Option<Instant>,
    next_run_id: u64,
    completions: mpsc::UnboundedSender<CompletedRun>,
    closing: bool,
    shutdown_acks: Vec<oneshot::Sender<()>>,
}

impl RenderCoordinator {
    /// Start a coordinator on the current tokio runtime.
    ///
    /// The task exits after [`CoordinatorHandle::shutdown`] or once every
    /// handle is dropped, in both cases only after any in-flight run has
    /// reported back.
    pub fn spawn(
        settings: CoordinatorSettings,
        dispatcher: BackendDispatcher,
        consumer: Arc<dyn RenderConsumer>,
    ) -> CoordinatorHandle {
        let id = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (publisher, snapshots) = ResultPublisher::new(consumer);

        let coordinator = Self {
            cache: RenderCache::new(settings.cache_capacity),
            retry: ManualRetryController::new(settings.manual_retry_cooldown),
            latest: settings.initial.clone(),
            settings,
            dispatcher,
            guard: ConcurrencyGuard::default(),
            publisher,
            revision: 0,
            debounce_deadline: None,
            next_run_id: 1,
            completions: completions_tx,
            closing: false,
            shutdown_acks: Vec::new(),
        };

        let span = info_span!("render_coordinator", coordinator_id = %id);
        tokio::spawn(
            coordinator
                .run(commands_rx, completions_rx)
                .instrument(span),
        );

        CoordinatorHandle {
            id,
            commands: commands_tx,
            snapshots,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CoordinatorEvent>,
        mut completions: mpsc::UnboundedReceiver<CompletedRun>,
    ) {
        info!(
            op = "coordinator::run",
            debounce_ms = self.settings.debounce.as_millis() as u64,
            cache_capacity = self.settings.cache_capacity.get(),
            stale_results = %self.settings.stale_results,
            local_dialect = %self.dispatcher.local_dialect(),
            "Render coordinator started"
        );

        loop {
            if self.closing && !self.guard.is_running() {
                break;
            }

            let deadline = self.debounce_deadline;
            let event = tokio::select! {
                command = commands.recv(), if !self.closing => match command {
                    Some(event) => event,
                    None => {
                        self.begin_shutdown();
                        continue;
                    }
                },
                Some(completed) = completions.recv() => CoordinatorEvent::RunCompleted(completed),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    CoordinatorEvent::DebounceExpired
                }
            };

            self.handle(event);
            if self.closing {
                commands.close();
            }
        }

        self.publisher.set_state(PipelineState::Idle);
        info!(op = "coordinator::run", "Render coordinator stopped");
        for ack in self.shutdown_acks.drain(..) {
            let _ = ack.send(());
        }
    }

    fn begin_shutdown(&mut self) {
        self.closing = true;
        self.debounce_deadline = None;
    }

    fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Edited(edit) => self.on_edited(edit),
            CoordinatorEvent::DebounceExpired => {
                self.debounce_deadline = None;
                self.start_run(RunTrigger::Debounce);
            }
            CoordinatorEvent::ForceRetry => self.on_force_retry(),
            CoordinatorEvent::RunCompleted(completed) => self.on_run_completed(completed),
            CoordinatorEvent::Shutdown(ack) => {
                info!(
                    op = "coordinator::shutdown",
                    draining = self.guard.is_running(),
                    "Shutdown requested"
                );
                self.shutdown_acks.push(ack);
                self.begin_shutdown();
            }
        }
        self.publisher.set_state(self.state());
    }

    fn state(&self) -> PipelineState {
        if self.guard.is_running() {
            PipelineState::Running
        } else if self.debounce_deadline.is_some() {
            PipelineState::Debouncing
        } else {
            PipelineState::Idle
        }
    }

    fn on_edited(&mut self, edit: Edit) {
        match edit {
            Edit::Replace(request) => self.latest = request,
            Edit::Source(source) => self.latest.source = source,
            Edit::Dialect(dialect) => self.latest.dialect = dialect,
            Edit::Theme(theme) => self.latest.theme = theme,
        }
        self.revision += 1;
        self.debounce_deadline = Some(Instant::now() + self.settings.debounce);
        debug!(
            op = "coordinator::edit",
            revision = self.revision,
            dialect = %self.latest.dialect,
            theme = %self.latest.theme,
            "Edit received; debounce restarted"
        );
    }

    fn on_force_retry(&mut self) {
        if let Err(throttled) = self.retry.try_acquire(Instant::now()) {
            counter!(METRIC_RETRY_THROTTLED).increment(1);
            info!(
                op = "coordinator::force_retry",
                result = "throttled",
                remaining_ms = throttled.remaining.as_millis() as u64,
                "Manual retry ignored during cooldown"
            );
            return;
        }

        let fingerprint = Fingerprint::of(&self.latest);
        let bypassed = self.cache.remove(&fingerprint);
        info!(
            op = "coordinator::force_retry",
            result = "accepted",
            fingerprint = %fingerprint,
            bypassed,
            "Manual retry accepted"
        );
        self.start_run(RunTrigger::ManualRetry);
    }

    fn start_run(&mut self, trigger: RunTrigger) {
        if self.closing {
            return;
        }

        let run_id = self.next_run_id;
        let fingerprint = Fingerprint::of(&self.latest);
        let active = ActiveRun {
            run_id,
            revision: self.revision,
            trigger,
        };
        if let Err(err) = self.guard.acquire(active) {
            counter!(METRIC_DROPPED).increment(1);
            debug!(
                op = "coordinator::start_run",
                result = "dropped",
                trigger = trigger.as_str(),
                error = %err,
                "Render request dropped while another run is in flight"
            );
            return;
        }
        self.next_run_id += 1;

        if let Some(artifact) = self.cache.get(&fingerprint).map(str::to_owned) {
            self.guard.release(run_id);
            debug!(
                op = "coordinator::start_run",
                result = "cache_hit",
                trigger = trigger.as_str(),
                fingerprint = %fingerprint,
                "Render served from cache"
            );
            self.publisher.publish(RenderOutcome::artifact(artifact));
            return;
        }

        debug!(
            op = "coordinator::start_run",
            result = "cache_miss",
            run_id,
            trigger = trigger.as_str(),
            fingerprint = %fingerprint,
            "Starting backend run"
        );

        let dispatcher = self.dispatcher.clone();
        let request = self.latest.clone();
        let guard = RunGuard::new(run_id, fingerprint, self.completions.clone());
        let span = info_span!("render_run", run_id, trigger = trigger.as_str());
        tokio::spawn(
            async move {
                let result = dispatcher.dispatch(&request).await;
                guard.finish(result);
            }
            .instrument(span),
        );
    }

    fn on_run_completed(&mut self, completed: CompletedRun) {
        let Some(run) = self.guard.release(completed.run_id) else {
            warn!(
                op = "coordinator::run_completed",
                run_id = completed.run_id,
                "Completion for unknown run ignored"
            );
            return;
        };

        let elapsed_ms = completed.elapsed.as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS).record(elapsed_ms);

        if let Ok(artifact) = &completed.result {
            self.cache.put(completed.fingerprint.clone(), artifact.clone());
        }

        let stale = run.revision != self.revision;
        if stale && self.settings.stale_results == StalePolicy::Suppress {
            counter!(METRIC_STALE_SUPPRESSED).increment(1);
            info!(
                op = "coordinator::run_completed",
                result = "stale_suppressed",
                run_id = run.run_id,
                run_revision = run.revision,
                latest_revision = self.revision,
                "Result of superseded run not published"
            );
        } else {
            let outcome = match completed.result {
                Ok(artifact) => {
                    info!(
                        op = "coordinator::run_completed",
                        result = "ok",
                        run_id = run.run_id,
                        trigger = run.trigger.as_str(),
                        elapsed_ms = elapsed_ms as u64,
                        stale,
                        "Render run succeeded"
                    );
                    RenderOutcome::artifact(artifact)
                }
                Err(err) => {
                    warn!(
                        op = "coordinator::run_completed",
                        result = "error",
                        run_id = run.run_id,
                        trigger = run.trigger.as_str(),
                        elapsed_ms = elapsed_ms as u64,
                        error_code = err.code(),
                        error = %err,
                        stale,
                        "Render run failed"
                    );
                    RenderOutcome::error(err.to_string())
                }
            };
            self.publisher.publish(outcome);
        }

        // The debounce expiry for the newer edits was dropped while this run
        // held the guard; nothing else would render them.
        if stale && self.debounce_deadline.is_none() {
            self.start_run(RunTrigger::CatchUp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_policy_parses() {
        assert_eq!("Suppress".parse::<StalePolicy>(), Ok(StalePolicy::Suppress));
        assert_eq!("publish".parse::<StalePolicy>(), Ok(StalePolicy::Publish));
        assert!("latest".parse::<StalePolicy>().is_err());
    }

    #[test]
    fn default_settings_match_reference_values() {
        let settings = CoordinatorSettings::default();
        assert_eq!(settings.debounce, Duration::from_millis(300));
        assert_eq!(settings.cache_capacity.get(), 20);
        assert_eq!(settings.manual_retry_cooldown, Duration::from_millis(5_000));
        assert_eq!(settings.stale_results, StalePolicy::Suppress);
    }
}
