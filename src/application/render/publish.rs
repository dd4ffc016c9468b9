use std::{fmt, sync::Arc};

use tokio::sync::watch;
use tracing::info;

use super::types::RenderOutcome;

/// Receives the result of every completed run.
///
/// `on_error(None)` clears a previously reported error and is only sent when
/// one was showing.
pub trait RenderConsumer: Send + Sync {
    fn on_error(&self, message: Option<&str>);
    fn on_artifact_ready(&self, artifact: &str);
}

/// Consumer for callers that only watch [`PreviewSnapshot`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsumer;

impl RenderConsumer for NoopConsumer {
    fn on_error(&self, _message: Option<&str>) {}

    fn on_artifact_ready(&self, _artifact: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Debouncing,
    Running,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Debouncing => "debouncing",
            PipelineState::Running => "running",
        })
    }
}

/// What the preview surface should currently display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviewSnapshot {
    pub state: PipelineState,
    /// Last published outcome. An error outcome carries no artifact, so a
    /// stale image is never shown next to an error.
    pub outcome: Option<RenderOutcome>,
    /// Number of outcomes published so far.
    pub published: u64,
}

pub(crate) struct ResultPublisher {
    consumer: Arc<dyn RenderConsumer>,
    snapshot: watch::Sender<PreviewSnapshot>,
    error_shown: bool,
}

impl ResultPublisher {
    pub(crate) fn new(consumer: Arc<dyn RenderConsumer>) -> (Self, watch::Receiver<PreviewSnapshot>) {
        let (snapshot, receiver) = watch::channel(PreviewSnapshot::default());
        (
            Self {
                consumer,
                snapshot,
                error_shown: false,
            },
            receiver,
        )
    }

    pub(crate) fn publish(&mut self, outcome: RenderOutcome) {
        match (&outcome.artifact, &outcome.error) {
            (Some(artifact), _) => {
                if self.error_shown {
                    self.consumer.on_error(None);
                    self.error_shown = false;
                }
                self.consumer.on_artifact_ready(artifact);
            }
            (None, Some(message)) => {
                self.consumer.on_error(Some(message));
                self.error_shown = true;
            }
            (None, None) => return,
        }

        info!(
            op = "publisher::publish",
            result = if outcome.is_success() { "artifact" } else { "error" },
            "Render outcome published"
        );
        self.snapshot.send_modify(|snapshot| {
            snapshot.outcome = Some(outcome);
            snapshot.published += 1;
        });
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state == state {
                false
            } else {
                snapshot.state = state;
                true
            }
        });
    }
}
