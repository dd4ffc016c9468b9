use std::time::Duration;

use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};

use super::fingerprint::Fingerprint;
use super::types::RenderError;

/// Why a pipeline run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// The debounce window elapsed after the last edit.
    Debounce,
    /// The user forced a cache-bypassing re-render.
    ManualRetry,
    /// A run finished after newer edits whose debounce expiry was dropped.
    CatchUp,
}

impl RunTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RunTrigger::Debounce => "debounce",
            RunTrigger::ManualRetry => "manual_retry",
            RunTrigger::CatchUp => "catch_up",
        }
    }
}

/// Bookkeeping for the run currently holding the guard.
#[derive(Debug, Clone)]
pub(crate) struct ActiveRun {
    pub(crate) run_id: u64,
    /// Edit revision the run renders; compared on completion to detect staleness.
    pub(crate) revision: u64,
    pub(crate) trigger: RunTrigger,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum InFlightError {
    #[error("render already in progress (run {run_id})")]
    AlreadyRunning { run_id: u64 },
}

/// Admits at most one run per coordinator. Requests made while a run holds
/// the guard are rejected, never queued.
#[derive(Debug, Default)]
pub(crate) struct ConcurrencyGuard {
    active: Option<ActiveRun>,
}

impl ConcurrencyGuard {
    pub(crate) fn acquire(&mut self, run: ActiveRun) -> Result<(), InFlightError> {
        match &self.active {
            Some(active) => Err(InFlightError::AlreadyRunning {
                run_id: active.run_id,
            }),
            None => {
                self.active = Some(run);
                Ok(())
            }
        }
    }

    /// Release the guard if `run_id` holds it.
    pub(crate) fn release(&mut self, run_id: u64) -> Option<ActiveRun> {
        if self.active.as_ref().is_some_and(|run| run.run_id == run_id) {
            self.active.take()
        } else {
            None
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

/// Message a run task sends back to the coordinator when it ends.
#[derive(Debug)]
pub(crate) struct CompletedRun {
    pub(crate) run_id: u64,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) result: Result<String, RenderError>,
    pub(crate) elapsed: Duration,
}

/// Reports completion of a run task on drop, so the coordinator always learns
/// that a run ended even if the task panicked or was aborted.
pub(crate) struct RunGuard {
    run_id: u64,
    fingerprint: Fingerprint,
    started_at: Instant,
    result: Option<Result<String, RenderError>>,
    completions: mpsc::UnboundedSender<CompletedRun>,
}

impl RunGuard {
    pub(crate) fn new(
        run_id: u64,
        fingerprint: Fingerprint,
        completions: mpsc::UnboundedSender<CompletedRun>,
    ) -> Self {
        Self {
            run_id,
            fingerprint,
            started_at: Instant::now(),
            result: None,
            completions,
        }
    }

    pub(crate) fn finish(mut self, result: Result<String, RenderError>) {
        self.result = Some(result);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or_else(|| {
            Err(RenderError::Aborted {
                reason: "render task ended before reporting a result".to_string(),
            })
        });
        let _ = self.completions.send(CompletedRun {
            run_id: self.run_id,
            fingerprint: self.fingerprint.clone(),
            result,
            elapsed: self.started_at.elapsed(),
        });
    }
}
