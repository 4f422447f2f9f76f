//! Progress reporting for sync runs.
//!
//! A run emits an ordered sequence of [`ProgressEvent`]s that always ends in
//! exactly one terminal event (`done` or `failed`). Non-terminal events may
//! carry `failed = true` for phase-local problems (publish, one artifact)
//! that do not end the run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let log = Arc::new(ProgressLog::new());
//! let rx = log.subscribe();
//! pipeline.run_sync(&target, log.as_ref());
//! while let Ok(event) = rx.try_recv() {
//!     println!("{:?} {}", event.phase, event.detail);
//! }
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Run accepted, fetch starting.
    Init,
    /// Verifying the staged export.
    StagingCheck,
    /// Moving the export into place.
    Restructuring,
    /// Committing the server tree.
    Committing,
    /// Publishing to the remote.
    Publishing,
    /// Running artifact generators.
    GeneratingArtifacts,
    /// Terminal: success.
    Done,
    /// Terminal: failure.
    Failed,
}

impl Phase {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::StagingCheck => "staging_check",
            Phase::Restructuring => "restructuring",
            Phase::Committing => "committing",
            Phase::Publishing => "publishing",
            Phase::GeneratingArtifacts => "generating_artifacts",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Phase.
    pub phase: Phase,
    /// Human-readable detail; for a terminal `failed`, the error kind.
    pub detail: String,
    /// True if this phase failed.
    pub failed: bool,
}

impl ProgressEvent {
    /// A successful or in-progress event.
    pub fn new(phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
            failed: false,
        }
    }

    /// A phase-local failure.
    pub fn failure(phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
            failed: true,
        }
    }

    /// The terminal failure event for an error kind.
    pub fn terminal_failure(kind: &str) -> Self {
        Self::failure(Phase::Failed, kind)
    }
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: ProgressEvent);
}

/// Discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// A progress sink that keeps history and fans out to subscribers.
pub struct ProgressLog {
    subscribers: RwLock<Vec<Sender<ProgressEvent>>>,
    history: RwLock<Vec<ProgressEvent>>,
    max_history: usize,
}

impl ProgressLog {
    /// Creates a log with the default history limit.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a log keeping at most `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Events emitted so far (up to the history limit).
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.history.read().clone()
    }

    /// Phases emitted so far, in order.
    pub fn phases(&self) -> Vec<Phase> {
        self.history.read().iter().map(|e| e.phase).collect()
    }

    /// The terminal event, if the run has finished.
    pub fn terminal(&self) -> Option<ProgressEvent> {
        self.history
            .read()
            .iter()
            .rev()
            .find(|e| e.phase.is_terminal())
            .cloned()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressLog")
            .field("events", &self.history.read().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ProgressSink for ProgressLog {
    fn emit(&self, event: ProgressEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn phase_names() {
        assert_eq!(Phase::GeneratingArtifacts.as_str(), "generating_artifacts");
        assert_eq!(
            serde_json::to_string(&Phase::StagingCheck).unwrap(),
            "\"staging_check\""
        );
        assert!(Phase::Done.is_terminal());
        assert!(!Phase::Publishing.is_terminal());
    }

    #[test]
    fn log_keeps_order_and_fans_out() {
        let log = ProgressLog::new();
        let rx = log.subscribe();

        log.emit(ProgressEvent::new(Phase::Init, "start"));
        log.emit(ProgressEvent::failure(Phase::Publishing, "403"));
        log.emit(ProgressEvent::new(Phase::Done, "ok"));

        assert_eq!(log.phases(), [Phase::Init, Phase::Publishing, Phase::Done]);
        assert_eq!(log.terminal().unwrap().phase, Phase::Done);
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(received[1].failed);
    }

    #[test]
    fn dropped_subscribers_are_removed() {
        let log = ProgressLog::new();
        drop(log.subscribe());
        let _rx = log.subscribe();
        log.emit(ProgressEvent::new(Phase::Init, ""));
        assert_eq!(log.subscriber_count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let log = ProgressLog::with_max_history(2);
        for i in 0..5 {
            log.emit(ProgressEvent::new(Phase::Init, i.to_string()));
        }
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "3");
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| seen.lock().unwrap().push(e.phase);
        sink.emit(ProgressEvent::terminal_failure("StagingMissing"));
        assert_eq!(*seen.lock().unwrap(), [Phase::Failed]);
    }
}
