//! Handles for background sync runs.
//!
//! A [`TaskHandle`] is returned as soon as a run is accepted. The run moves
//! through `pending → running → done | failed`; every progress event is kept
//! for late readers and broadcast to live subscribers.

use mirrordb_core::{ProgressEvent, ProgressLog, ProgressSink, SyncOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;
const RECENT_TASKS: usize = 128;

/// Lifecycle of a background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker.
    Pending,
    /// Executing.
    Running,
    /// Finished with `done`.
    Done,
    /// Finished with `failed`, or the worker panicked.
    Failed,
}

impl TaskState {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Done => write!(f, "done"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// Worker side of a task: receives progress and drives the state.
pub(crate) struct TaskReporter {
    state: watch::Sender<TaskState>,
    events: broadcast::Sender<ProgressEvent>,
    log: Arc<ProgressLog>,
    outcome: Arc<Mutex<Option<SyncOutcome>>>,
}

impl TaskReporter {
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    /// Records the outcome and moves to the matching terminal state.
    pub(crate) fn finish(&self, outcome: SyncOutcome) {
        let state = if outcome.is_success() {
            TaskState::Done
        } else {
            TaskState::Failed
        };
        *self.outcome.lock() = Some(outcome);
        self.set_state(state);
    }

    /// Ends the task after a panic, emitting the terminal event the run never sent.
    pub(crate) fn abort(&self, kind: &str) {
        if self.log.terminal().is_none() {
            self.emit(ProgressEvent::terminal_failure(kind));
        }
        self.set_state(TaskState::Failed);
    }
}

impl ProgressSink for TaskReporter {
    fn emit(&self, event: ProgressEvent) {
        self.log.emit(event.clone());
        // no live subscribers is fine; history still has it
        let _ = self.events.send(event);
    }
}

/// Caller side of a background run.
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    state: watch::Receiver<TaskState>,
    events: broadcast::Sender<ProgressEvent>,
    log: Arc<ProgressLog>,
    outcome: Arc<Mutex<Option<SyncOutcome>>>,
}

impl TaskHandle {
    /// Task ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Events emitted so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.log.events()
    }

    /// Receiver for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Receiver for state changes.
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// The run's outcome, once finished. Absent if the worker panicked.
    pub fn outcome(&self) -> Option<SyncOutcome> {
        self.outcome.lock().clone()
    }

    /// Waits until the task reaches a terminal state.
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // the reporter is gone without finishing
            Err(_) => TaskState::Failed,
        };
        state
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("events", &self.log.events().len())
            .finish()
    }
}

/// Creates a connected reporter and handle in the `pending` state.
pub(crate) fn task() -> (TaskReporter, TaskHandle) {
    let (state_tx, state_rx) = watch::channel(TaskState::Pending);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let log = Arc::new(ProgressLog::new());
    let outcome = Arc::new(Mutex::new(None));
    let reporter = TaskReporter {
        state: state_tx,
        events: events.clone(),
        log: Arc::clone(&log),
        outcome: Arc::clone(&outcome),
    };
    let handle = TaskHandle {
        id: Uuid::new_v4(),
        state: state_rx,
        events,
        log,
        outcome,
    };
    (reporter, handle)
}

/// Handles of in-flight and recently finished tasks, oldest first.
///
/// Finished handles are evicted oldest first once the table is full.
/// In-flight handles are never evicted.
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    recent: Mutex<VecDeque<TaskHandle>>,
}

impl TaskTable {
    pub(crate) fn insert(&self, handle: TaskHandle) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_TASKS {
            if let Some(pos) = recent.iter().position(|h| h.state().is_terminal()) {
                recent.remove(pos);
            }
        }
        recent.push_back(handle);
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<TaskHandle> {
        self.recent.lock().iter().find(|h| h.id() == id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<TaskHandle> {
        self.recent.lock().iter().cloned().collect()
    }
}
