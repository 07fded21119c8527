use serde::{Deserialize, Serialize};

/// Which dispatch path created a worker thread.
///
/// The kind is plain data: it selects the registry list the worker is
/// tracked in and whether the dispatching caller blocks for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    /// Interactive console input fed through `runsource`.
    Source,
    /// Fire-and-forget command or governed script.
    Command,
    /// Expression evaluation with a string result.
    Eval,
}

impl WorkerKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerKind::Source => "source",
            WorkerKind::Command => "command",
            WorkerKind::Eval => "eval",
        }
    }
}

/// Coarse thread state reported in a [`WorkerInfo`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    Finished,
}

/// Snapshot of one worker thread, built fresh from the live thread each
/// time it is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: u64,
    /// OS thread name the worker was spawned with.
    pub name: String,
    /// The command/script/expression text the worker is executing.
    pub command: String,
    pub kind: WorkerKind,
    pub state: WorkerState,
    /// Whether an interrupt was ever requested for this worker.
    pub interrupted: bool,
}
