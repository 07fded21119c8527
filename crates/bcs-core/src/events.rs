//! Observer-visible events published by the command server.
//!
//! Events are push-only and carry owned data so they can be fanned out to
//! any number of observers (and framed for remote facades) without holding
//! server locks.

use serde::{Deserialize, Serialize};

use crate::status::ServerStatus;
use crate::worker::WorkerInfo;

/// Lifecycle stage reported in a [`CommandThreadEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadEventKind {
    /// A worker was spawned and registered.
    Submitted,
    /// The worker thread began executing.
    Start,
    /// The worker thread finished, whatever the outcome.
    Terminate,
    /// The worker lists changed; re-query for details.
    Refresh,
    /// A script was refused because another script already runs.
    Busy,
    /// The worker thread could not be spawned.
    SubmitError,
}

/// Worker lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandThreadEvent {
    pub kind: ThreadEventKind,
    /// Snapshot of the worker concerned; `None` for list-wide kinds such as
    /// `Refresh` and for spawn failures where no thread exists.
    pub info: Option<WorkerInfo>,
}

impl CommandThreadEvent {
    pub fn new(kind: ThreadEventKind, info: Option<WorkerInfo>) -> Self {
        Self { kind, info }
    }

    pub fn submitted(info: WorkerInfo) -> Self {
        Self::new(ThreadEventKind::Submitted, Some(info))
    }

    pub fn start(info: WorkerInfo) -> Self {
        Self::new(ThreadEventKind::Start, Some(info))
    }

    pub fn terminate(info: WorkerInfo) -> Self {
        Self::new(ThreadEventKind::Terminate, Some(info))
    }

    pub fn refresh() -> Self {
        Self::new(ThreadEventKind::Refresh, None)
    }

    pub fn busy() -> Self {
        Self::new(ThreadEventKind::Busy, None)
    }

    pub fn submit_error() -> Self {
        Self::new(ThreadEventKind::SubmitError, None)
    }
}

/// Operator chat line relayed to every observer; never persisted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Connection index of the sender, if it was registered.
    pub source_index: Option<u32>,
    pub username: String,
    pub text: String,
}

/// Push notification delivered to registered observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Interpreter/terminal output, including echoed console input.
    Terminal { text: String },
    /// Worker thread lifecycle.
    Thread(CommandThreadEvent),
    /// Combined script + scan status after a real transition.
    Status(ServerStatus),
    /// The baton changed hands; `None` means it became free.
    Baton { holder: Option<u32> },
    /// An emergency stop sweep ran.
    PanicStop,
    /// Operator chat line.
    Message(UserMessage),
}

impl ServerEvent {
    pub fn terminal(text: impl Into<String>) -> Self {
        ServerEvent::Terminal { text: text.into() }
    }
}
