//! Shared vocabulary for the beamline console server: status values, the
//! observer event stream, and the trait contracts for the interpreter,
//! authorisation, and device collaborators.

pub mod auth;
pub mod client;
pub mod device;
pub mod events;
pub mod interp;
pub mod observer;
pub mod queue;
pub mod status;
pub mod token;
pub mod worker;

pub use auth::{AuthorisationError, Authoriser, MapAuthoriser, SharedAuthoriser};
pub use client::ClientDetails;
pub use device::{Detector, DetectorStatus, DeviceError, Motor, Scannable, Stoppable};
pub use events::{CommandThreadEvent, ServerEvent, ThreadEventKind, UserMessage};
pub use interp::{Interpreter, InterpreterError, SharedInterpreter, TerminalWriter};
pub use observer::{ObserverList, ServerObserver};
pub use queue::CommandQueue;
pub use status::{ScanStatus, ScriptStatus, ServerStatus};
pub use token::{InterruptFlag, Interrupted};
pub use worker::{WorkerInfo, WorkerKind, WorkerState};
