//! The interpreter capability consumed by the command server. The server
//! never looks inside the namespace; everything goes through this trait.

use std::io::Read;
use std::sync::Arc;

use thiserror::Error;

use crate::device::Scannable;
use crate::token::Interrupted;

pub type SharedInterpreter = Arc<dyn Interpreter>;

/// Sink for interpreter output. The server hands one to [`Interpreter::configure`]
/// and relays whatever arrives to terminal observers.
pub trait TerminalWriter: Send + Sync {
    fn write(&self, text: &str);
}

/// A shared scripting interpreter. One instance backs every worker thread;
/// implementations handle their own interior synchronisation. Calls may block
/// for as long as the underlying code runs, and long-running implementations
/// are expected to poll the cooperative pause/interrupt checks so the server
/// can pause or stop them.
pub trait Interpreter: Send + Sync {
    /// One-time setup, wiring interpreter output to `writer`. Called again
    /// only after [`Interpreter::teardown`] (server restart).
    fn configure(&self, writer: Arc<dyn TerminalWriter>) -> Result<(), InterpreterError>;

    /// Execute one or more statements.
    fn exec(&self, code: &str) -> Result<(), InterpreterError>;

    /// Evaluate an expression and render its value as text.
    fn evaluate(&self, expression: &str) -> Result<String, InterpreterError>;

    /// Execute a whole script body.
    fn run_script(&self, source: &str) -> Result<(), InterpreterError>;

    /// Compile-and-run one line of interactive input, optionally with a
    /// stdin stream for code that reads input. `Ok(true)` means the source
    /// formed a complete statement that was handled; `Ok(false)` asks the
    /// caller for a continuation line.
    fn runsource(
        &self,
        code: &str,
        stdin: Option<Box<dyn Read + Send>>,
    ) -> Result<bool, InterpreterError>;

    /// Best-effort hard interruption of whatever is currently executing.
    fn interrupt(&self);

    fn set_variable(&self, name: &str, value: &str) -> Result<(), InterpreterError>;

    fn variable(&self, name: &str) -> Result<Option<String>, InterpreterError>;

    /// Scannables currently present in the namespace, for the all-stop sweep.
    fn scannables(&self) -> Vec<Arc<dyn Scannable>>;

    /// Discard namespace state ahead of a reconfigure.
    fn teardown(&self) -> Result<(), InterpreterError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpreterError {
    #[error("interpreter has not been configured")]
    NotConfigured,
    #[error("name '{0}' is not defined")]
    NameError(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl InterpreterError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn is_name_error(&self) -> bool {
        matches!(self, Self::NameError(_))
    }
}
