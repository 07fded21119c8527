use bcs_core::InterpreterError;
use bcs_session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("could not spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
