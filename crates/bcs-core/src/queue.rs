//! External command-queue hook. When a queue processor feeds the server,
//! aborts must stop it from submitting further work.

/// Handle on an external queue processor. `halt` is a fire-and-forget stop
/// signal raised during aborts; implementations log their own failures.
pub trait CommandQueue: Send + Sync {
    fn halt(&self);
}
