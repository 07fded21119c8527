//! Connected-client bookkeeping for the console server: the facade table,
//! per-user authorisation resolution, and the single mutual-exclusion baton.

mod registry;

pub use registry::{SessionError, SessionRegistry};
