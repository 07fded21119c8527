use serde::{Deserialize, Serialize};

/// Execution status of the scripting side of the console.
///
/// This value is derived, never stored: `Paused` whenever the pause flag is
/// set, else `Running` while the script lock is held or a synchronous
/// command is in flight, else `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Last known status of the active hardware scan, cached by the status
/// tracker and folded into the same event stream as [`ScriptStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Finishing,
}

/// Combined script + scan status published to observers on every real
/// transition of either component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub script: ScriptStatus,
    pub scan: ScanStatus,
}

impl ServerStatus {
    pub fn new(script: ScriptStatus, scan: ScanStatus) -> Self {
        Self { script, scan }
    }
}
