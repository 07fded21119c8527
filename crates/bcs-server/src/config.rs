use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How often a paused script worker re-checks the pause flag.
    pub pause_poll: Duration,
    /// Stop busy scannables and detectors synchronously before the abort
    /// sweep starts interrupting workers.
    pub stop_busy_devices_on_abort: bool,
    /// Script executed on the configuring thread at the end of `configure`.
    pub startup_script: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_millis(100),
            stop_busy_devices_on_abort: true,
            startup_script: None,
        }
    }
}
