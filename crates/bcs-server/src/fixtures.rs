//! Shared test fixtures: an event-recording observer, scriptable devices and
//! a fully wired server rig over the stub interpreter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bcs_core::{
    CommandQueue, Detector, DetectorStatus, DeviceError, MapAuthoriser, Motor, Scannable,
    ScriptStatus, ServerEvent, ServerObserver, Stoppable, ThreadEventKind,
};
use bcs_session::SessionRegistry;

use crate::config::ServerConfig;
use crate::devices::DeviceRegistry;
use crate::server::CommandServer;
use crate::stub::StubInterpreter;

/// Collects every published [`ServerEvent`] for later assertions.
pub struct RecordingObserver {
    events: Mutex<Vec<ServerEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Thread event kinds in publication order.
    pub fn thread_kinds(&self) -> Vec<ThreadEventKind> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Thread(thread) => Some(thread.kind),
                _ => None,
            })
            .collect()
    }

    /// Script statuses in publication order.
    pub fn script_statuses(&self) -> Vec<ScriptStatus> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Status(status) => Some(status.script),
                _ => None,
            })
            .collect()
    }

    /// Baton holder indices, one entry per published change.
    pub fn baton_holders(&self) -> Vec<Option<u32>> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Baton { holder } => Some(*holder),
                _ => None,
            })
            .collect()
    }

    /// Concatenated terminal output.
    pub fn terminal_text(&self) -> String {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Terminal { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn contains_panic_stop(&self) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, ServerEvent::PanicStop))
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Polls until `predicate` accepts the recorded events or `timeout`
    /// elapses.
    pub fn wait_for(
        &self,
        predicate: impl Fn(&[ServerEvent]) -> bool,
        timeout: Duration,
    ) -> bool {
        wait_until(|| predicate(&self.events()), timeout)
    }
}

impl ServerObserver for RecordingObserver {
    fn update(&self, event: &ServerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Polls `predicate` every few milliseconds until it passes or `timeout`
/// elapses.
pub fn wait_until(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// A motor that only remembers being told to stop.
pub struct TestMotor {
    name: String,
    stops: AtomicUsize,
}

impl TestMotor {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Stoppable for TestMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Motor for TestMotor {}

/// A scannable with scriptable busyness. The `failing` variant errors on
/// every stop request.
pub struct TestScannable {
    name: String,
    busy: AtomicBool,
    failing: bool,
    stops: AtomicUsize,
}

impl TestScannable {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            busy: AtomicBool::new(false),
            failing: false,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            busy: AtomicBool::new(false),
            failing: true,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Stoppable for TestScannable {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(DeviceError::new(self.name.as_str(), "refused to stop"));
        }
        self.busy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Scannable for TestScannable {
    fn is_busy(&self) -> Result<bool, DeviceError> {
        Ok(self.busy.load(Ordering::SeqCst))
    }
}

/// A detector with a scriptable status word.
pub struct TestDetector {
    name: String,
    status: Mutex<DetectorStatus>,
    stops: AtomicUsize,
}

impl TestDetector {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            status: Mutex::new(DetectorStatus::Idle),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn set_status(&self, status: DetectorStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Stoppable for TestDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap() = DetectorStatus::Idle;
        Ok(())
    }
}

impl Scannable for TestDetector {
    fn is_busy(&self) -> Result<bool, DeviceError> {
        Ok(self.status.lock().unwrap().is_active())
    }
}

impl Detector for TestDetector {
    fn status(&self) -> Result<DetectorStatus, DeviceError> {
        Ok(*self.status.lock().unwrap())
    }
}

/// A command queue that only counts halt requests.
#[derive(Default)]
pub struct TestQueue {
    halts: AtomicUsize,
}

impl TestQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

impl CommandQueue for TestQueue {
    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

/// A configured server over the stub interpreter with a fast pause poll, a
/// recording observer attached and one registered console client (alice,
/// level 2).
pub struct TestRig {
    pub server: Arc<CommandServer>,
    pub interpreter: Arc<StubInterpreter>,
    pub observer: Arc<RecordingObserver>,
    pub sessions: Arc<SessionRegistry>,
    pub devices: Arc<DeviceRegistry>,
}

pub fn rig() -> TestRig {
    build_rig(fast_config(), None)
}

pub fn rig_with_config(config: ServerConfig) -> TestRig {
    build_rig(config, None)
}

pub fn rig_with_queue(queue: Arc<TestQueue>) -> TestRig {
    build_rig(fast_config(), Some(queue))
}

/// The default test configuration: a 5 ms pause poll so paused-worker tests
/// settle quickly.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        pause_poll: Duration::from_millis(5),
        ..ServerConfig::default()
    }
}

fn build_rig(config: ServerConfig, queue: Option<Arc<TestQueue>>) -> TestRig {
    let interpreter = Arc::new(StubInterpreter::new());
    let mut levels = HashMap::new();
    levels.insert("alice".to_string(), 2);
    levels.insert("bob".to_string(), 2);
    levels.insert("carol".to_string(), 3);
    let authoriser = Arc::new(MapAuthoriser::with_default(levels, 1));
    let sessions = Arc::new(SessionRegistry::new(authoriser));
    let observer = RecordingObserver::new();
    let devices = Arc::new(DeviceRegistry::new());
    let mut builder = CommandServer::builder(interpreter.clone(), sessions.clone())
        .config(config)
        .devices(devices.clone())
        .observer(observer.clone());
    if let Some(queue) = queue {
        builder = builder.command_queue(queue);
    }
    let server = Arc::new(builder.build());
    server
        .configure()
        .expect("stub interpreter configures cleanly");
    sessions
        .add_facade("console", "control-room", "alice", "Alice", "cm-1234")
        .expect("alice is authorised");
    TestRig {
        server,
        interpreter,
        observer,
        sessions,
        devices,
    }
}
