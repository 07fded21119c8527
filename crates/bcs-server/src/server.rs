//! The command server. Every public operation of the console goes through
//! [`CommandServer`]: command/script/evaluation dispatch onto worker
//! threads, the pause and abort controls, session and baton management, and
//! observer notification.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bcs_core::{
    ClientDetails, CommandQueue, CommandThreadEvent, ObserverList, ScanStatus, ScriptStatus,
    ServerEvent, ServerObserver, ServerStatus, SharedInterpreter, TerminalWriter, UserMessage,
    WorkerInfo, WorkerKind,
};
use bcs_session::SessionRegistry;

use crate::config::ServerConfig;
use crate::devices::DeviceRegistry;
use crate::error::ServerError;
use crate::panic_stop::{self, AbortSweep};
use crate::registry::WorkerRegistry;
use crate::status::{StatusTracker, SyncCommandGuard};
use crate::worker::WorkerPool;

pub struct CommandServerBuilder {
    interpreter: SharedInterpreter,
    sessions: Arc<SessionRegistry>,
    config: ServerConfig,
    devices: Arc<DeviceRegistry>,
    queue: Option<Arc<dyn CommandQueue>>,
    observers: Vec<Arc<dyn ServerObserver>>,
}

impl CommandServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn devices(mut self, devices: Arc<DeviceRegistry>) -> Self {
        self.devices = devices;
        self
    }

    pub fn command_queue(mut self, queue: Arc<dyn CommandQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Registers an observer before the server starts publishing; may be
    /// called repeatedly.
    pub fn observer(mut self, observer: Arc<dyn ServerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> CommandServer {
        let observers = Arc::new(ObserverList::new());
        for observer in self.observers {
            observers.add(observer);
        }
        let tracker = Arc::new(StatusTracker::new(observers.clone()));
        let workers = WorkerPool::new(
            Arc::new(WorkerRegistry::new()),
            tracker.clone(),
            observers.clone(),
            self.config.pause_poll,
        );
        CommandServer {
            interpreter: self.interpreter,
            sessions: self.sessions,
            config: self.config,
            devices: self.devices,
            queue: self.queue,
            observers,
            tracker,
            workers,
            configured: AtomicBool::new(false),
            startup: Arc::new(StartupBuffer::default()),
        }
    }
}

pub struct CommandServer {
    interpreter: SharedInterpreter,
    sessions: Arc<SessionRegistry>,
    config: ServerConfig,
    devices: Arc<DeviceRegistry>,
    queue: Option<Arc<dyn CommandQueue>>,
    observers: Arc<ObserverList>,
    tracker: Arc<StatusTracker>,
    workers: WorkerPool,
    configured: AtomicBool,
    startup: Arc<StartupBuffer>,
}

impl CommandServer {
    pub fn builder(
        interpreter: SharedInterpreter,
        sessions: Arc<SessionRegistry>,
    ) -> CommandServerBuilder {
        CommandServerBuilder {
            interpreter,
            sessions,
            config: ServerConfig::default(),
            devices: Arc::new(DeviceRegistry::new()),
            queue: None,
            observers: Vec::new(),
        }
    }

    /// One-time setup: wires interpreter output to the observers, then runs
    /// the configured startup script on the calling thread. Terminal output
    /// produced while configuring is kept for late-attaching clients
    /// ([`CommandServer::startup_output`]). Calling again is a no-op.
    pub fn configure(&self) -> Result<(), ServerError> {
        if self.configured.swap(true, Ordering::SeqCst) {
            tracing::debug!("configure called again, ignoring");
            return Ok(());
        }
        tracing::info!("configuring console server");
        self.startup.begin();
        let relay = Arc::new(OutputRelay {
            observers: self.observers.clone(),
            startup: self.startup.clone(),
        });
        if let Err(err) = self.interpreter.configure(relay) {
            self.configured.store(false, Ordering::SeqCst);
            self.startup.end();
            return Err(err.into());
        }
        if let Some(path) = &self.config.startup_script {
            self.run_startup_script(path);
        }
        self.startup.end();
        tracing::info!("console server ready");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    /// Startup-script failures are logged, never fatal: an operator with a
    /// broken startup script still needs a working console to fix it.
    fn run_startup_script(&self, path: &Path) {
        tracing::info!(script = %path.display(), "running startup script");
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                tracing::error!(script = %path.display(), error = %err, "startup script unreadable");
                return;
            }
        };
        let _sync = SyncCommandGuard::new(&self.tracker);
        if let Err(err) = self.interpreter.run_script(&source) {
            tracing::error!(script = %path.display(), error = %err, "startup script failed");
        }
    }

    /// Terminal output captured while `configure` ran.
    pub fn startup_output(&self) -> String {
        self.startup.contents()
    }

    /// Fire-and-forget command dispatch. Bare `print` statements execute
    /// inline on the caller; everything else gets a worker thread. Failures
    /// are logged and published, never returned.
    pub fn run_command(&self, command: &str, identity: &str) {
        if is_simple_print(command) {
            if let Err(err) = self.interpreter.exec(command) {
                tracing::error!(command, error = %err, "print failed");
            }
            return;
        }
        let level = self.level_for(identity);
        let interpreter = self.interpreter.clone();
        let text = command.to_string();
        match self.workers.spawn(
            WorkerKind::Command,
            command.to_string(),
            level,
            false,
            move || interpreter.exec(&text),
        ) {
            Ok(_) => {}
            Err(err) => {
                tracing::error!(command, error = %err, "command submission failed");
                self.observers
                    .notify(&ServerEvent::Thread(CommandThreadEvent::submit_error()));
            }
        }
    }

    /// Runs a command on the calling thread, counted as an in-flight
    /// synchronous command for status purposes. This is the path nested
    /// command execution from inside a running script takes.
    pub fn run_command_synchronously(
        &self,
        command: &str,
        identity: &str,
    ) -> Result<(), ServerError> {
        tracing::debug!(command, identity, "running command synchronously");
        let _sync = SyncCommandGuard::new(&self.tracker);
        Ok(self.interpreter.exec(command)?)
    }

    /// Submits a whole script. At most one script runs at a time: if the
    /// script lock is held the submission is refused with `Busy` and
    /// nothing is spawned. The returned event describes the submission.
    pub fn run_script(&self, source: &str, identity: &str) -> CommandThreadEvent {
        if !self.tracker.try_acquire_script_lock() {
            tracing::info!("script refused, another script is already running");
            return CommandThreadEvent::busy();
        }
        let level = self.level_for(identity);
        let interpreter = self.interpreter.clone();
        let text = source.to_string();
        match self.workers.spawn(
            WorkerKind::Command,
            script_summary(source),
            level,
            true,
            move || interpreter.run_script(&text),
        ) {
            Ok(spawned) => CommandThreadEvent::submitted(spawned.info),
            Err(err) => {
                self.tracker.release_script_lock();
                tracing::error!(error = %err, "script submission failed");
                CommandThreadEvent::submit_error()
            }
        }
    }

    /// Evaluates an expression on a worker thread and blocks for the
    /// rendered result. Any failure yields an empty string; the worker has
    /// already logged it (name errors at debug, interrupts at info,
    /// everything else at error).
    pub fn evaluate_command(&self, expression: &str, identity: &str) -> String {
        let level = self.level_for(identity);
        let interpreter = self.interpreter.clone();
        let text = expression.to_string();
        let spawned = match self.workers.spawn(
            WorkerKind::Eval,
            expression.to_string(),
            level,
            false,
            move || interpreter.evaluate(&text),
        ) {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!(command = expression, error = %err, "evaluation submission failed");
                return String::new();
            }
        };
        match spawned.result.recv() {
            Ok(Ok(value)) => value,
            // Already logged by the worker.
            Ok(Err(_)) => String::new(),
            Err(_) => {
                tracing::error!(command = expression, "evaluation worker vanished");
                String::new()
            }
        }
    }

    /// One line of interactive console input. Returns `false` when the
    /// source is incomplete and the console should gather a continuation
    /// line; everything else, failures included, reports `true`.
    pub fn runsource(&self, command: &str, identity: &str) -> bool {
        self.runsource_inner(command, identity, None)
    }

    /// As [`CommandServer::runsource`], with a stdin stream attached for
    /// code that reads input.
    pub fn runsource_with_stdin(
        &self,
        command: &str,
        identity: &str,
        stdin: Box<dyn Read + Send>,
    ) -> bool {
        self.runsource_inner(command, identity, Some(stdin))
    }

    fn runsource_inner(
        &self,
        command: &str,
        identity: &str,
        stdin: Option<Box<dyn Read + Send>>,
    ) -> bool {
        // Echo the input so every attached client sees what was typed.
        self.observers
            .notify(&ServerEvent::terminal(format!("{command}\n")));
        let level = self.level_for(identity);
        let interpreter = self.interpreter.clone();
        let text = command.to_string();
        let spawned = match self.workers.spawn(
            WorkerKind::Source,
            command.to_string(),
            level,
            false,
            move || interpreter.runsource(&text, stdin),
        ) {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!(command, error = %err, "console input submission failed");
                return true;
            }
        };
        match spawned.result.recv() {
            Ok(Ok(complete)) => complete,
            // Dealt with: the failure is on the terminal and in the log.
            Ok(Err(_)) => true,
            Err(_) => {
                tracing::error!(command, "console worker vanished");
                true
            }
        }
    }

    /// Aborts everything in flight: halts the external queue, raises every
    /// live worker's interrupt flag (sparing the calling thread), interrupts
    /// the interpreter and cancels any pending pause. With `halt_beamline`
    /// the sweep also stops every registered and namespace device. Runs on a
    /// dedicated thread; if that thread cannot be spawned the sweep runs
    /// inline, because an abort must never be lost.
    pub fn abort_commands(&self, halt_beamline: bool) {
        tracing::warn!(halt_beamline, "abort requested");
        if self.config.stop_busy_devices_on_abort {
            panic_stop::stop_busy_devices(&self.devices);
        }
        let sweep = AbortSweep {
            workers: self.workers.registry().clone(),
            interpreter: self.interpreter.clone(),
            tracker: self.tracker.clone(),
            observers: self.observers.clone(),
            devices: self.devices.clone(),
            queue: self.queue.clone(),
            halt_beamline,
            spare: thread::current().id(),
        };
        let on_thread = sweep.clone();
        if let Err(err) = thread::Builder::new()
            .name("abort-sweep".to_string())
            .spawn(move || on_thread.run())
        {
            tracing::error!(error = %err, "abort thread unavailable, sweeping inline");
            sweep.run();
        }
    }

    /// Interrupts everything, discards interpreter state and the startup
    /// buffer, and configures afresh.
    pub fn restart(&self) -> Result<(), ServerError> {
        tracing::warn!("restarting console server");
        self.configured.store(false, Ordering::SeqCst);
        self.workers
            .registry()
            .interrupt_all(Some(thread::current().id()));
        self.interpreter.interrupt();
        self.tracker.set_script_status(ScriptStatus::Running);
        if let Err(err) = self.interpreter.teardown() {
            tracing::warn!(error = %err, "interpreter teardown failed");
        }
        self.startup.clear();
        self.configure()
    }

    pub fn pause_script(&self) {
        tracing::info!("pause requested");
        self.tracker.set_script_status(ScriptStatus::Paused);
    }

    pub fn resume_script(&self) {
        tracing::info!("resume requested");
        self.tracker.set_script_status(ScriptStatus::Running);
    }

    pub fn server_status(&self) -> ServerStatus {
        self.tracker.snapshot()
    }

    pub fn script_status(&self) -> ScriptStatus {
        self.tracker.script_status()
    }

    /// Fold the externally-driven scan status into the status stream.
    pub fn update_scan_status(&self, status: ScanStatus) {
        self.tracker.update_scan_status(status);
    }

    pub fn set_variable(&self, name: &str, value: &str) -> Result<(), ServerError> {
        Ok(self.interpreter.set_variable(name, value)?)
    }

    pub fn variable(&self, name: &str) -> Result<Option<String>, ServerError> {
        Ok(self.interpreter.variable(name)?)
    }

    // Session facade. Baton-affecting calls publish a `Baton` event when the
    // holder actually changed.

    pub fn add_facade(
        &self,
        identity: &str,
        hostname: &str,
        username: &str,
        fullname: &str,
        visit: &str,
    ) -> Result<u32, ServerError> {
        let before = self.baton_index();
        let result = self
            .sessions
            .add_facade(identity, hostname, username, fullname, visit);
        self.publish_baton_change(before);
        Ok(result?)
    }

    pub fn switch_user(
        &self,
        identity: &str,
        username: &str,
        visit: &str,
    ) -> Result<(), ServerError> {
        Ok(self.sessions.switch_user(identity, username, visit)?)
    }

    pub fn remove_facade(&self, identity: &str) {
        let before = self.baton_index();
        self.sessions.remove_facade(identity);
        self.publish_baton_change(before);
    }

    pub fn request_baton(&self, identity: &str) -> bool {
        let before = self.baton_index();
        let granted = self.sessions.request_baton(identity);
        self.publish_baton_change(before);
        granted
    }

    pub fn assign_baton(&self, identity: &str, target_index: u32) {
        let before = self.baton_index();
        self.sessions.assign_baton(identity, target_index);
        self.publish_baton_change(before);
    }

    pub fn return_baton(&self, identity: &str) {
        let before = self.baton_index();
        self.sessions.return_baton(identity);
        self.publish_baton_change(before);
    }

    pub fn am_i_baton_holder(&self, identity: &str) -> bool {
        self.sessions.am_i_baton_holder(identity)
    }

    pub fn is_baton_held(&self) -> bool {
        self.sessions.is_baton_held()
    }

    pub fn baton_holder(&self) -> Option<ClientDetails> {
        self.sessions.baton_holder()
    }

    pub fn client_information(&self, identity: &str) -> Option<ClientDetails> {
        self.sessions.client_information(identity)
    }

    pub fn other_client_information(&self, identity: &str) -> Vec<ClientDetails> {
        self.sessions.other_client_information(identity)
    }

    pub fn all_clients(&self) -> Vec<ClientDetails> {
        self.sessions.all_clients()
    }

    pub fn renew_lease(&self, identity: &str) {
        self.sessions.renew_lease(identity);
    }

    pub fn surrender_lease(&self, identity: &str) {
        self.sessions.surrender_lease(identity);
    }

    /// Relays an operator chat line to every observer. Nothing is stored.
    pub fn publish_message(&self, identity: &str, text: &str) {
        let message = match self.sessions.client_information(identity) {
            Some(details) => UserMessage {
                source_index: Some(details.index),
                username: details.username,
                text: text.to_string(),
            },
            None => UserMessage {
                source_index: None,
                username: identity.to_string(),
                text: text.to_string(),
            },
        };
        self.observers.notify(&ServerEvent::Message(message));
    }

    pub fn add_observer(&self, observer: Arc<dyn ServerObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ServerObserver>) {
        self.observers.remove(observer);
    }

    /// Snapshots of every tracked worker, terminated-but-unpruned included.
    pub fn command_threads(&self) -> Vec<WorkerInfo> {
        self.workers.registry().infos()
    }

    pub fn live_worker_count(&self) -> usize {
        self.workers.registry().live_count()
    }

    /// Drops terminated worker records, told to observers as a `Refresh`.
    pub fn prune_workers(&self) -> usize {
        let removed = self.workers.registry().prune();
        if removed > 0 {
            self.observers
                .notify(&ServerEvent::Thread(CommandThreadEvent::refresh()));
        }
        removed
    }

    fn level_for(&self, identity: &str) -> i32 {
        match self.sessions.authorisation_level_of(identity) {
            Some(level) => level,
            None => {
                tracing::warn!(identity, "request from unregistered identity, using level 0");
                0
            }
        }
    }

    fn baton_index(&self) -> Option<u32> {
        self.sessions.baton_holder().map(|holder| holder.index)
    }

    fn publish_baton_change(&self, before: Option<u32>) {
        let after = self.baton_index();
        if after != before {
            self.observers.notify(&ServerEvent::Baton { holder: after });
        }
    }
}

/// Interpreter output sink: forwards to the observers and, while the server
/// is configuring, into the startup buffer.
struct OutputRelay {
    observers: Arc<ObserverList>,
    startup: Arc<StartupBuffer>,
}

impl TerminalWriter for OutputRelay {
    fn write(&self, text: &str) {
        self.startup.capture(text);
        self.observers.notify(&ServerEvent::terminal(text));
    }
}

#[derive(Default)]
struct StartupBuffer {
    capturing: AtomicBool,
    text: Mutex<String>,
}

impl StartupBuffer {
    fn begin(&self) {
        self.capturing.store(true, Ordering::SeqCst);
    }

    fn end(&self) {
        self.capturing.store(false, Ordering::SeqCst);
    }

    fn capture(&self, text: &str) {
        if self.capturing.load(Ordering::SeqCst) {
            self.text.lock().unwrap().push_str(text);
        }
    }

    fn contents(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.text.lock().unwrap().clear();
    }
}

/// Bare print statements run inline on the caller: spawning a thread per
/// echoed line would swamp the worker lists during normal console use.
fn is_simple_print(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.contains('\n') || trimmed.contains(';') {
        return false;
    }
    trimmed == "print" || trimmed.starts_with("print ") || trimmed.starts_with("print(")
}

/// First non-empty line of a script, shortened for worker listings.
fn script_summary(source: &str) -> String {
    let mut lines = source.lines().filter(|line| !line.trim().is_empty());
    let first = lines.next().unwrap_or("").trim();
    let truncated: String = first.chars().take(80).collect();
    if lines.next().is_some() || truncated.len() < first.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
