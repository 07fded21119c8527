//! Worker thread machinery: one fresh OS thread per unit of work, a
//! thread-local context carrying the cooperative cancellation state, and the
//! pause/interrupt checks long-running interpreter code is expected to poll.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bcs_core::{
    CommandThreadEvent, InterpreterError, InterruptFlag, Interrupted, ObserverList, ServerEvent,
    WorkerInfo, WorkerKind, WorkerState,
};

use crate::error::ServerError;
use crate::registry::{WorkerRecord, WorkerRegistry};
use crate::status::StatusTracker;

#[derive(Clone)]
struct WorkerContext {
    interrupt: InterruptFlag,
    tracker: Arc<StatusTracker>,
    pause_poll: Duration,
    /// Whether this worker runs under the script lock and therefore
    /// participates in the pause protocol.
    governed: bool,
    authorisation_level: i32,
}

thread_local! {
    static CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

fn current_context() -> Option<WorkerContext> {
    CONTEXT.with(|slot| slot.borrow().clone())
}

/// Consumes a pending interrupt for the calling worker. Outside a worker
/// thread this is a no-op.
pub fn check_for_interruption() -> Result<(), Interrupted> {
    match current_context() {
        Some(context) => context.interrupt.check(),
        None => Ok(()),
    }
}

/// Cancellation point for long-running interpreter code.
///
/// Errors out on a pending interrupt. When the calling thread is a script
/// worker and scripts are paused, parks in a poll loop until resumed or
/// interrupted. Code that never calls this (or blocks elsewhere) cannot be
/// paused and is only stopped by the hard interpreter interrupt.
pub fn check_for_pauses() -> Result<(), Interrupted> {
    check_for_interruption()?;
    let Some(context) = current_context() else {
        return Ok(());
    };
    if !context.governed {
        return Ok(());
    }
    let mut parked = false;
    while context.tracker.is_paused() {
        if !parked {
            parked = true;
            tracing::info!("script paused, waiting for resume");
        }
        if context.interrupt.take() {
            return Err(Interrupted);
        }
        thread::sleep(context.pause_poll);
    }
    if parked {
        tracing::info!("script resumed");
    }
    Ok(())
}

/// Authorisation level the calling worker's command was submitted with.
/// `None` outside a worker thread.
pub fn current_authorisation_level() -> Option<i32> {
    current_context().map(|context| context.authorisation_level)
}

struct ContextGuard;

impl ContextGuard {
    fn install(context: WorkerContext) -> Self {
        CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));
        Self
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT.with(|slot| *slot.borrow_mut() = None);
    }
}

struct ScriptLockRelease(Arc<StatusTracker>);

impl Drop for ScriptLockRelease {
    fn drop(&mut self) {
        self.0.release_script_lock();
    }
}

/// Publishes the `Terminate` event on every exit path, panics included.
struct TerminateNotice {
    observers: Arc<ObserverList>,
    info: WorkerInfo,
    interrupt: InterruptFlag,
}

impl Drop for TerminateNotice {
    fn drop(&mut self) {
        let mut info = self.info.clone();
        info.state = WorkerState::Finished;
        info.interrupted = self.interrupt.is_raised();
        self.observers
            .notify(&ServerEvent::Thread(CommandThreadEvent::terminate(info)));
    }
}

/// Spawns and tracks worker threads. There is no reuse: every job gets a
/// fresh named OS thread, registered for the lifetime of the thread.
pub(crate) struct WorkerPool {
    registry: Arc<WorkerRegistry>,
    tracker: Arc<StatusTracker>,
    observers: Arc<ObserverList>,
    pause_poll: Duration,
}

/// Handle returned by [`WorkerPool::spawn`]. Blocking dispatch paths wait on
/// `result`; fire-and-forget paths drop it.
pub(crate) struct Spawned<T> {
    pub info: WorkerInfo,
    pub result: mpsc::Receiver<Result<T, InterpreterError>>,
}

impl WorkerPool {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tracker: Arc<StatusTracker>,
        observers: Arc<ObserverList>,
        pause_poll: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            observers,
            pause_poll,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Runs `job` on a new worker thread. The thread is registered and
    /// `Submitted` published before the job may begin, so each worker's
    /// events always arrive as `Submitted`, `Start`, `Terminate`; a
    /// `governed` worker additionally releases the script lock on exit.
    /// Failures inside the job are logged here and delivered on the result
    /// channel, never panicked through.
    pub fn spawn<T, F>(
        &self,
        kind: WorkerKind,
        command: String,
        authorisation_level: i32,
        governed: bool,
        job: F,
    ) -> Result<Spawned<T>, ServerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, InterpreterError> + Send + 'static,
    {
        let id = self.registry.next_id();
        let name = format!("{}-{id}", kind.label());
        let interrupt = InterruptFlag::new();
        let info = WorkerInfo {
            id,
            name: name.clone(),
            command: command.clone(),
            kind,
            state: WorkerState::Running,
            interrupted: false,
        };
        let (sender, receiver) = mpsc::channel();

        let context = WorkerContext {
            interrupt: interrupt.clone(),
            tracker: self.tracker.clone(),
            pause_poll: self.pause_poll,
            governed,
            authorisation_level,
        };
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let observers = self.observers.clone();
        let tracker = self.tracker.clone();
        let thread_info = info.clone();
        let thread_flag = interrupt.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            // Registration happens on the dispatching thread; hold the job
            // until it is done so `Submitted` always precedes `Start`.
            let _ = gate_rx.recv();
            let _context = ContextGuard::install(context);
            let _release = governed.then(|| ScriptLockRelease(tracker));
            let _notice = TerminateNotice {
                observers: observers.clone(),
                info: thread_info.clone(),
                interrupt: thread_flag,
            };
            observers.notify(&ServerEvent::Thread(CommandThreadEvent::start(
                thread_info.clone(),
            )));
            let result = job();
            if let Err(err) = &result {
                log_failure(&thread_info.command, err);
            }
            // The receiver is gone on fire-and-forget paths.
            let _ = sender.send(result);
        })?;

        self.registry.register(WorkerRecord {
            id,
            name,
            command,
            kind,
            interrupt,
            handle,
        });
        self.observers
            .notify(&ServerEvent::Thread(CommandThreadEvent::submitted(
                info.clone(),
            )));
        if self.registry.prune() > 0 {
            self.observers
                .notify(&ServerEvent::Thread(CommandThreadEvent::refresh()));
        }
        let _ = gate_tx.send(());
        Ok(Spawned {
            info,
            result: receiver,
        })
    }
}

fn log_failure(command: &str, err: &InterpreterError) {
    if err.is_interrupted() {
        tracing::info!(command, "execution interrupted");
    } else if err.is_name_error() {
        tracing::debug!(command, error = %err, "evaluation failed");
    } else {
        tracing::error!(command, error = %err, "execution failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::RecordingObserver;
    use bcs_core::{ScriptStatus, ThreadEventKind};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn pool() -> (WorkerPool, Arc<StatusTracker>, Arc<RecordingObserver>) {
        let observers = Arc::new(ObserverList::new());
        let recorder = RecordingObserver::new();
        observers.add(recorder.clone());
        let tracker = Arc::new(StatusTracker::new(observers.clone()));
        let pool = WorkerPool::new(
            Arc::new(WorkerRegistry::new()),
            tracker.clone(),
            observers,
            Duration::from_millis(5),
        );
        (pool, tracker, recorder)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn checks_are_noops_outside_workers() {
        assert!(check_for_interruption().is_ok());
        assert!(check_for_pauses().is_ok());
        assert_eq!(current_authorisation_level(), None);
    }

    #[test]
    fn spawn_runs_the_job_and_delivers_the_result() {
        let (pool, _, recorder) = pool();
        let spawned = pool
            .spawn(WorkerKind::Eval, "6*7".to_string(), 2, false, || Ok(42))
            .expect("spawn worker");

        assert_eq!(spawned.result.recv().expect("result"), Ok(42));
        assert_eq!(spawned.info.kind, WorkerKind::Eval);
        wait_until(|| pool.registry().live_count() == 0);
        wait_until(|| {
            recorder
                .thread_kinds()
                .ends_with(&[ThreadEventKind::Terminate])
        });
        assert_eq!(
            recorder.thread_kinds(),
            vec![
                ThreadEventKind::Submitted,
                ThreadEventKind::Start,
                ThreadEventKind::Terminate,
            ]
        );
    }

    #[test]
    fn workers_expose_their_authorisation_level() {
        let (pool, _, _) = pool();
        let spawned = pool
            .spawn(WorkerKind::Command, "level".to_string(), 3, false, || {
                Ok(current_authorisation_level())
            })
            .expect("spawn worker");
        assert_eq!(spawned.result.recv().expect("result"), Ok(Some(3)));
    }

    #[test]
    fn governed_worker_releases_the_lock_on_panic() {
        let (pool, tracker, recorder) = pool();
        assert!(tracker.try_acquire_script_lock());
        assert_eq!(tracker.script_status(), ScriptStatus::Running);

        let spawned = pool
            .spawn::<(), _>(WorkerKind::Command, "boom".to_string(), 2, true, || {
                panic!("interpreter blew up")
            })
            .expect("spawn worker");

        // The sender is dropped without a result when the job panics.
        assert!(spawned.result.recv().is_err());
        wait_until(|| tracker.script_status() == ScriptStatus::Idle);
        wait_until(|| {
            recorder
                .thread_kinds()
                .contains(&ThreadEventKind::Terminate)
        });
    }

    #[test]
    fn raised_flag_interrupts_a_polling_job() {
        let (pool, _, _) = pool();
        let spawned = pool
            .spawn::<(), _>(WorkerKind::Command, "loop".to_string(), 2, false, || {
                loop {
                    check_for_interruption()?;
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("spawn worker");

        pool.registry().interrupt_all(None);
        match spawned.result.recv().expect("result") {
            Err(err) => assert!(err.is_interrupted()),
            Ok(()) => panic!("job should have been interrupted"),
        }
    }

    #[test]
    fn paused_script_worker_parks_until_resumed() {
        let (pool, tracker, _) = pool();
        tracker.set_script_status(ScriptStatus::Paused);
        assert!(tracker.try_acquire_script_lock());

        let reached = Arc::new(AtomicBool::new(false));
        let reached_in_job = reached.clone();
        let spawned = pool
            .spawn(WorkerKind::Command, "pause".to_string(), 2, true, move || {
                check_for_pauses()?;
                reached_in_job.store(true, Ordering::SeqCst);
                Ok(())
            })
            .expect("spawn worker");

        thread::sleep(Duration::from_millis(50));
        assert!(!reached.load(Ordering::SeqCst), "worker should be parked");

        tracker.set_script_status(ScriptStatus::Running);
        assert_eq!(spawned.result.recv().expect("result"), Ok(()));
        assert!(reached.load(Ordering::SeqCst));
    }

    #[test]
    fn parked_worker_honours_an_interrupt() {
        let (pool, tracker, _) = pool();
        tracker.set_script_status(ScriptStatus::Paused);
        assert!(tracker.try_acquire_script_lock());

        let spawned = pool
            .spawn(WorkerKind::Command, "pause".to_string(), 2, true, || {
                check_for_pauses()?;
                Ok(())
            })
            .expect("spawn worker");

        thread::sleep(Duration::from_millis(20));
        pool.registry().interrupt_all(None);
        match spawned.result.recv().expect("result") {
            Err(err) => assert!(err.is_interrupted()),
            Ok(()) => panic!("parked worker should have been interrupted"),
        }
        // The pause flag stays set; only an abort or resume clears it.
        assert!(tracker.is_paused());
    }
}
