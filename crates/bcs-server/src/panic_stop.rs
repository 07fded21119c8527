//! The abort machinery: interrupt every live worker, then optionally stop
//! the beamline. Per-device failures are logged and never end the sweep.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use bcs_core::{
    CommandQueue, DetectorStatus, ObserverList, ScriptStatus, ServerEvent, SharedInterpreter,
    Stoppable,
};

use crate::devices::DeviceRegistry;
use crate::registry::WorkerRegistry;
use crate::status::StatusTracker;

/// Pre-abort device stop: anything observably busy is told to stop before
/// workers are interrupted, so the hardware settles even if the commands
/// driving it ignore their interrupt.
pub(crate) fn stop_busy_devices(devices: &DeviceRegistry) {
    for scannable in devices.scannables() {
        match scannable.is_busy() {
            Ok(true) => stop_logged("scannable", scannable.as_ref()),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(device = scannable.name(), error = %err, "busy probe failed");
            }
        }
    }
    for detector in devices.detectors() {
        match detector.status() {
            Ok(status) if status.is_active() => stop_logged("detector", detector.as_ref()),
            Ok(DetectorStatus::Fault) => {
                tracing::warn!(device = detector.name(), "detector in fault, not stopping");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(device = detector.name(), error = %err, "status probe failed");
            }
        }
    }
}

/// One abort pass. Built on the dispatching thread, run on a dedicated
/// thread (or inline if that thread cannot be spawned).
#[derive(Clone)]
pub(crate) struct AbortSweep {
    pub workers: Arc<WorkerRegistry>,
    pub interpreter: SharedInterpreter,
    pub tracker: Arc<StatusTracker>,
    pub observers: Arc<ObserverList>,
    pub devices: Arc<DeviceRegistry>,
    pub queue: Option<Arc<dyn CommandQueue>>,
    pub halt_beamline: bool,
    /// Thread that requested the abort; its own worker record is spared so
    /// an abort typed into the console does not cancel itself.
    pub spare: ThreadId,
}

impl AbortSweep {
    pub fn run(&self) {
        if let Some(queue) = &self.queue {
            queue.halt();
            tracing::info!("command queue halted");
        }
        self.workers.prune();
        self.workers.interrupt_all(Some(self.spare));
        self.interpreter.interrupt();
        // An abort cancels any pending pause, otherwise dying script
        // workers would leave the status stuck at paused.
        self.tracker.set_script_status(ScriptStatus::Running);
        if self.halt_beamline {
            self.stop_everything();
        }
        self.observers.notify(&ServerEvent::PanicStop);
        tracing::warn!(halt_beamline = self.halt_beamline, "abort sweep finished");
    }

    /// Motors first and concurrently, then the interpreter-namespace
    /// scannables, then everything else registered.
    fn stop_everything(&self) {
        let motors = self.devices.motors();
        thread::scope(|scope| {
            for motor in &motors {
                scope.spawn(move || stop_logged("motor", motor.as_ref()));
            }
        });
        for scannable in self.interpreter.scannables() {
            stop_logged("scannable", scannable.as_ref());
        }
        for scannable in self.devices.scannables() {
            stop_logged("scannable", scannable.as_ref());
        }
        for detector in self.devices.detectors() {
            stop_logged("detector", detector.as_ref());
        }
        for stoppable in self.devices.stoppables() {
            stop_logged("device", stoppable.as_ref());
        }
    }
}

fn stop_logged<D: Stoppable + ?Sized>(kind: &str, device: &D) {
    if let Err(err) = device.stop() {
        tracing::warn!(device = device.name(), error = %err, "{kind} stop failed");
    }
}
