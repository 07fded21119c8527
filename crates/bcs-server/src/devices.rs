//! Registered hardware handles consumed by the abort machinery. The server
//! never moves anything; it only stops.

use std::sync::{Arc, RwLock};

use bcs_core::{Detector, Motor, Scannable, Stoppable};

#[derive(Default)]
pub struct DeviceRegistry {
    motors: RwLock<Vec<Arc<dyn Motor>>>,
    scannables: RwLock<Vec<Arc<dyn Scannable>>>,
    detectors: RwLock<Vec<Arc<dyn Detector>>>,
    stoppables: RwLock<Vec<Arc<dyn Stoppable>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_motor(&self, motor: Arc<dyn Motor>) {
        self.motors.write().unwrap().push(motor);
    }

    pub fn add_scannable(&self, scannable: Arc<dyn Scannable>) {
        self.scannables.write().unwrap().push(scannable);
    }

    pub fn add_detector(&self, detector: Arc<dyn Detector>) {
        self.detectors.write().unwrap().push(detector);
    }

    pub fn add_stoppable(&self, stoppable: Arc<dyn Stoppable>) {
        self.stoppables.write().unwrap().push(stoppable);
    }

    pub fn motors(&self) -> Vec<Arc<dyn Motor>> {
        self.motors.read().unwrap().clone()
    }

    pub fn scannables(&self) -> Vec<Arc<dyn Scannable>> {
        self.scannables.read().unwrap().clone()
    }

    pub fn detectors(&self) -> Vec<Arc<dyn Detector>> {
        self.detectors.read().unwrap().clone()
    }

    pub fn stoppables(&self) -> Vec<Arc<dyn Stoppable>> {
        self.stoppables.read().unwrap().clone()
    }
}
