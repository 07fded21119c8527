//! Push-style observer fan-out. Events are dispatched outside the list lock
//! so observers are free to re-enter server APIs from `update`.

use std::sync::{Arc, RwLock};

use crate::events::ServerEvent;

pub trait ServerObserver: Send + Sync {
    fn update(&self, event: &ServerEvent);
}

/// Shared list of observers. Additions and removals take the write lock;
/// notification snapshots the list under the read lock and then dispatches
/// with no lock held.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn ServerObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ServerObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    /// Removes by identity, not equality: only the exact `Arc` previously
    /// added is dropped from the list.
    pub fn remove(&self, observer: &Arc<dyn ServerObserver>) {
        self.observers
            .write()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    pub fn notify(&self, event: &ServerEvent) {
        let snapshot: Vec<_> = self.observers.read().unwrap().iter().cloned().collect();
        for observer in snapshot {
            observer.update(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().unwrap().is_empty()
    }
}
