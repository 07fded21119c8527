//! Bookkeeping for worker threads. Records are registered at spawn and
//! pruned lazily once their thread has terminated; nothing here joins.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};

use bcs_core::{InterruptFlag, WorkerInfo, WorkerKind, WorkerState};

pub(crate) struct WorkerRecord {
    pub id: u64,
    pub name: String,
    pub command: String,
    pub kind: WorkerKind,
    pub interrupt: InterruptFlag,
    pub handle: JoinHandle<()>,
}

impl WorkerRecord {
    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            name: self.name.clone(),
            command: self.command.clone(),
            kind: self.kind,
            state: if self.handle.is_finished() {
                WorkerState::Finished
            } else {
                WorkerState::Running
            },
            interrupted: self.interrupt.is_raised(),
        }
    }
}

#[derive(Default)]
struct Lists {
    source: Vec<WorkerRecord>,
    command: Vec<WorkerRecord>,
    eval: Vec<WorkerRecord>,
}

impl Lists {
    fn for_kind(&mut self, kind: WorkerKind) -> &mut Vec<WorkerRecord> {
        match kind {
            WorkerKind::Source => &mut self.source,
            WorkerKind::Command => &mut self.command,
            WorkerKind::Eval => &mut self.eval,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.source
            .iter()
            .chain(self.command.iter())
            .chain(self.eval.iter())
    }

    fn len(&self) -> usize {
        self.source.len() + self.command.len() + self.eval.len()
    }
}

pub(crate) struct WorkerRegistry {
    next_id: AtomicU64,
    lists: Mutex<Lists>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            lists: Mutex::new(Lists::default()),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register(&self, record: WorkerRecord) {
        tracing::debug!(id = record.id, kind = record.kind.label(), "worker registered");
        let mut lists = self.lists.lock().unwrap();
        lists.for_kind(record.kind).push(record);
    }

    /// Drops records whose thread has terminated; returns how many went.
    pub fn prune(&self) -> usize {
        let removed = {
            let mut lists = self.lists.lock().unwrap();
            let before = lists.len();
            lists.source.retain(|record| !record.handle.is_finished());
            lists.command.retain(|record| !record.handle.is_finished());
            lists.eval.retain(|record| !record.handle.is_finished());
            before - lists.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "pruned terminated workers");
        }
        removed
    }

    /// Raises the interrupt flag of every live worker, sparing the thread
    /// with the given id so a worker-initiated abort does not cancel itself.
    pub fn interrupt_all(&self, spare: Option<ThreadId>) -> usize {
        let raised = {
            let lists = self.lists.lock().unwrap();
            let mut raised = 0;
            for record in lists.iter() {
                if record.handle.is_finished() {
                    continue;
                }
                if spare == Some(record.handle.thread().id()) {
                    continue;
                }
                record.interrupt.raise();
                raised += 1;
            }
            raised
        };
        if raised > 0 {
            tracing::info!(workers = raised, "interrupt requested for live workers");
        }
        raised
    }

    pub fn infos(&self) -> Vec<WorkerInfo> {
        let lists = self.lists.lock().unwrap();
        lists.iter().map(WorkerRecord::info).collect()
    }

    pub fn live_count(&self) -> usize {
        let lists = self.lists.lock().unwrap();
        lists
            .iter()
            .filter(|record| !record.handle.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Record whose thread parks until the returned sender is dropped or
    /// signalled.
    fn parked_record(registry: &WorkerRegistry, kind: WorkerKind) -> (WorkerRecord, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel::<()>();
        let id = registry.next_id();
        let handle = thread::Builder::new()
            .name(format!("test-{id}"))
            .spawn(move || {
                let _ = rx.recv();
            })
            .expect("spawn parked thread");
        let record = WorkerRecord {
            id,
            name: format!("test-{id}"),
            command: "park".to_string(),
            kind,
            interrupt: InterruptFlag::new(),
            handle,
        };
        (record, tx)
    }

    #[test]
    fn prune_drops_only_terminated_records() {
        let registry = WorkerRegistry::new();
        let (live, keep_alive) = parked_record(&registry, WorkerKind::Command);
        let (dead, release) = parked_record(&registry, WorkerKind::Eval);
        registry.register(live);
        registry.register(dead);

        drop(release);
        wait_until(|| registry.live_count() == 1);

        assert_eq!(registry.prune(), 1);
        let infos = registry.infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].kind, WorkerKind::Command);
        assert_eq!(infos[0].state, WorkerState::Running);

        drop(keep_alive);
        wait_until(|| registry.live_count() == 0);
        assert_eq!(registry.prune(), 1);
        assert!(registry.infos().is_empty());
    }

    #[test]
    fn interrupt_all_spares_the_named_thread() {
        let registry = WorkerRegistry::new();
        let (spared, release_spared) = parked_record(&registry, WorkerKind::Command);
        let (other, release_other) = parked_record(&registry, WorkerKind::Command);
        let spared_id = spared.handle.thread().id();
        let spared_flag = spared.interrupt.clone();
        let other_flag = other.interrupt.clone();
        registry.register(spared);
        registry.register(other);

        assert_eq!(registry.interrupt_all(Some(spared_id)), 1);
        assert!(!spared_flag.is_raised());
        assert!(other_flag.is_raised());

        drop(release_spared);
        drop(release_other);
        wait_until(|| registry.live_count() == 0);
    }

    #[test]
    fn infos_reflect_the_interrupt_flag() {
        let registry = WorkerRegistry::new();
        let (record, release) = parked_record(&registry, WorkerKind::Source);
        let flag = record.interrupt.clone();
        registry.register(record);

        assert!(!registry.infos()[0].interrupted);
        flag.raise();
        assert!(registry.infos()[0].interrupted);

        drop(release);
        wait_until(|| registry.live_count() == 0);
    }

    #[test]
    fn ids_are_unique() {
        let registry = WorkerRegistry::new();
        let first = registry.next_id();
        let second = registry.next_id();
        assert_ne!(first, second);
    }
}
