// ============================================
// Pinned Datasets
// ============================================
//
// A dataset reused by several stages of a run is materialized once and
// pinned. The pin is a guard: dropping it releases the dataset, so every
// exit path (including errors) unpins. The registry is shared by every run
// of a pipeline and keys each pin by (run id, dataset), so overlapping runs
// never release each other's entries and leaks stay observable.

use dashmap::DashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// One pinned dataset of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinKey {
    pub run_id: Uuid,
    pub dataset: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEventKind {
    Pinned { rows: usize },
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub key: PinKey,
    pub kind: PinEventKind,
}

#[derive(Debug, Clone)]
pub struct PinRegistry {
    pinned: Arc<DashMap<PinKey, usize>>,
    events: broadcast::Sender<PinEvent>,
}

impl Default for PinRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pinned: Arc::new(DashMap::new()),
            events,
        }
    }
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every live pin across runs, sorted by run then dataset.
    pub fn pinned(&self) -> Vec<PinKey> {
        let mut keys: Vec<PinKey> = self.pinned.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Datasets pinned by `run_id`, sorted.
    pub fn pinned_by(&self, run_id: Uuid) -> Vec<&'static str> {
        self.pinned()
            .into_iter()
            .filter(|key| key.run_id == run_id)
            .map(|key| key.dataset)
            .collect()
    }

    pub fn is_pinned(&self, run_id: Uuid, dataset: &'static str) -> bool {
        self.pinned.contains_key(&PinKey { run_id, dataset })
    }

    /// Receive pin and release events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.events.subscribe()
    }

    fn record(&self, key: PinKey, rows: usize) {
        self.pinned.insert(key, rows);
        self.notify(key, PinEventKind::Pinned { rows });
    }

    fn remove(&self, key: PinKey) {
        self.pinned.remove(&key);
        self.notify(key, PinEventKind::Released);
    }

    fn notify(&self, key: PinKey, kind: PinEventKind) {
        // no subscribers is fine
        let _ = self.events.send(PinEvent { key, kind });
    }
}

/// A materialized dataset held for the duration of its consumers.
#[derive(Debug)]
pub struct Pinned<T> {
    key: PinKey,
    value: T,
    registry: PinRegistry,
}

impl<T> Pinned<T> {
    /// Pin an already materialized dataset of `rows` rows for `run_id`.
    pub fn pin(
        registry: &PinRegistry,
        run_id: Uuid,
        dataset: &'static str,
        value: T,
        rows: usize,
    ) -> Self {
        let key = PinKey { run_id, dataset };
        registry.record(key, rows);
        info!(dataset = dataset, rows = rows, "Pinned dataset");

        Self {
            key,
            value,
            registry: registry.clone(),
        }
    }

    /// Release the dataset after its last use.
    pub fn release(self) {
        drop(self)
    }
}

impl<T> Deref for Pinned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Pinned<T> {
    fn drop(&mut self) {
        self.registry.remove(self.key);
        info!(dataset = self.key.dataset, "Released dataset");
    }
}
