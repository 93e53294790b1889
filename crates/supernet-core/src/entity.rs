// ── Versioned mutable entity ──
//
// State container shared by projects and jobs. Every update goes through
// `EntityData::apply`, which enforces the entity's own transition rules
// and reports which fields actually changed. Snapshots are published on
// a `watch` channel; change sets on a broadcast bus.

use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use supernet_api::EventBus;

/// Data that can be held in a [`MutableEntity`].
pub trait EntityData: Clone + Send + Sync + 'static {
    /// Field discriminant used in change sets.
    type Field: Copy + Eq + Debug + Send + Sync + 'static;
    /// Partial update.
    type Delta;

    /// Merge `delta` into `self`, returning the fields whose value changed.
    fn apply(&mut self, delta: Self::Delta) -> Vec<Self::Field>;
}

/// One applied update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange<F> {
    pub version: u64,
    pub fields: Vec<F>,
}

#[derive(Debug)]
pub struct MutableEntity<D: EntityData> {
    state: watch::Sender<D>,
    version: AtomicU64,
    last_updated: Mutex<Instant>,
    changes: EventBus<EntityChange<D::Field>>,
}

impl<D: EntityData> MutableEntity<D> {
    pub fn new(data: D) -> Self {
        let (state, _) = watch::channel(data);
        Self {
            state,
            version: AtomicU64::new(0),
            last_updated: Mutex::new(Instant::now()),
            changes: EventBus::new(64),
        }
    }

    /// Apply a partial update. Returns the changed fields; an update that
    /// changes nothing still counts as activity for [`last_updated`].
    ///
    /// [`last_updated`]: Self::last_updated
    pub fn update(&self, delta: D::Delta) -> Vec<D::Field> {
        let mut changed = Vec::new();
        self.state.send_if_modified(|data| {
            changed = data.apply(delta);
            !changed.is_empty()
        });
        self.touch();

        if !changed.is_empty() {
            let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            self.changes.emit(EntityChange {
                version,
                fields: changed.clone(),
            });
        }
        changed
    }

    /// Copy of the current data.
    pub fn snapshot(&self) -> D {
        self.state.borrow().clone()
    }

    /// Read a projection of the current data without cloning all of it.
    pub fn read<T>(&self, f: impl FnOnce(&D) -> T) -> T {
        f(&self.state.borrow())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn last_updated(&self) -> Instant {
        *self
            .last_updated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record activity without changing data.
    pub fn touch(&self) {
        *self
            .last_updated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Snapshot stream: receivers see the latest data after each change.
    pub fn watch(&self) -> watch::Receiver<D> {
        self.state.subscribe()
    }

    /// Change-set stream.
    pub fn changes(&self) -> broadcast::Receiver<EntityChange<D::Field>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        value: u32,
        label: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum CounterField {
        Value,
        Label,
    }

    #[derive(Default)]
    struct CounterDelta {
        value: Option<u32>,
        label: Option<String>,
    }

    impl EntityData for Counter {
        type Field = CounterField;
        type Delta = CounterDelta;

        fn apply(&mut self, delta: CounterDelta) -> Vec<CounterField> {
            let mut changed = Vec::new();
            if let Some(v) = delta.value.filter(|v| *v > self.value) {
                self.value = v;
                changed.push(CounterField::Value);
            }
            if let Some(l) = delta.label.filter(|l| *l != self.label) {
                self.label = l;
                changed.push(CounterField::Label);
            }
            changed
        }
    }

    #[test]
    fn update_reports_only_changed_fields() {
        let entity = MutableEntity::new(Counter::default());
        let mut rx = entity.changes();

        let changed = entity.update(CounterDelta {
            value: Some(3),
            label: Some(String::new()),
        });
        assert_eq!(changed, vec![CounterField::Value]);
        assert_eq!(
            rx.try_recv().unwrap(),
            EntityChange {
                version: 1,
                fields: vec![CounterField::Value]
            }
        );
    }

    #[test]
    fn no_op_update_keeps_version_and_emits_nothing() {
        let entity = MutableEntity::new(Counter {
            value: 5,
            label: "a".into(),
        });
        let mut rx = entity.changes();

        assert!(
            entity
                .update(CounterDelta {
                    value: Some(2),
                    label: None,
                })
                .is_empty()
        );
        assert_eq!(entity.version(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(entity.snapshot().value, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn update_refreshes_last_updated() {
        let entity = MutableEntity::new(Counter::default());
        let before = entity.last_updated();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;

        entity.update(CounterDelta::default());
        assert_eq!(entity.last_updated() - before, std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn watch_sees_latest_snapshot() {
        let entity = MutableEntity::new(Counter::default());
        let mut rx = entity.watch();
        entity.update(CounterDelta {
            value: Some(9),
            label: None,
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().value, 9);
    }
}
