/// Object registry: the replicated in-memory object set.
///
/// Pure state plus change notification. All operations are infallible;
/// conflict resolution is the version gate alone: a replacing value is
/// accepted iff its version is strictly greater than the stored one.
/// Writers hold the internal lock only for the mutation (broadcast
/// sends are non-blocking), which keeps per-id emission order equal to
/// apply order.
use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use asinka_wire::{ObjectDelete, ObjectUpdate, SyncObject, TaggedValue};

/// Buffer for the global change stream per subscriber.
const GLOBAL_BUFFER: usize = 256;
/// Buffer for each per-id stream per subscriber.
const PER_ID_BUFFER: usize = 64;

/// A change on the global stream.
#[derive(Debug, Clone)]
pub enum ObjectChange {
    /// The object was inserted or replaced; carries the new value.
    Updated(SyncObject),
    /// The object was removed. `origin_session` names the session a
    /// remote delete arrived on; empty for local deletes.
    Deleted {
        object_id: String,
        type_name: String,
        origin_session: String,
    },
}

/// Hot subscription to registry changes.
///
/// Holds only a receiver; dropping it detaches the observer without
/// touching the registry. A subscriber that falls behind loses oldest
/// entries; [`ChangeStream::dropped`] counts them (the registry's own
/// state is never affected).
pub struct ChangeStream<T> {
    rx: broadcast::Receiver<T>,
    dropped: u64,
}

impl<T: Clone> ChangeStream<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx, dropped: 0 }
    }

    /// Next change; `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(n)) => self.dropped += n,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when empty or closed.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.dropped += n,
                Err(_) => return None,
            }
        }
    }

    /// How many changes this subscriber has lost to back-pressure.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

struct Inner {
    objects: HashMap<String, SyncObject>,
    /// Per-id watcher senders, pruned once their last receiver is gone.
    watchers: HashMap<String, broadcast::Sender<SyncObject>>,
}

/// In-memory map of syncable objects with change streams.
pub struct ObjectRegistry {
    inner: RwLock<Inner>,
    global_tx: broadcast::Sender<ObjectChange>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(GLOBAL_BUFFER);
        Self {
            inner: RwLock::new(Inner {
                objects: HashMap::new(),
                watchers: HashMap::new(),
            }),
            global_tx,
        }
    }

    /// Insert or replace unconditionally; the caller's mutation always
    /// wins locally. Emits `Updated` on the per-id and global streams.
    pub fn register(&self, object: SyncObject) {
        let mut inner = self.inner.write();
        inner
            .objects
            .insert(object.object_id.clone(), object.clone());
        self.emit_updated(&mut inner, object);
    }

    /// Apply a partial mutation field by field. No-op when the id is
    /// unknown. Unknown field names are inserted (schema-tolerant).
    /// Bumps the version and marks the value locally authored.
    pub fn update(&self, object_id: &str, fields: HashMap<String, TaggedValue>) {
        let mut inner = self.inner.write();
        let snapshot = {
            let Some(object) = inner.objects.get_mut(object_id) else {
                return;
            };
            for (name, value) in fields {
                object.fields.insert(name, value);
            }
            object.version += 1;
            object.origin_session.clear();
            object.clone()
        };
        self.emit_updated(&mut inner, snapshot);
    }

    /// Remove if present; emits `Deleted` on the global stream. No
    /// error and no emission when the id is unknown (idempotent).
    pub fn delete(&self, object_id: &str) {
        let mut inner = self.inner.write();
        let Some(object) = inner.objects.remove(object_id) else {
            return;
        };
        let _ = self.global_tx.send(ObjectChange::Deleted {
            object_id: object.object_id,
            type_name: object.type_name,
            origin_session: String::new(),
        });
    }

    /// Snapshot of the current value. Never blocks beyond the read lock.
    pub fn get(&self, object_id: &str) -> Option<SyncObject> {
        self.inner.read().objects.get(object_id).cloned()
    }

    /// Number of objects currently held.
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    /// Hot stream of subsequent values for one id. The current value is
    /// not replayed on subscription.
    pub fn observe(&self, object_id: &str) -> ChangeStream<SyncObject> {
        let mut inner = self.inner.write();
        let tx = inner
            .watchers
            .entry(object_id.to_string())
            .or_insert_with(|| broadcast::channel(PER_ID_BUFFER).0);
        ChangeStream::new(tx.subscribe())
    }

    /// Hot stream of all changes.
    pub fn observe_all(&self) -> ChangeStream<ObjectChange> {
        ChangeStream::new(self.global_tx.subscribe())
    }

    /// The version gate. Insert when absent; replace and emit only when
    /// the incoming version is strictly greater; otherwise drop
    /// silently, since stale versions are not an error.
    pub fn apply_remote_update(&self, update: ObjectUpdate) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.objects.get(&update.object_id) {
            if existing.version >= update.version {
                tracing::trace!(
                    object_id = %update.object_id,
                    local = existing.version,
                    remote = update.version,
                    "dropping stale remote update"
                );
                return;
            }
        }
        let object = update.into_object();
        inner
            .objects
            .insert(object.object_id.clone(), object.clone());
        self.emit_updated(&mut inner, object);
    }

    /// Remove and emit `Deleted` if present, else drop silently.
    pub fn apply_remote_delete(&self, delete: ObjectDelete) {
        let mut inner = self.inner.write();
        if inner.objects.remove(&delete.object_id).is_none() {
            return;
        }
        let _ = self.global_tx.send(ObjectChange::Deleted {
            object_id: delete.object_id,
            type_name: delete.type_name,
            origin_session: delete.session_id,
        });
    }

    fn emit_updated(&self, inner: &mut Inner, object: SyncObject) {
        let prune = match inner.watchers.get(&object.object_id) {
            Some(tx) if tx.receiver_count() > 0 => {
                let _ = tx.send(object.clone());
                false
            }
            Some(_) => true,
            None => false,
        };
        if prune {
            inner.watchers.remove(&object.object_id);
        }
        let _ = self.global_tx.send(ObjectChange::Updated(object));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, version: u32) -> SyncObject {
        let mut object = SyncObject::new(id, "Task")
            .with_field("title", "buy milk")
            .with_field("completed", false);
        object.version = version;
        object
    }

    fn remote_update(id: &str, version: u32, session: &str) -> ObjectUpdate {
        let mut object = task(id, version);
        object.set_field("title", "from remote");
        ObjectUpdate::from_object(&object, session)
    }

    #[test]
    fn get_reflects_most_recent_call() {
        let registry = ObjectRegistry::new();

        registry.register(task("t1", 1));
        assert_eq!(registry.get("t1").unwrap().version, 1);

        registry.update(
            "t1",
            HashMap::from([("completed".to_string(), TaggedValue::from(true))]),
        );
        let current = registry.get("t1").unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.field("completed").unwrap().as_bool(), Some(true));

        registry.delete("t1");
        assert!(registry.get("t1").is_none());
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let registry = ObjectRegistry::new();
        registry.update(
            "missing",
            HashMap::from([("x".to_string(), TaggedValue::Null)]),
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn update_inserts_unknown_fields() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));
        registry.update(
            "t1",
            HashMap::from([("brand_new".to_string(), TaggedValue::from(9i64))]),
        );
        let current = registry.get("t1").unwrap();
        assert_eq!(current.field("brand_new").unwrap().as_i64(), Some(9));
    }

    #[test]
    fn update_clears_origin() {
        let registry = ObjectRegistry::new();
        registry.apply_remote_update(remote_update("t1", 1, "sess-a"));
        assert_eq!(registry.get("t1").unwrap().origin_session, "sess-a");

        registry.update(
            "t1",
            HashMap::from([("completed".to_string(), TaggedValue::from(true))]),
        );
        assert!(registry.get("t1").unwrap().is_local());
    }

    #[test]
    fn delete_is_idempotent() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));

        let mut changes = registry.observe_all();
        registry.delete("t1");
        registry.delete("t1");

        match changes.try_recv() {
            Some(ObjectChange::Deleted { object_id, type_name, .. }) => {
                assert_eq!(object_id, "t1");
                assert_eq!(type_name, "Task");
            }
            other => panic!("expected Deleted, got {other:?}"),
        }
        assert!(changes.try_recv().is_none(), "second delete must not emit");
    }

    #[test]
    fn version_gate_accepts_strictly_greater() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 2));

        // Equal version: dropped.
        registry.apply_remote_update(remote_update("t1", 2, "sess-a"));
        assert_eq!(registry.get("t1").unwrap().field("title").unwrap().as_str(), Some("buy milk"));

        // Lower version: dropped.
        registry.apply_remote_update(remote_update("t1", 1, "sess-a"));
        assert_eq!(registry.get("t1").unwrap().version, 2);

        // Strictly greater: accepted, origin recorded.
        registry.apply_remote_update(remote_update("t1", 3, "sess-a"));
        let current = registry.get("t1").unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.origin_session, "sess-a");
        assert_eq!(current.field("title").unwrap().as_str(), Some("from remote"));
    }

    #[test]
    fn version_gate_emits_nothing_on_drop() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 2));

        let mut changes = registry.observe_all();
        registry.apply_remote_update(remote_update("t1", 2, "sess-a"));
        assert!(changes.try_recv().is_none());
    }

    #[test]
    fn remote_update_inserts_when_absent() {
        let registry = ObjectRegistry::new();
        registry.apply_remote_update(remote_update("t1", 1, "sess-a"));
        assert_eq!(registry.get("t1").unwrap().version, 1);
    }

    #[test]
    fn remote_delete_unknown_id_is_silent() {
        let registry = ObjectRegistry::new();
        let mut changes = registry.observe_all();
        registry.apply_remote_delete(ObjectDelete::new("ghost", "Task", "sess-a"));
        assert!(changes.try_recv().is_none());
    }

    #[tokio::test]
    async fn observe_does_not_replay_current_value() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));

        let mut stream = registry.observe("t1");
        assert!(stream.try_recv().is_none());

        registry.update(
            "t1",
            HashMap::from([("completed".to_string(), TaggedValue::from(true))]),
        );
        let seen = stream.recv().await.unwrap();
        assert_eq!(seen.version, 2);
    }

    #[tokio::test]
    async fn per_id_order_matches_apply_order() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));

        let mut stream = registry.observe("t1");
        for i in 0..10u32 {
            registry.update(
                "t1",
                HashMap::from([("counter".to_string(), TaggedValue::from(i as i64))]),
            );
        }

        for i in 0..10u32 {
            let seen = stream.recv().await.unwrap();
            assert_eq!(seen.version, 2 + i);
            assert_eq!(seen.field("counter").unwrap().as_i64(), Some(i as i64));
        }
    }

    #[tokio::test]
    async fn per_id_stream_is_subsequence_of_global() {
        let registry = ObjectRegistry::new();
        registry.register(task("a", 1));
        registry.register(task("b", 1));

        let mut per_id = registry.observe("a");
        let mut global = registry.observe_all();

        registry.update("a", HashMap::from([("n".to_string(), TaggedValue::from(1i64))]));
        registry.update("b", HashMap::from([("n".to_string(), TaggedValue::from(2i64))]));
        registry.update("a", HashMap::from([("n".to_string(), TaggedValue::from(3i64))]));

        let mut global_for_a = Vec::new();
        for _ in 0..3 {
            if let Some(ObjectChange::Updated(obj)) = global.recv().await {
                if obj.object_id == "a" {
                    global_for_a.push(obj.field("n").unwrap().as_i64().unwrap());
                }
            }
        }

        let mut per_id_values = Vec::new();
        for _ in 0..2 {
            let obj = per_id.recv().await.unwrap();
            per_id_values.push(obj.field("n").unwrap().as_i64().unwrap());
        }

        assert_eq!(per_id_values, global_for_a);
    }

    #[test]
    fn lagging_subscriber_counts_drops() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));

        let mut stream = registry.observe_all();
        // Overflow the per-subscriber buffer without draining.
        for i in 0..(GLOBAL_BUFFER as u32 + 50) {
            registry.update(
                "t1",
                HashMap::from([("n".to_string(), TaggedValue::from(i as i64))]),
            );
        }

        let mut received = 0u64;
        while stream.try_recv().is_some() {
            received += 1;
        }
        assert!(stream.dropped() > 0, "expected lag to be counted");
        assert_eq!(received + stream.dropped(), GLOBAL_BUFFER as u64 + 50);

        // Registry state unaffected by observer lag.
        assert_eq!(registry.get("t1").unwrap().version, GLOBAL_BUFFER as u32 + 51);
    }

    #[test]
    fn one_entry_per_id() {
        let registry = ObjectRegistry::new();
        registry.register(task("t1", 1));
        registry.register(task("t1", 7));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t1").unwrap().version, 7);
    }
}
