//! In-memory store: a process-local path tree with watcher fan-out.
//!
//! Backs tests and demos. Behaves like the remote store the SDK is
//! written against: snapshots are delivered to every overlapping
//! watcher on each mutation (the writer's own included), batched
//! writes notify once, and compare-and-set is atomic under the tree
//! lock. Extra knobs (`fire_disconnects`, `deny_writes_under`,
//! `set_auth_uid`) let tests drive the failure paths a real backend
//! would produce on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;

use crate::{DisconnectAction, StoreError, StorePath, Subscription};

struct Watcher {
    path: StorePath,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    watchers: Vec<Watcher>,
    disconnect_actions: HashMap<u64, StorePath>,
    denied_prefixes: Vec<StorePath>,
    auth_uid: Option<String>,
    next_action_id: u64,
    next_push_seq: u64,
}

/// In-process [`Store`](crate::Store) implementation.
///
/// Cloning yields another handle to the same tree, so one `MemoryStore`
/// can play the shared backend for several clients in a test.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Test knobs -------------------------------------------------------

    /// Runs and clears every registered on-disconnect action, as the
    /// backend would after losing this client's connection.
    pub fn fire_disconnects(&self) {
        let mut inner = self.inner.lock().unwrap();
        let actions: Vec<StorePath> =
            inner.disconnect_actions.drain().map(|(_, p)| p).collect();
        if actions.is_empty() {
            return;
        }
        for path in &actions {
            write_at(&mut inner.root, path, None);
        }
        notify(&mut inner, &actions);
    }

    /// Number of currently registered on-disconnect actions.
    pub fn pending_disconnect_actions(&self) -> usize {
        self.inner.lock().unwrap().disconnect_actions.len()
    }

    /// Makes every write under `prefix` fail with `PermissionDenied`,
    /// simulating the backend's access rules.
    pub fn deny_writes_under(&self, prefix: StorePath) {
        self.inner.lock().unwrap().denied_prefixes.push(prefix);
    }

    /// Clears all write denials.
    pub fn allow_all_writes(&self) {
        self.inner.lock().unwrap().denied_prefixes.clear();
    }

    /// Sets the verified identity the auth facility reports.
    pub fn set_auth_uid(&self, uid: Option<String>) {
        self.inner.lock().unwrap().auth_uid = uid;
    }

    // -- Internals --------------------------------------------------------

    fn check_writable(inner: &Inner, path: &StorePath) -> Result<(), StoreError> {
        for prefix in &inner.denied_prefixes {
            if path.is_within(prefix) {
                return Err(StoreError::PermissionDenied {
                    path: path.as_str().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn make_id(inner: &mut Inner) -> String {
        inner.next_push_seq += 1;
        let suffix: u32 = rand::rng().random_range(0..0x10000);
        // Fixed-width so ids sort in allocation order.
        format!("{:012}-{:04x}", inner.next_push_seq, suffix)
    }
}

fn value_at(root: &Value, path: &StorePath) -> Option<Value> {
    let mut cur = root;
    for seg in path.segments() {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur.clone())
}

fn write_at(root: &mut Value, path: &StorePath, value: Option<Value>) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        // Writing the root itself.
        *root = value.unwrap_or(Value::Object(Map::new()));
        return;
    };

    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = cur
            .as_object_mut()
            .expect("just ensured object")
            .entry((*seg).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    let obj = cur.as_object_mut().expect("just ensured object");
    match value {
        Some(v) => {
            obj.insert((*last).to_owned(), v);
        }
        None => {
            obj.remove(*last);
        }
    }
}

/// Delivers fresh snapshots to every watcher whose path overlaps one of
/// the touched paths. Watchers whose receiver is gone are pruned here.
fn notify(inner: &mut Inner, touched: &[StorePath]) {
    let root = inner.root.clone();
    inner.watchers.retain(|w| {
        let hit = touched
            .iter()
            .any(|t| t.is_within(&w.path) || w.path.is_within(t));
        if !hit {
            return true;
        }
        trace!(path = %w.path, "memory store notifying watcher");
        w.tx.send(value_at(&root, &w.path)).is_ok()
    });
}

#[async_trait]
impl crate::Store for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(value_at(&inner.root, path))
    }

    async fn set(&self, path: &StorePath, value: Option<Value>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, path)?;
        write_at(&mut inner.root, path, value);
        notify(&mut inner, std::slice::from_ref(path));
        Ok(())
    }

    async fn update(
        &self,
        changes: Vec<(StorePath, Option<Value>)>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for (path, _) in &changes {
            Self::check_writable(&inner, path)?;
        }
        let mut touched = Vec::with_capacity(changes.len());
        for (path, value) in changes {
            write_at(&mut inner.root, &path, value);
            touched.push(path);
        }
        notify(&mut inner, &touched);
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, path)?;
        let id = Self::make_id(&mut inner);
        let child = path.child(&id);
        write_at(&mut inner.root, &child, Some(value));
        notify(&mut inner, std::slice::from_ref(&child));
        Ok(id)
    }

    fn new_id(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        Self::make_id(&mut inner)
    }

    async fn compare_and_swap(
        &self,
        path: &StorePath,
        expected: Option<Value>,
        new: Option<Value>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, path)?;
        if value_at(&inner.root, path) != expected {
            return Ok(false);
        }
        write_at(&mut inner.root, path, new);
        notify(&mut inner, std::slice::from_ref(path));
        Ok(true)
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        // Initial snapshot before the watcher can observe any change.
        let _ = tx.send(value_at(&inner.root, path));
        inner.watchers.push(Watcher {
            path: path.clone(),
            tx,
        });
        Ok(Subscription::new(rx))
    }

    async fn register_on_disconnect(
        &self,
        path: &StorePath,
    ) -> Result<DisconnectAction, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner, path)?;
        inner.next_action_id += 1;
        let id = inner.next_action_id;
        inner.disconnect_actions.insert(id, path.clone());
        Ok(DisconnectAction(id))
    }

    async fn cancel_on_disconnect(
        &self,
        action: DisconnectAction,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnect_actions.remove(&action.0);
        Ok(())
    }

    async fn auth_ready(&self) {}

    async fn auth_uid(&self) -> Option<String> {
        self.inner.lock().unwrap().auth_uid.clone()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Store, paths};

    #[tokio::test]
    async fn test_get_returns_none_for_missing_path() {
        let store = MemoryStore::new();
        let got = store.get(&StorePath::new("rooms/r1/meta")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let store = MemoryStore::new();
        let path = paths::room_meta("r1");
        store.set(&path, Some(json!({"slug": "trivia"}))).await.unwrap();

        let got = store.get(&path).await.unwrap().unwrap();
        assert_eq!(got["slug"], "trivia");

        // Parent read sees the nested subtree.
        let parent = store.get(&paths::room("r1")).await.unwrap().unwrap();
        assert_eq!(parent["meta"]["slug"], "trivia");
    }

    #[tokio::test]
    async fn test_set_none_deletes() {
        let store = MemoryStore::new();
        let path = paths::player("r1", "u1");
        store.set(&path, Some(json!({"name": "Ada"}))).await.unwrap();
        store.set(&path, None).await.unwrap();
        assert!(store.get(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = MemoryStore::new();
        let path = paths::players("r1");
        store
            .set(&paths::player("r1", "u1"), Some(json!({"name": "Ada"})))
            .await
            .unwrap();

        let mut sub = store.subscribe(&path).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first["u1"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_subscribe_sees_descendant_writes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&paths::players("r1")).await.unwrap();
        assert!(sub.next().await.unwrap().is_none()); // initial, empty

        store
            .set(&paths::player("r1", "u1"), Some(json!({"name": "Ada"})))
            .await
            .unwrap();
        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap["u1"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_writer_observes_own_write() {
        // The sync layer relies on this: there is no separate local
        // apply step, the subscription echo is the local apply.
        let store = MemoryStore::new();
        let path = paths::room_meta("r1");
        let mut sub = store.subscribe(&path).await.unwrap();
        let _ = sub.next().await;

        store.set(&path, Some(json!({"status": "lobby"}))).await.unwrap();
        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap["status"], "lobby");
    }

    #[tokio::test]
    async fn test_batched_update_notifies_once() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&paths::room("r1")).await.unwrap();
        let _ = sub.next().await;

        store
            .update(vec![
                (paths::room_meta("r1"), Some(json!({"slug": "s"}))),
                (paths::player("r1", "u1"), Some(json!({"name": "Ada"}))),
            ])
            .await
            .unwrap();

        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap["meta"]["slug"], "s");
        assert_eq!(snap["players"]["u1"]["name"], "Ada");
        // Exactly one notification for the batch.
        tokio::task::yield_now().await;
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), sub.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap_commits_only_on_match() {
        let store = MemoryStore::new();
        let path = paths::code("ABCD");

        // Reserve-if-absent.
        let won = store
            .compare_and_swap(&path, None, Some(json!({"roomId": "r1"})))
            .await
            .unwrap();
        assert!(won);

        // Second reservation loses.
        let lost = store
            .compare_and_swap(&path, None, Some(json!({"roomId": "r2"})))
            .await
            .unwrap();
        assert!(!lost);
        let got = store.get(&path).await.unwrap().unwrap();
        assert_eq!(got["roomId"], "r1");
    }

    #[tokio::test]
    async fn test_push_ids_sort_in_allocation_order() {
        let store = MemoryStore::new();
        let path = paths::chat("r1");
        let a = store.push(&path, json!({"n": 1})).await.unwrap();
        let b = store.push(&path, json!({"n": 2})).await.unwrap();
        let c = store.push(&path, json!({"n": 3})).await.unwrap();
        assert!(a < b && b < c);

        let snap = store.get(&path).await.unwrap().unwrap();
        assert_eq!(snap.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fire_disconnects_removes_registered_paths() {
        let store = MemoryStore::new();
        let p = paths::player("r1", "u1");
        store.set(&p, Some(json!({"name": "Ada"}))).await.unwrap();
        store.register_on_disconnect(&p).await.unwrap();

        store.fire_disconnects();
        assert!(store.get(&p).await.unwrap().is_none());
        assert_eq!(store.pending_disconnect_actions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_disconnect_action_does_not_fire() {
        let store = MemoryStore::new();
        let p = paths::player("r1", "u1");
        store.set(&p, Some(json!({"name": "Ada"}))).await.unwrap();
        let action = store.register_on_disconnect(&p).await.unwrap();

        store.cancel_on_disconnect(action).await.unwrap();
        store.fire_disconnects();
        assert!(store.get(&p).await.unwrap().is_some());

        // Cancelling again is a no-op.
        store.cancel_on_disconnect(action).await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_prefix_rejects_writes_with_permission_error() {
        let store = MemoryStore::new();
        store.deny_writes_under(StorePath::new("codes"));

        let err = store
            .set(&paths::code("ABCD"), Some(json!({"roomId": "r1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));

        // Reads are unaffected, and other subtrees still accept writes.
        assert!(store.get(&paths::code("ABCD")).await.unwrap().is_none());
        store
            .set(&paths::room_meta("r1"), Some(json!({"slug": "s"})))
            .await
            .unwrap();

        store.allow_all_writes();
        store
            .set(&paths::code("ABCD"), Some(json!({"roomId": "r1"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auth_uid_reports_configured_identity() {
        let store = MemoryStore::new();
        assert!(store.auth_uid().await.is_none());
        store.set_auth_uid(Some("verified-1".into()));
        store.auth_ready().await;
        assert_eq!(store.auth_uid().await.as_deref(), Some("verified-1"));
    }
}
