//! Abstract remote-store capability for lobbysync.
//!
//! The whole SDK talks to shared state through the [`Store`] trait: a
//! path-addressed tree offering reads, subscriptions that deliver a
//! full snapshot on every change, unconditional and multi-path writes,
//! single-key compare-and-set, disconnect-triggered cleanup actions,
//! and an identity/auth facility. There is no server-side application
//! logic behind it — every rule this SDK enforces runs in the client.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and
//! demos; a production binding wraps whatever realtime database the
//! deployment uses. Components receive the store as an explicitly
//! injected `Arc<dyn Store>` so either can be swapped in.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Shared handle to a store implementation.
pub type SharedStore = Arc<dyn Store>;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A slash-separated location in the store tree.
///
/// Paths are plain data — building one never touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Appends a child segment.
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Whether `self` is `other` or a descendant of it. Used to decide
    /// which watchers a mutation touches.
    pub fn is_within(&self, other: &StorePath) -> bool {
        self.0 == other.0
            || (self.0.len() > other.0.len()
                && self.0.starts_with(other.0.as_str())
                && self.0.as_bytes()[other.0.len()] == b'/')
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical path layout the SDK uses.
///
/// Everything belonging to a room lives under `rooms/{roomId}`; the
/// join-code mapping is a separate global namespace so codes can be
/// resolved without knowing a room id.
pub mod paths {
    use super::StorePath;

    pub fn room(room_id: &str) -> StorePath {
        StorePath::new(format!("rooms/{room_id}"))
    }

    pub fn room_meta(room_id: &str) -> StorePath {
        room(room_id).child("meta")
    }

    pub fn room_options(room_id: &str) -> StorePath {
        room_meta(room_id).child("options")
    }

    pub fn players(room_id: &str) -> StorePath {
        room(room_id).child("players")
    }

    pub fn player(room_id: &str, player_id: &str) -> StorePath {
        players(room_id).child(player_id)
    }

    pub fn chat(room_id: &str) -> StorePath {
        room(room_id).child("chat")
    }

    pub fn ready(room_id: &str) -> StorePath {
        room(room_id).child("ready")
    }

    pub fn ready_entry(room_id: &str, player_id: &str) -> StorePath {
        ready(room_id).child(player_id)
    }

    pub fn reactions(room_id: &str) -> StorePath {
        room(room_id).child("reactions")
    }

    pub fn reaction(room_id: &str, reaction_id: &str) -> StorePath {
        reactions(room_id).child(reaction_id)
    }

    pub fn presence(room_id: &str) -> StorePath {
        room(room_id).child("presence")
    }

    pub fn presence_entry(room_id: &str, player_id: &str) -> StorePath {
        presence(room_id).child(player_id)
    }

    pub fn code(code: &str) -> StorePath {
        StorePath::new(format!("codes/{code}"))
    }
}

// ---------------------------------------------------------------------------
// Subscriptions and disconnect actions
// ---------------------------------------------------------------------------

/// A live subscription to one path.
///
/// The first snapshot arrives immediately on registration; afterwards a
/// fresh snapshot of the whole subtree is delivered on every change,
/// including the subscriber's own writes. Dropping the subscription
/// unregisters it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self { rx }
    }

    /// Next snapshot, or `None` once the store side is gone.
    /// Cancel-safe, so it can sit in a `select!` arm.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }
}

/// Handle to a registered on-disconnect action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectAction(pub u64);

// ---------------------------------------------------------------------------
// The capability trait
// ---------------------------------------------------------------------------

/// The remote data capability every lobbysync component is built on.
///
/// Mutation discipline is last-write-wins at path granularity, except
/// [`compare_and_swap`](Store::compare_and_swap) which is the one
/// atomic primitive (used for join-code reservation and the ready
/// toggle).
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the subtree at `path`. `None` means nothing is stored there.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Writes (`Some`) or deletes (`None`) the subtree at `path`.
    async fn set(&self, path: &StorePath, value: Option<Value>) -> Result<(), StoreError>;

    /// Applies several writes/deletes as one batch. Observers see a
    /// single change notification for the whole batch.
    async fn update(
        &self,
        changes: Vec<(StorePath, Option<Value>)>,
    ) -> Result<(), StoreError>;

    /// Appends `value` under a fresh store-assigned id and returns the
    /// id. Ids sort in allocation order, which is what lets callers use
    /// them as a tiebreak next to client-assigned timestamps.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Allocates an id of the same shape [`push`](Store::push) uses,
    /// without writing anything.
    fn new_id(&self) -> String;

    /// Atomically replaces the value at `path` with `new` only if the
    /// current value equals `expected`. Returns whether the swap
    /// committed.
    async fn compare_and_swap(
        &self,
        path: &StorePath,
        expected: Option<Value>,
        new: Option<Value>,
    ) -> Result<bool, StoreError>;

    /// Subscribes to `path`. See [`Subscription`] for delivery rules.
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, StoreError>;

    /// Registers a deletion of `path` to run automatically if this
    /// client's connection is lost.
    async fn register_on_disconnect(
        &self,
        path: &StorePath,
    ) -> Result<DisconnectAction, StoreError>;

    /// Cancels a registered on-disconnect action. Resolves only once
    /// the action is deregistered, so callers may safely delete the
    /// path themselves afterwards. Cancelling twice is a no-op.
    async fn cancel_on_disconnect(
        &self,
        action: DisconnectAction,
    ) -> Result<(), StoreError>;

    /// Resolves once the auth facility has decided whether a verified
    /// identity is available. Implementations must bound this
    /// internally; callers additionally time-box it.
    async fn auth_ready(&self);

    /// The verified identity, if the auth facility produced one.
    async fn auth_uid(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_child_and_segments() {
        let p = StorePath::new("rooms").child("r1").child("meta");
        assert_eq!(p.as_str(), "rooms/r1/meta");
        let segs: Vec<&str> = p.segments().collect();
        assert_eq!(segs, vec!["rooms", "r1", "meta"]);
    }

    #[test]
    fn test_is_within_requires_segment_boundary() {
        let parent = StorePath::new("rooms/r1");
        assert!(StorePath::new("rooms/r1").is_within(&parent));
        assert!(StorePath::new("rooms/r1/meta").is_within(&parent));
        // "rooms/r10" shares a string prefix but is a sibling.
        assert!(!StorePath::new("rooms/r10").is_within(&parent));
        assert!(!StorePath::new("rooms").is_within(&parent));
    }

    #[test]
    fn test_room_path_layout() {
        assert_eq!(paths::room_meta("r1").as_str(), "rooms/r1/meta");
        assert_eq!(paths::player("r1", "u1").as_str(), "rooms/r1/players/u1");
        assert_eq!(paths::ready_entry("r1", "u1").as_str(), "rooms/r1/ready/u1");
        assert_eq!(paths::code("ABCD").as_str(), "codes/ABCD");
        assert_eq!(
            paths::presence_entry("r1", "u1").as_str(),
            "rooms/r1/presence/u1"
        );
    }
}
