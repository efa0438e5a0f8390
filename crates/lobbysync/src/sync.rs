//! Room synchronizer: one actor task per joined room.
//!
//! The actor owns the five store subscriptions a room needs — metadata,
//! players, chat, ready set, reactions — and republishes a full,
//! consistent snapshot through a `tokio::sync::watch` channel whenever
//! any of them change. Watch channels give subscribers the two
//! guarantees the lobby needs: a newly registered listener immediately
//! observes the most recent snapshot, and fan-out never mutates a
//! listener list mid-iteration.
//!
//! Chat is the one derived view: the confirmed log from the store is
//! merged with this client's local echoes (shadow-muted sends) on every
//! change to either, and echoes older than the retention window fall
//! out at each recomputation.

use std::collections::BTreeSet;
use std::sync::Arc;

use lobbysync_model::{
    ChatMessage, Player, PlayerId, ReactionEvent, Room, RoomId, epoch_ms,
};
use lobbysync_store::{SharedStore, Subscription, paths};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::LobbyError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the synchronizer, resolved from `LobbyConfig`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncConfig {
    /// How long a local echo stays visible.
    pub echo_retention_ms: u64,
    /// Reaction-log length above which the host prunes.
    pub reaction_log_limit: usize,
    /// Minimum gap between two pruning passes by the same host.
    pub prune_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_retention_ms: 60_000,
            reaction_log_limit: 50,
            prune_backoff_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// The snapshot publishers for one client. Created once with the
/// client and reused across rooms; leaving a room resets them all.
pub(crate) struct RoomChannels {
    pub room: watch::Sender<Option<Room>>,
    pub players: watch::Sender<Vec<Player>>,
    pub chat: watch::Sender<Vec<ChatMessage>>,
    pub ready: watch::Sender<BTreeSet<PlayerId>>,
    pub reactions: watch::Sender<Vec<ReactionEvent>>,
}

impl RoomChannels {
    pub fn new() -> Self {
        Self {
            room: watch::channel(None).0,
            players: watch::channel(Vec::new()).0,
            chat: watch::channel(Vec::new()).0,
            ready: watch::channel(BTreeSet::new()).0,
            reactions: watch::channel(Vec::new()).0,
        }
    }

    /// Clears every channel back to its empty state.
    pub fn reset(&self) {
        self.room.send_replace(None);
        self.players.send_replace(Vec::new());
        self.chat.send_replace(Vec::new());
        self.ready.send_replace(BTreeSet::new());
        self.reactions.send_replace(Vec::new());
    }
}

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

/// Commands sent into the sync actor.
pub(crate) enum SyncCommand {
    /// Adds a client-only echo to the merged chat view.
    PushEcho(ChatMessage),
    /// Ends the actor, dropping its subscriptions.
    Stop,
}

/// Handle to a running sync actor. Cheap to clone.
#[derive(Clone)]
pub(crate) struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub(crate) async fn push_echo(&self, msg: ChatMessage) {
        let _ = self.tx.send(SyncCommand::PushEcho(msg)).await;
    }

    pub(crate) async fn stop(&self) {
        let _ = self.tx.send(SyncCommand::Stop).await;
    }
}

/// Subscribes to all five of a room's channels and spawns the actor.
pub(crate) async fn spawn_room_sync(
    store: SharedStore,
    room_id: RoomId,
    self_id: PlayerId,
    channels: Arc<RoomChannels>,
    config: SyncConfig,
) -> Result<SyncHandle, LobbyError> {
    let rid = room_id.as_str();
    let meta_sub = store.subscribe(&paths::room_meta(rid)).await?;
    let players_sub = store.subscribe(&paths::players(rid)).await?;
    let chat_sub = store.subscribe(&paths::chat(rid)).await?;
    let ready_sub = store.subscribe(&paths::ready(rid)).await?;
    let reactions_sub = store.subscribe(&paths::reactions(rid)).await?;

    let (tx, rx) = mpsc::channel(32);
    let actor = SyncActor {
        store,
        room_id,
        self_id,
        channels,
        config,
        confirmed: Vec::new(),
        echoes: Vec::new(),
        last_prune_ms: 0,
    };
    let streams = SyncStreams {
        meta: meta_sub,
        players: players_sub,
        chat: chat_sub,
        ready: ready_sub,
        reactions: reactions_sub,
        rx,
    };
    tokio::spawn(actor.run(streams));

    Ok(SyncHandle { tx })
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The actor's inputs: the five store subscriptions plus the command
/// channel. Kept apart from the state so the select loop can poll the
/// streams while handlers mutate the state.
struct SyncStreams {
    meta: Subscription,
    players: Subscription,
    chat: Subscription,
    ready: Subscription,
    reactions: Subscription,
    rx: mpsc::Receiver<SyncCommand>,
}

struct SyncActor {
    store: SharedStore,
    room_id: RoomId,
    self_id: PlayerId,
    channels: Arc<RoomChannels>,
    config: SyncConfig,
    /// Confirmed chat, as last delivered by the store.
    confirmed: Vec<ChatMessage>,
    /// Client-only echoes, merged into the published view.
    echoes: Vec<ChatMessage>,
    last_prune_ms: u64,
}

impl SyncActor {
    async fn run(mut self, mut streams: SyncStreams) {
        debug!(room_id = %self.room_id, "room sync started");

        loop {
            tokio::select! {
                cmd = streams.rx.recv() => match cmd {
                    Some(SyncCommand::PushEcho(msg)) => {
                        self.echoes.push(msg);
                        self.publish_chat();
                    }
                    Some(SyncCommand::Stop) | None => break,
                },
                snap = streams.meta.next() => match snap {
                    Some(snap) => self.on_meta(snap),
                    None => break,
                },
                snap = streams.players.next() => match snap {
                    Some(snap) => self.on_players(snap),
                    None => break,
                },
                snap = streams.chat.next() => match snap {
                    Some(snap) => self.on_chat(snap),
                    None => break,
                },
                snap = streams.ready.next() => match snap {
                    Some(snap) => self.on_ready(snap),
                    None => break,
                },
                snap = streams.reactions.next() => match snap {
                    Some(snap) => self.on_reactions(snap).await,
                    None => break,
                },
            }
        }

        debug!(room_id = %self.room_id, "room sync stopped");
    }

    fn on_meta(&mut self, snap: Option<Value>) {
        let room = snap.and_then(|v| match serde_json::from_value::<Room>(v) {
            Ok(room) => Some(room),
            Err(err) => {
                warn!(room_id = %self.room_id, %err, "malformed room meta, treating as absent");
                None
            }
        });
        self.channels.room.send_replace(room);
    }

    fn on_players(&mut self, snap: Option<Value>) {
        let mut players: Vec<Player> = collect_values(snap);
        sort_players(&mut players);
        self.channels.players.send_replace(players);
    }

    fn on_chat(&mut self, snap: Option<Value>) {
        let mut confirmed: Vec<ChatMessage> = collect_keyed(snap);
        confirmed.sort_by(chat_order);
        self.confirmed = confirmed;
        self.publish_chat();
    }

    fn publish_chat(&mut self) {
        let now = epoch_ms();
        expire_echoes(&mut self.echoes, now, self.config.echo_retention_ms);
        self.channels
            .chat
            .send_replace(merge_chat(&self.confirmed, &self.echoes));
    }

    fn on_ready(&mut self, snap: Option<Value>) {
        let mut ready = BTreeSet::new();
        if let Some(Value::Object(map)) = snap {
            for (id, value) in map {
                if truthy(&value) {
                    ready.insert(PlayerId(id));
                }
            }
        }
        self.channels.ready.send_replace(ready);
    }

    async fn on_reactions(&mut self, snap: Option<Value>) {
        let mut events: Vec<ReactionEvent> = collect_keyed(snap);
        events.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        self.channels.reactions.send_replace(events.clone());
        self.maybe_prune(&events).await;
    }

    /// Host-led housekeeping: drop the oldest reactions once the log
    /// outgrows its retention threshold. Best-effort — deletions are
    /// idempotent, so an overlapping pass from a re-entering host is
    /// harmless.
    async fn maybe_prune(&mut self, events: &[ReactionEvent]) {
        let limit = self.config.reaction_log_limit;
        if events.len() <= limit {
            return;
        }
        let am_host = self
            .channels
            .room
            .borrow()
            .as_ref()
            .is_some_and(|room| room.host_id == self.self_id);
        if !am_host {
            return;
        }
        let now = epoch_ms();
        if now.saturating_sub(self.last_prune_ms) <= self.config.prune_backoff_ms {
            return;
        }
        self.last_prune_ms = now;

        let stale = &events[..events.len() - limit];
        let changes = stale
            .iter()
            .map(|ev| (paths::reaction(self.room_id.as_str(), &ev.id), None))
            .collect();
        match self.store.update(changes).await {
            Ok(()) => debug!(
                room_id = %self.room_id,
                pruned = stale.len(),
                "pruned stale reactions"
            ),
            Err(err) => warn!(room_id = %self.room_id, %err, "reaction pruning failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot decoding and chat merging
// ---------------------------------------------------------------------------

/// Entry truthiness: anything but null/false counts.
pub(crate) fn truthy(value: &Value) -> bool {
    !value.is_null() && value.as_bool() != Some(false)
}

/// Decodes an object snapshot's values, skipping malformed entries.
fn collect_values<T: serde::de::DeserializeOwned>(snap: Option<Value>) -> Vec<T> {
    let Some(Value::Object(map)) = snap else {
        return Vec::new();
    };
    map.into_values()
        .filter_map(|v| match serde_json::from_value(v) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%err, "skipping malformed record");
                None
            }
        })
        .collect()
}

/// Decodes an object snapshot whose keys are the records' ids: the key
/// is injected as the `id` field before parsing.
fn collect_keyed<T: serde::de::DeserializeOwned>(snap: Option<Value>) -> Vec<T> {
    let Some(Value::Object(map)) = snap else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(id, mut v)| {
            if let Some(obj) = v.as_object_mut() {
                obj.insert("id".to_owned(), Value::String(id.clone()));
            }
            match serde_json::from_value(v) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(%id, %err, "skipping malformed record");
                    None
                }
            }
        })
        .collect()
}

/// Serializes a record for appending under a store-assigned key,
/// dropping the `id` field the key will stand in for.
pub(crate) fn keyed_payload<T: Serialize>(record: &T) -> Value {
    let mut v = serde_json::to_value(record).expect("model types serialize");
    if let Some(obj) = v.as_object_mut() {
        obj.remove("id");
    }
    v
}

/// Stable, UI-friendly player order: display name, then identity.
fn sort_players(players: &mut [Player]) {
    players.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

fn chat_order(a: &ChatMessage, b: &ChatMessage) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Drops echoes past the retention window.
fn expire_echoes(echoes: &mut Vec<ChatMessage>, now_ms: u64, retention_ms: u64) {
    echoes.retain(|m| now_ms.saturating_sub(m.created_at) < retention_ms);
}

/// Merges confirmed messages with live echoes into one time-ordered
/// view. `created_at` is client-assigned, so ordering between two
/// writers can invert under clock skew; push ids break exact ties.
fn merge_chat(confirmed: &[ChatMessage], echoes: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> =
        confirmed.iter().chain(echoes.iter()).cloned().collect();
    merged.sort_by(chat_order);
    merged
}

// =========================================================================
// Tests
// =========================================================================
