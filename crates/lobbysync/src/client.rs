//! The lobby control API.
//!
//! [`LobbyClient`] composes the identity provider, join-code allocator,
//! presence manager, room synchronizer, and moderation engine behind
//! one public surface. It enforces host authorization and local rate
//! limits, and derives every authorization decision from the most
//! recently observed room snapshot — never from assumptions about
//! cross-channel ordering.

use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lobbysync_model::{
    Avatar, ChatMessage, ChatType, CHAT_MAX_LEN, MAX_NAME_LEN, MAX_PLAYERS_DEFAULT,
    Player, PlayerId, PlayerRole, ReactionEvent, ReactionType, Room, RoomId,
    RoomOptions, RoomStatus, epoch_ms,
};
use lobbysync_moderation::{
    ModerateOptions, ModerateResult, ModerationConfig, ModerationEngine,
    ModerationReason,
};
use lobbysync_store::{SharedStore, StoreError, paths};
use rand::Rng;
use serde_json::json;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use crate::codes;
use crate::error::LobbyError;
use crate::identity::IdentityProvider;
use crate::presence::Presence;
use crate::sync::{
    RoomChannels, SyncConfig, SyncHandle, keyed_payload, spawn_room_sync, truthy,
};

/// Capacity of the moderation feedback channel.
const FEEDBACK_CAPACITY: usize = 32;

/// Bound on ready-toggle swap retries. Only this client writes its own
/// entry, so losing more than a couple of swaps means the store is
/// misbehaving.
const READY_TOGGLE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// Configuration and inputs
// ---------------------------------------------------------------------------

/// Client construction parameters.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Where the device identity is persisted. `None` keeps it
    /// session-only.
    pub identity_path: Option<PathBuf>,
    /// How long user-facing operations wait for the auth facility
    /// before proceeding with the local identity.
    pub auth_ready_timeout: Duration,
    /// How long a local echo stays in the merged chat view.
    pub echo_retention: Duration,
    /// Minimum gap between two reactions from this sender.
    pub reaction_throttle: Duration,
    /// Reaction-log length above which the host prunes.
    pub reaction_log_limit: usize,
    /// Minimum gap between host pruning passes.
    pub prune_backoff: Duration,
    /// Moderation pipeline settings.
    pub moderation: ModerationConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            identity_path: None,
            auth_ready_timeout: Duration::from_millis(2_500),
            echo_retention: Duration::from_secs(60),
            reaction_throttle: Duration::from_secs(2),
            reaction_log_limit: 50,
            prune_backoff: Duration::from_secs(10),
            moderation: ModerationConfig::default(),
        }
    }
}

/// Profile for [`LobbyClient::create_room`].
#[derive(Debug, Clone)]
pub struct CreateRoomInput {
    pub slug: String,
    pub version: String,
    pub name: String,
    pub avatar: Option<Avatar>,
    pub private: bool,
    pub max_players: Option<u32>,
}

/// Profile for [`LobbyClient::join_room_by_code`].
#[derive(Debug, Clone)]
pub struct JoinByCodeInput {
    pub code: String,
    pub name: String,
    pub avatar: Option<Avatar>,
}

/// Host-only partial update for room options. `None` fields keep their
/// current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsPatch {
    pub chat_delay_ms: Option<u64>,
    pub reactions_enabled: Option<bool>,
    pub spectators: Option<bool>,
}

/// The moving parts of a joined room.
struct ActiveRoom {
    room_id: RoomId,
    sync: SyncHandle,
    presence: Presence,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One client's connection to the lobby system.
///
/// All methods take `&self`; the client is shared freely across tasks.
pub struct LobbyClient {
    store: SharedStore,
    config: LobbyConfig,
    identity: IdentityProvider,
    moderation: StdMutex<ModerationEngine>,
    channels: Arc<RoomChannels>,
    feedback_tx: broadcast::Sender<ModerateResult>,
    session: Mutex<Option<ActiveRoom>>,
    /// Epoch ms of the last accepted reaction; local rate limit.
    last_reaction_ms: AtomicU64,
}

impl LobbyClient {
    pub fn new(store: SharedStore, config: LobbyConfig) -> Self {
        let identity = IdentityProvider::load_or_create(config.identity_path.as_deref());
        let moderation = ModerationEngine::new(config.moderation.clone());
        let (feedback_tx, _) = broadcast::channel(FEEDBACK_CAPACITY);
        Self {
            store,
            config,
            identity,
            moderation: StdMutex::new(moderation),
            channels: Arc::new(RoomChannels::new()),
            feedback_tx,
            session: Mutex::new(None),
            last_reaction_ms: AtomicU64::new(0),
        }
    }

    // -- Identity and subscriptions ---------------------------------------

    /// Stable identifier for this client (verified uid once available).
    pub fn self_id(&self) -> PlayerId {
        self.identity.current()
    }

    /// Whether this client is host of the current room, per the latest
    /// observed room snapshot.
    pub fn is_host(&self) -> bool {
        self.channels
            .room
            .borrow()
            .as_ref()
            .is_some_and(|room| room.is_host(&self.self_id()))
    }

    /// Room metadata snapshots. `None` means not in a room (or the
    /// room record is gone).
    pub fn watch_room(&self) -> watch::Receiver<Option<Room>> {
        self.channels.room.subscribe()
    }

    /// Player list snapshots, ordered by display name then identity.
    pub fn watch_players(&self) -> watch::Receiver<Vec<Player>> {
        self.channels.players.subscribe()
    }

    /// Merged chat snapshots: confirmed log plus this client's echoes.
    pub fn watch_chat(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.channels.chat.subscribe()
    }

    /// Ready-set snapshots. Absence from the set is authoritative
    /// not-ready.
    pub fn watch_ready(&self) -> watch::Receiver<std::collections::BTreeSet<PlayerId>> {
        self.channels.ready.subscribe()
    }

    /// Reaction-log snapshots, oldest first.
    pub fn watch_reactions(&self) -> watch::Receiver<Vec<ReactionEvent>> {
        self.channels.reactions.subscribe()
    }

    /// The dedicated feedback channel for moderation outcomes —
    /// rejections and acceptances both land here, never as errors.
    pub fn moderation_feedback(&self) -> broadcast::Receiver<ModerateResult> {
        self.feedback_tx.subscribe()
    }

    /// Extends the moderation block-list at runtime.
    pub fn extend_bad_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.moderation
            .lock()
            .expect("moderation lock poisoned")
            .extend_bad_words(words);
    }

    /// Waits (bounded) for the auth facility, then adopts the verified
    /// identity if one is available. Write-time authorization failures
    /// surface as errors if the bound expires first.
    async fn wait_auth(&self) {
        let ready = self.store.auth_ready();
        if tokio::time::timeout(self.config.auth_ready_timeout, ready)
            .await
            .is_err()
        {
            debug!("auth readiness timed out, continuing with local identity");
        }
        if let Some(uid) = self.store.auth_uid().await {
            self.identity.adopt_verified(&uid);
        }
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            echo_retention_ms: self.config.echo_retention.as_millis() as u64,
            reaction_log_limit: self.config.reaction_log_limit,
            prune_backoff_ms: self.config.prune_backoff.as_millis() as u64,
        }
    }

    // -- Room lifecycle ----------------------------------------------------

    /// Creates a room: reserves a join code, writes the room and the
    /// creator's host player record in one batch, then attaches
    /// subscriptions and presence.
    pub async fn create_room(&self, input: CreateRoomInput) -> Result<Room, LobbyError> {
        self.wait_auth().await;
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(LobbyError::AlreadyInRoom);
        }

        let self_id = self.self_id();
        let room_id = RoomId(self.store.new_id());
        let now = epoch_ms();
        let join_code = codes::allocate(self.store.as_ref(), &room_id, now).await?;

        let room = Room {
            id: room_id.clone(),
            slug: input.slug,
            version: input.version,
            join_code: join_code.clone(),
            private: input.private,
            max_players: input.max_players.unwrap_or(MAX_PLAYERS_DEFAULT),
            status: RoomStatus::Lobby,
            host_id: self_id.clone(),
            created_at: now,
            epoch_start: None,
            options: RoomOptions::default(),
        };
        let player = Player {
            id: self_id.clone(),
            name: truncate_name(&input.name),
            role: PlayerRole::Host,
            avatar: Some(input.avatar.unwrap_or_else(Avatar::random_preset)),
            muted_until: None,
            last_seen: now,
        };

        self.store
            .update(vec![
                (
                    paths::room_meta(room_id.as_str()),
                    Some(serde_json::to_value(&room).expect("model types serialize")),
                ),
                (
                    paths::player(room_id.as_str(), self_id.as_str()),
                    Some(serde_json::to_value(&player).expect("model types serialize")),
                ),
            ])
            .await?;

        // Seed the local snapshot so host checks work before the
        // subscription's first delivery lands.
        self.channels.room.send_replace(Some(room.clone()));
        let active = self
            .attach(room_id.clone(), self_id, &player)
            .await?;
        *session = Some(active);

        info!(%room_id, join_code, "room created");
        Ok(room)
    }

    /// Joins a room by its code. The code is validated locally before
    /// any store access; a code whose room record is gone reports
    /// room-not-found rather than code-not-found.
    pub async fn join_room_by_code(&self, input: JoinByCodeInput) -> Result<Room, LobbyError> {
        let code = codes::validate_code(&input.code)?;
        self.wait_auth().await;
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(LobbyError::AlreadyInRoom);
        }

        let self_id = self.self_id();
        let room_id = codes::resolve(self.store.as_ref(), &code).await?;
        let meta = self
            .store
            .get(&paths::room_meta(room_id.as_str()))
            .await?
            .ok_or(LobbyError::RoomNotFound)?;
        let room: Room = serde_json::from_value(meta).map_err(|err| {
            warn!(%room_id, %err, "room meta is malformed");
            LobbyError::RoomNotFound
        })?;

        // Re-entry: the host rejoining through their own code keeps
        // host authority.
        let role = if room.is_host(&self_id) {
            PlayerRole::Host
        } else {
            PlayerRole::Player
        };
        let now = epoch_ms();
        let player = Player {
            id: self_id.clone(),
            name: truncate_name(&input.name),
            role,
            avatar: Some(input.avatar.unwrap_or_else(Avatar::random_preset)),
            muted_until: None,
            last_seen: now,
        };
        self.store
            .set(
                &paths::player(room_id.as_str(), self_id.as_str()),
                Some(serde_json::to_value(&player).expect("model types serialize")),
            )
            .await?;

        // Seed the local snapshot, as on create.
        self.channels.room.send_replace(Some(room.clone()));
        let active = self.attach(room_id.clone(), self_id, &player).await?;
        *session = Some(active);

        info!(%room_id, code, "joined room");
        Ok(room)
    }

    /// Spawns the synchronizer and presence for a freshly written
    /// player record. Rolls the synchronizer back if presence fails.
    async fn attach(
        &self,
        room_id: RoomId,
        self_id: PlayerId,
        player: &Player,
    ) -> Result<ActiveRoom, LobbyError> {
        let sync = spawn_room_sync(
            self.store.clone(),
            room_id.clone(),
            self_id,
            self.channels.clone(),
            self.sync_config(),
        )
        .await?;

        let presence = match Presence::start(self.store.clone(), &room_id, player).await {
            Ok(presence) => presence,
            Err(err) => {
                sync.stop().await;
                self.channels.reset();
                return Err(err);
            }
        };

        Ok(ActiveRoom {
            room_id,
            sync,
            presence,
        })
    }

    /// Leaves the current room. Never fails: each cleanup step is
    /// isolated and best-effort, and local state is fully reset either
    /// way — the disconnect-action fallback covers whatever remote
    /// cleanup did not land.
    pub async fn leave_room(&self) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return;
        };

        active.presence.stop().await;
        active.sync.stop().await;
        self.channels.reset();

        info!(room_id = %active.room_id, "left room");
    }

    // -- Chat ---------------------------------------------------------------

    /// Runs `text` through moderation and, if accepted, publishes it —
    /// to the shared log normally, or as a local-only echo while
    /// shadow-muted. Rejections are reported on the feedback channel,
    /// not as errors.
    pub async fn send_text(&self, text: &str) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;

        let chat_delay_ms = self
            .channels
            .room
            .borrow()
            .as_ref()
            .map_or(0, |room| room.options.chat_delay_ms);
        let now = epoch_ms();
        let self_id = self.self_id();

        let result = self
            .moderation
            .lock()
            .expect("moderation lock poisoned")
            .moderate(
                self_id.as_str(),
                text,
                &ModerateOptions {
                    allow_links: false,
                    slow_mode_ms: chat_delay_ms,
                },
                now,
            );
        if !result.ok {
            let _ = self.feedback_tx.send(result);
            return Ok(());
        }

        let clean: String = result
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(CHAT_MAX_LEN)
            .collect::<String>()
            .trim()
            .to_owned();
        if clean.is_empty() {
            let _ = self.feedback_tx.send(ModerateResult {
                ok: false,
                reason: ModerationReason::Empty,
                text: None,
                cooldown_ms_left: None,
                replaced: false,
                original: None,
            });
            return Ok(());
        }

        let (name, muted) = {
            let players = self.channels.players.borrow();
            let me = players.iter().find(|p| p.id == self_id);
            (
                me.map_or_else(|| "Guest".to_owned(), |p| p.name.clone()),
                me.is_some_and(|p| p.is_muted_at(now)),
            )
        };

        let message = ChatMessage {
            id: String::new(),
            room_id: active.room_id.clone(),
            player_id: self_id,
            name,
            created_at: now,
            kind: ChatType::Text,
            text: Some(clean.clone()),
        };

        if muted {
            // Shadow-muted: visible to the sender only, never written
            // to the shared store.
            let echo = ChatMessage {
                id: local_echo_id(now),
                ..message
            };
            active.sync.push_echo(echo).await;
            let _ = self.feedback_tx.send(ModerateResult::accepted(clean));
            return Ok(());
        }

        self.store
            .push(&paths::chat(active.room_id.as_str()), keyed_payload(&message))
            .await?;
        let _ = self.feedback_tx.send(ModerateResult::accepted(clean));
        Ok(())
    }

    // -- Ready and countdown ------------------------------------------------

    /// Sets, clears, or — with `None` — toggles the caller's ready
    /// entry. The toggle reads the entry's value at write time through
    /// compare-and-set, so rapid double-presses converge on the store's
    /// state rather than on stale local state.
    pub async fn set_ready(&self, flag: Option<bool>) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;
        let path = paths::ready_entry(active.room_id.as_str(), self.self_id().as_str());

        match flag {
            Some(true) => self.store.set(&path, Some(json!(true))).await?,
            Some(false) => self.store.set(&path, None).await?,
            None => {
                for _ in 0..READY_TOGGLE_ATTEMPTS {
                    let current = self.store.get(&path).await?;
                    let currently_ready = current.as_ref().is_some_and(|v| truthy(v));
                    let desired = (!currently_ready).then(|| json!(true));
                    if self
                        .store
                        .compare_and_swap(&path, current, desired)
                        .await?
                    {
                        return Ok(());
                    }
                    debug!("ready toggle lost the swap, retrying");
                }
                return Err(LobbyError::Store(StoreError::Unavailable(
                    "ready toggle kept losing the swap".into(),
                )));
            }
        }
        Ok(())
    }

    /// Host-only: advances the room to `starting` with an absolute
    /// countdown target `seconds` in the future. Observers derive the
    /// display from `epoch_start - now`, so latecomers converge on the
    /// same wall-clock target.
    pub async fn host_start_countdown(&self, seconds: u64) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;
        let room = self.require_host()?;

        let players = self.channels.players.borrow().clone();
        if players.len() < 2 {
            return Err(LobbyError::TooFewPlayers);
        }
        let ready = self.channels.ready.borrow().clone();
        if players.iter().any(|p| !ready.contains(&p.id)) {
            return Err(LobbyError::NotAllReady);
        }

        let epoch_start = epoch_ms() + seconds.max(1) * 1_000;
        let meta = paths::room_meta(active.room_id.as_str());
        self.store
            .update(vec![
                (meta.child("status"), Some(json!(RoomStatus::Starting))),
                (meta.child("epochStart"), Some(json!(epoch_start))),
            ])
            .await?;

        info!(room_id = %room.id, epoch_start, "countdown started");
        Ok(())
    }

    // -- Host controls -------------------------------------------------------

    /// Host-only: merges permitted option fields. The chat delay is
    /// clamped to `0..=60_000` ms and always written fully specified,
    /// so no reader ever observes it missing.
    pub async fn update_options(&self, patch: OptionsPatch) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;
        let room = self.require_host()?;

        let options = paths::room_options(active.room_id.as_str());
        let chat_delay = patch
            .chat_delay_ms
            .unwrap_or(room.options.chat_delay_ms)
            .min(60_000);
        let mut changes = vec![(options.child("chatDelayMs"), Some(json!(chat_delay)))];
        if let Some(enabled) = patch.reactions_enabled {
            changes.push((options.child("reactionsEnabled"), Some(json!(enabled))));
        }
        if let Some(spectators) = patch.spectators {
            changes.push((options.child("spectators"), Some(json!(spectators))));
        }
        self.store.update(changes).await?;

        debug!(room_id = %room.id, chat_delay, "room options updated");
        Ok(())
    }

    /// Host-only: shadow-mutes `player` for `minutes` (at least one).
    /// The target keeps seeing their own messages as local echoes.
    pub async fn shadow_mute(&self, player: &PlayerId, minutes: u64) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;
        let room = self.require_host()?;

        let until = epoch_ms() + minutes.max(1) * 60_000;
        self.store
            .set(
                &paths::player(active.room_id.as_str(), player.as_str()).child("mutedUntil"),
                Some(json!(until)),
            )
            .await?;

        info!(room_id = %room.id, %player, until, "player shadow-muted");
        Ok(())
    }

    /// Host-only: clears a shadow-mute. A no-op on an unmuted player.
    pub async fn shadow_unmute(&self, player: &PlayerId) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;
        let room = self.require_host()?;

        self.store
            .set(
                &paths::player(active.room_id.as_str(), player.as_str()).child("mutedUntil"),
                None,
            )
            .await?;

        info!(room_id = %room.id, %player, "player unmuted");
        Ok(())
    }

    // -- Reactions -----------------------------------------------------------

    /// Appends a reaction to the shared log. Dropped silently — not an
    /// error — when the sender's local throttle has not elapsed or the
    /// room has reactions disabled.
    pub async fn send_reaction(&self, kind: ReactionType) -> Result<(), LobbyError> {
        self.wait_auth().await;
        let session = self.session.lock().await;
        let active = session.as_ref().ok_or(LobbyError::NotInRoom)?;

        let enabled = self
            .channels
            .room
            .borrow()
            .as_ref()
            .is_none_or(|room| room.options.reactions_enabled);
        if !enabled {
            return Ok(());
        }

        let now = epoch_ms();
        let throttle = self.config.reaction_throttle.as_millis() as u64;
        let last = self.last_reaction_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < throttle {
            return Ok(());
        }
        self.last_reaction_ms.store(now, Ordering::Relaxed);

        self.store
            .push(
                &paths::reactions(active.room_id.as_str()),
                json!({
                    "playerId": self.self_id().as_str(),
                    "type": kind.as_str(),
                    "createdAt": now,
                }),
            )
            .await?;
        Ok(())
    }

    /// [`send_reaction`](Self::send_reaction) for untyped front ends:
    /// an unknown name fails with `ERR_BAD_REACTION` before any I/O.
    pub async fn send_reaction_named(&self, name: &str) -> Result<(), LobbyError> {
        let kind: ReactionType = name.parse().map_err(|()| LobbyError::BadReaction)?;
        self.send_reaction(kind).await
    }

    // -- Internals -----------------------------------------------------------

    /// Host gate, derived from the latest room snapshot.
    fn require_host(&self) -> Result<Room, LobbyError> {
        let room = self
            .channels
            .room
            .borrow()
            .clone()
            .ok_or(LobbyError::RoomNotFound)?;
        if !room.is_host(&self.self_id()) {
            return Err(LobbyError::NotHost);
        }
        Ok(room)
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

/// Client-generated id for a local echo; the `local-` prefix keeps it
/// out of any store id space.
fn local_echo_id(now_ms: u64) -> String {
    const ALPHANUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..5)
        .map(|_| ALPHANUM[rng.random_range(0..ALPHANUM.len())] as char)
        .collect();
    format!("local-{now_ms}-{suffix}")
}

// =========================================================================
// Tests
// =========================================================================
