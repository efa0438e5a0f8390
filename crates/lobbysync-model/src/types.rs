//! Record types stored under a room's subtree.
//!
//! Field names serialize in camelCase because that is the layout every
//! subscribed client reads back out of the store; the Rust side stays
//! snake_case.

use std::fmt;
use std::str::FromStr;

use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A stable, opaque identifier for a player.
///
/// Issued by the identity provider (device id or verified auth uid) and
/// used as the key of the player's records under a room. Never reused
/// across devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A store-assigned identifier for a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Lifecycle state of a room.
///
/// ```text
/// Lobby → Starting → InGame → Ended
/// ```
///
/// Only the host advances `status`; everyone else observes it through
/// the room-meta subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    Lobby,
    Starting,
    InGame,
    Ended,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "lobby"),
            Self::Starting => write!(f, "starting"),
            Self::InGame => write!(f, "inGame"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Host-tunable room options.
///
/// `chat_delay_ms` is the slow-mode interval; 0 disables slow mode.
/// The value is clamped to `0..=60_000` before every write, and writes
/// always carry a concrete value so readers never see it missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOptions {
    pub chat_delay_ms: u64,
    pub reactions_enabled: bool,
    pub spectators: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            chat_delay_ms: 0,
            reactions_enabled: true,
            spectators: false,
        }
    }
}

/// Room metadata, stored at `rooms/{id}/meta`.
///
/// `host_id` is written once at creation and never changes for the life
/// of the room. `epoch_start` is absent until the host starts the
/// countdown; it is an absolute wall-clock target so every client
/// computes the same remaining time regardless of when it joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub slug: String,
    pub version: String,
    pub join_code: String,
    pub private: bool,
    pub max_players: u32,
    pub status: RoomStatus,
    pub host_id: PlayerId,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_start: Option<u64>,
    pub options: RoomOptions,
}

impl Room {
    /// Whether `id` holds host authority over this room.
    pub fn is_host(&self, id: &PlayerId) -> bool {
        self.host_id == *id
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Role a player holds within a room. Exactly one player per room has
/// `Host`, matching `Room::host_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    Host,
    Player,
    Spectator,
}

/// Optional metadata carried alongside a doodle avatar's pixel data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A player's avatar: either one of the built-in presets or a
/// hand-drawn doodle. The doodle's `rle` payload is opaque to the SDK —
/// the editor that produces it and the renderer that consumes it live
/// outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Avatar {
    Preset { id: String },
    Doodle { meta: AvatarMeta, rle: String },
}

const PRESET_IDS: [&str; 8] = ["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8"];

impl Avatar {
    /// Picks one of the built-in presets at random. Used when a profile
    /// supplies no avatar of its own.
    pub fn random_preset() -> Self {
        let id = PRESET_IDS
            .choose(&mut rand::rng())
            .expect("preset list is non-empty");
        Self::Preset { id: (*id).to_owned() }
    }
}

/// A player's record, stored at `rooms/{id}/players/{playerId}`.
///
/// `muted_until` in the future marks the player shadow-muted: their own
/// client keeps showing their messages (as local echoes) but nothing
/// reaches the shared chat log. `last_seen` is refreshed by the
/// heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub role: PlayerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted_until: Option<u64>,
    pub last_seen: u64,
}

impl Player {
    /// Whether the player is shadow-muted at `now_ms`.
    pub fn is_muted_at(&self, now_ms: u64) -> bool {
        self.muted_until.is_some_and(|until| until > now_ms)
    }

    /// Whether the player's heartbeat has been silent long enough for
    /// observers to treat them as gone.
    pub fn is_stale_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) > crate::PRESENCE_TIMEOUT_MS
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Kind of chat entry. The core writes `Text`; the other kinds are
/// reserved for renderers that inject their own rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Text,
    System,
    Reaction,
    Poll,
}

/// A chat entry, stored at `rooms/{id}/chat/{messageId}`.
///
/// Confirmed messages are immutable once written; `id` is the store's
/// push id, monotonic enough to break `created_at` ties. Local echoes
/// reuse this type with a client-generated `local-…` id and are never
/// written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub name: String,
    pub created_at: u64,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// The closed set of reaction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Wave,
    Clap,
    Laugh,
    Wow,
    Nope,
}

impl ReactionType {
    pub const ALL: [ReactionType; 5] = [
        Self::Wave,
        Self::Clap,
        Self::Laugh,
        Self::Wow,
        Self::Nope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wave => "wave",
            Self::Clap => "clap",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Nope => "nope",
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wave" => Ok(Self::Wave),
            "clap" => Ok(Self::Clap),
            "laugh" => Ok(Self::Laugh),
            "wow" => Ok(Self::Wow),
            "nope" => Ok(Self::Nope),
            _ => Err(()),
        }
    }
}

/// A short-lived reaction event, stored at `rooms/{id}/reactions/{id}`.
/// Write-once; eligible for host-led pruning once the log grows past
/// its retention threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub id: String,
    pub player_id: PlayerId,
    #[serde(rename = "type")]
    pub kind: ReactionType,
    pub created_at: u64,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The store layout is shared by every client, so these tests pin
    //! the exact JSON spellings a subscriber will read back.

    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PlayerId::from("abc123")).unwrap();
        assert_eq!(json, "\"abc123\"");
    }

    #[test]
    fn test_room_status_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&RoomStatus::Lobby).unwrap(),
            "\"lobby\""
        );
        assert_eq!(
            serde_json::to_string(&RoomStatus::InGame).unwrap(),
            "\"inGame\""
        );
        assert_eq!(
            serde_json::to_string(&RoomStatus::Ended).unwrap(),
            "\"ended\""
        );
    }

    #[test]
    fn test_room_serializes_camel_case_fields() {
        let room = Room {
            id: RoomId::from("r1"),
            slug: "trivia".into(),
            version: "1".into(),
            join_code: "ABCD".into(),
            private: false,
            max_players: 8,
            status: RoomStatus::Lobby,
            host_id: PlayerId::from("h1"),
            created_at: 1000,
            epoch_start: None,
            options: RoomOptions::default(),
        };
        let json: serde_json::Value = serde_json::to_value(&room).unwrap();

        assert_eq!(json["joinCode"], "ABCD");
        assert_eq!(json["hostId"], "h1");
        assert_eq!(json["maxPlayers"], 8);
        assert_eq!(json["options"]["chatDelayMs"], 0);
        assert_eq!(json["options"]["reactionsEnabled"], true);
        // Absent until the countdown starts.
        assert!(json.get("epochStart").is_none());
    }

    #[test]
    fn test_room_round_trips_with_epoch_start() {
        let mut room = Room {
            id: RoomId::from("r1"),
            slug: "s".into(),
            version: "1".into(),
            join_code: "WXYZ".into(),
            private: true,
            max_players: 4,
            status: RoomStatus::Starting,
            host_id: PlayerId::from("h1"),
            created_at: 5,
            epoch_start: Some(8000),
            options: RoomOptions::default(),
        };
        room.options.chat_delay_ms = 3000;

        let bytes = serde_json::to_vec(&room).unwrap();
        let decoded: Room = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(room, decoded);
    }

    #[test]
    fn test_avatar_preset_tagged_by_kind() {
        let avatar = Avatar::Preset { id: "p3".into() };
        let json: serde_json::Value = serde_json::to_value(&avatar).unwrap();
        assert_eq!(json["kind"], "preset");
        assert_eq!(json["id"], "p3");
    }

    #[test]
    fn test_avatar_doodle_round_trip() {
        let avatar = Avatar::Doodle {
            meta: AvatarMeta {
                size: Some(64),
                ..AvatarMeta::default()
            },
            rle: "12a4b".into(),
        };
        let bytes = serde_json::to_vec(&avatar).unwrap();
        let decoded: Avatar = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(avatar, decoded);
    }

    #[test]
    fn test_random_preset_is_a_known_preset() {
        for _ in 0..32 {
            match Avatar::random_preset() {
                Avatar::Preset { id } => {
                    assert!(PRESET_IDS.contains(&id.as_str()))
                }
                other => panic!("expected preset, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_player_omits_absent_optional_fields() {
        let player = Player {
            id: PlayerId::from("u1"),
            name: "Ada".into(),
            role: PlayerRole::Player,
            avatar: None,
            muted_until: None,
            last_seen: 99,
        };
        let json: serde_json::Value = serde_json::to_value(&player).unwrap();

        assert_eq!(json["lastSeen"], 99);
        assert_eq!(json["role"], "player");
        assert!(json.get("mutedUntil").is_none());
        assert!(json.get("avatar").is_none());
    }

    #[test]
    fn test_player_mute_window() {
        let mut player = Player {
            id: PlayerId::from("u1"),
            name: "Ada".into(),
            role: PlayerRole::Player,
            avatar: None,
            muted_until: Some(10_000),
            last_seen: 0,
        };
        assert!(player.is_muted_at(9_999));
        assert!(!player.is_muted_at(10_000));
        player.muted_until = None;
        assert!(!player.is_muted_at(0));
    }

    #[test]
    fn test_player_staleness_uses_presence_timeout() {
        let player = Player {
            id: PlayerId::from("u1"),
            name: "Ada".into(),
            role: PlayerRole::Player,
            avatar: None,
            muted_until: None,
            last_seen: 100_000,
        };
        assert!(!player.is_stale_at(100_000 + crate::PRESENCE_TIMEOUT_MS));
        assert!(player.is_stale_at(100_000 + crate::PRESENCE_TIMEOUT_MS + 1));
    }

    #[test]
    fn test_chat_message_type_field_spelling() {
        let msg = ChatMessage {
            id: "m1".into(),
            room_id: RoomId::from("r1"),
            player_id: PlayerId::from("u1"),
            name: "Ada".into(),
            created_at: 42,
            kind: ChatType::Text,
            text: Some("hi".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["playerId"], "u1");
        assert_eq!(json["createdAt"], 42);
    }

    #[test]
    fn test_reaction_type_parse_rejects_unknown() {
        assert_eq!("clap".parse::<ReactionType>(), Ok(ReactionType::Clap));
        assert!("thumbsup".parse::<ReactionType>().is_err());
    }

    #[test]
    fn test_reaction_event_round_trip() {
        let ev = ReactionEvent {
            id: "k1".into(),
            player_id: PlayerId::from("u1"),
            kind: ReactionType::Wow,
            created_at: 7,
        };
        let bytes = serde_json::to_vec(&ev).unwrap();
        let decoded: ReactionEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(ev, decoded);
        let json: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "wow");
    }

    #[test]
    fn test_join_code_alphabet_has_no_ambiguous_chars() {
        for c in [b'I', b'O', b'0', b'1'] {
            assert!(!crate::JOIN_CODE_ALPHABET.contains(&c));
        }
        assert_eq!(crate::JOIN_CODE_ALPHABET.len(), 32);
    }
}
