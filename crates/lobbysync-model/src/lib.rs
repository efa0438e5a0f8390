//! Shared data model for lobbysync.
//!
//! This crate defines every record that lives in the remote store —
//! rooms, players, chat messages, ready entries, reactions — plus the
//! constants both ends of the system agree on (join-code alphabet,
//! chat length limit, heartbeat cadence).
//!
//! The serialized field spellings (`hostId`, `chatDelayMs`, `"inGame"`,
//! …) are part of the store layout: every client subscribed to a room
//! reads the same JSON subtrees, so these shapes must not drift.

mod types;

pub use types::{
    Avatar, AvatarMeta, ChatMessage, ChatType, Player, PlayerId, PlayerRole,
    ReactionEvent, ReactionType, Room, RoomId, RoomOptions, RoomStatus,
};

use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Shared constants
// ---------------------------------------------------------------------------

/// Alphabet join codes are drawn from. Excludes visually ambiguous
/// characters (I, O, 0, 1).
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a join code.
pub const JOIN_CODE_LEN: usize = 4;

/// Display names are truncated to this many characters on write.
pub const MAX_NAME_LEN: usize = 20;

/// Maximum accepted chat message length (after whitespace collapsing).
pub const CHAT_MAX_LEN: usize = 160;

/// Default player cap for a new room.
pub const MAX_PLAYERS_DEFAULT: u32 = 8;

/// Heartbeat cadence for presence records.
pub const HEARTBEAT_MS: u64 = 10_000;

/// A player whose `lastSeen` is older than this may be treated as gone
/// by observers. The core only refreshes `lastSeen`; acting on
/// staleness is the consumer's call.
pub const PRESENCE_TIMEOUT_MS: u64 = 45_000;

/// Current wall-clock time as epoch milliseconds.
///
/// All `createdAt` / `lastSeen` / `epochStart` fields in the store are
/// epoch millis, so the whole SDK tells time through this one function.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
