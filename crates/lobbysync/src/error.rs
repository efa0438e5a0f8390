//! Error types for the lobby layer.

use lobbysync_store::StoreError;

/// Errors returned by the lobby control API.
///
/// Moderation rejections are deliberately absent: they are frequent,
/// expected outcomes and travel on the feedback channel instead (see
/// [`LobbyClient::moderation_feedback`](crate::LobbyClient::moderation_feedback)).
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The join code fails local format validation (wrong length or
    /// characters). Detected before any store access.
    #[error("join code is malformed")]
    InvalidCode,

    /// No room is registered under the given join code.
    #[error("join code not found")]
    CodeNotFound,

    /// The code resolved, but the room record itself is gone.
    #[error("room not found")]
    RoomNotFound,

    /// The operation needs an active room session.
    #[error("not in a room")]
    NotInRoom,

    /// The client is already in a room; leave it first.
    #[error("already in a room")]
    AlreadyInRoom,

    /// Caller is not the room's host.
    #[error("caller is not the room host")]
    NotHost,

    /// Countdown requires at least two present players.
    #[error("too few players to start")]
    TooFewPlayers,

    /// Countdown requires every present player in the ready set.
    #[error("not every present player is ready")]
    NotAllReady,

    /// Join-code allocation exhausted its retry budget on collisions.
    #[error("join code allocation retries exhausted")]
    AllocateCode,

    /// The store rejected join-code reservation writes outright —
    /// access denied rather than collision.
    #[error("join code reservation rejected: {0}")]
    CodeWrite(StoreError),

    /// The reaction name is not one of the fixed categories.
    #[error("unknown reaction type")]
    BadReaction,

    /// An underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LobbyError {
    /// Stable, matchable code for this error. Callers branch on these
    /// instead of parsing display text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCode => "ERR_CODE_INVALID",
            Self::CodeNotFound => "ERR_CODE_NOT_FOUND",
            Self::RoomNotFound => "ERR_ROOM_NOT_FOUND",
            Self::NotInRoom => "ERR_NOT_IN_ROOM",
            Self::AlreadyInRoom => "ERR_ALREADY_IN_ROOM",
            Self::NotHost => "ERR_NOT_HOST",
            Self::TooFewPlayers => "ERR_TOO_FEW_PLAYERS",
            Self::NotAllReady => "ERR_NOT_ALL_READY",
            Self::AllocateCode => "ERR_ALLOCATE_CODE",
            Self::CodeWrite(_) => "ERR_CODE_WRITE",
            Self::BadReaction => "ERR_BAD_REACTION",
            Self::Store(StoreError::PermissionDenied { .. }) => "ERR_PERMISSION_DENIED",
            Self::Store(_) => "ERR_STORE",
        }
    }
}
