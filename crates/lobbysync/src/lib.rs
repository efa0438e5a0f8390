//! # lobbysync
//!
//! Client-side coordination for ephemeral multiplayer lobbies: several
//! untrusted clients join a short-lived room identified by a
//! 4-character code, exchange presence, chat, readiness, and reaction
//! signals, and the host drives a countdown into a game round.
//!
//! Everything is reconciled over an abstract remote store
//! ([`lobbysync_store::Store`]) offering per-path subscriptions and
//! single-key compare-and-set — there is no server-side application
//! logic. Each [`LobbyClient`] keeps one synchronizer actor per joined
//! room and republishes full snapshots through watch channels.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lobbysync::{CreateRoomInput, LobbyClient, LobbyConfig};
//! use lobbysync_store::MemoryStore;
//!
//! # async fn demo() -> Result<(), lobbysync::LobbyError> {
//! let store = Arc::new(MemoryStore::new());
//! let client = LobbyClient::new(store, LobbyConfig::default());
//!
//! let room = client
//!     .create_room(CreateRoomInput {
//!         slug: "trivia".into(),
//!         version: "1".into(),
//!         name: "Ada".into(),
//!         avatar: None,
//!         private: false,
//!         max_players: None,
//!     })
//!     .await?;
//! println!("share this code: {}", room.join_code);
//! # Ok(())
//! # }
//! ```

mod client;
mod codes;
mod error;
mod identity;
mod presence;
mod sync;

pub use client::{
    CreateRoomInput, JoinByCodeInput, LobbyClient, LobbyConfig, OptionsPatch,
};
pub use error::LobbyError;
pub use identity::IdentityProvider;

// The crates callers compose with.
pub use lobbysync_model as model;
pub use lobbysync_moderation as moderation;
pub use lobbysync_store as store;
