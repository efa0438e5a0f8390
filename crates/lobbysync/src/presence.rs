//! Presence records and the heartbeat that keeps them fresh.
//!
//! Starting presence writes the player's liveness marker, registers
//! disconnect-triggered removal of both the player record and the
//! marker, and spawns a fixed-cadence heartbeat refreshing `lastSeen`
//! on both. A graceful stop walks the reverse path: cancel the
//! disconnect actions (and wait for the cancellation to be confirmed)
//! before deleting anything, so a slow cancellation can never fire
//! after the records have been rewritten by a new session.

use std::time::Duration;

use lobbysync_model::{HEARTBEAT_MS, Player, RoomId, epoch_ms};
use lobbysync_store::{DisconnectAction, SharedStore, StorePath, paths};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::LobbyError;

/// A player's live presence in one room. Dropping without
/// [`stop`](Presence::stop) leaves cleanup to the registered
/// disconnect actions.
pub(crate) struct Presence {
    store: SharedStore,
    player_path: StorePath,
    presence_path: StorePath,
    disc_player: Option<DisconnectAction>,
    disc_presence: Option<DisconnectAction>,
    heartbeat: JoinHandle<()>,
}

impl Presence {
    /// Establishes presence for `player` in `room_id`. The player
    /// record itself is written by the caller (as part of the room
    /// create/join batch); this adds the presence marker, the
    /// disconnect hooks, and the heartbeat.
    pub(crate) async fn start(
        store: SharedStore,
        room_id: &RoomId,
        player: &Player,
    ) -> Result<Self, LobbyError> {
        let player_path = paths::player(room_id.as_str(), player.id.as_str());
        let presence_path = paths::presence_entry(room_id.as_str(), player.id.as_str());

        store
            .set(&presence_path, Some(json!({ "lastSeen": player.last_seen })))
            .await?;

        // Registration failure is survivable: the heartbeat keeps
        // `lastSeen` fresh, and observers fall back to staleness.
        let disc_player = match store.register_on_disconnect(&player_path).await {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(%err, path = %player_path, "disconnect cleanup registration failed");
                None
            }
        };
        let disc_presence = match store.register_on_disconnect(&presence_path).await {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(%err, path = %presence_path, "disconnect cleanup registration failed");
                None
            }
        };

        let heartbeat = tokio::spawn(heartbeat_loop(
            store.clone(),
            player_path.clone(),
            presence_path.clone(),
        ));

        debug!(%room_id, player_id = %player.id, "presence started");

        Ok(Self {
            store,
            player_path,
            presence_path,
            disc_player,
            disc_presence,
            heartbeat,
        })
    }

    /// Graceful teardown. Every step is isolated: a failing store call
    /// is logged and the remaining steps still run.
    pub(crate) async fn stop(mut self) {
        // Stop the heartbeat first so it cannot recreate a record
        // between the deletions below.
        self.heartbeat.abort();

        // Cancel-and-confirm before deleting; see module docs.
        for action in [self.disc_player.take(), self.disc_presence.take()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = self.store.cancel_on_disconnect(action).await {
                warn!(%err, "disconnect action cancellation failed");
            }
        }

        if let Err(err) = self.store.set(&self.presence_path, None).await {
            warn!(%err, path = %self.presence_path, "presence record removal failed");
        }
        if let Err(err) = self.store.set(&self.player_path, None).await {
            warn!(%err, path = %self.player_path, "player record removal failed");
        }

        debug!(path = %self.player_path, "presence stopped");
    }
}

/// Refreshes `lastSeen` on the player record and the presence marker
/// every [`HEARTBEAT_MS`]. Runs until the owning [`Presence`] aborts it.
async fn heartbeat_loop(store: SharedStore, player_path: StorePath, presence_path: StorePath) {
    let mut interval = tokio::time::interval(Duration::from_millis(HEARTBEAT_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; presence was just written.
    interval.tick().await;

    loop {
        interval.tick().await;
        let now = epoch_ms();
        let beat = store
            .update(vec![
                (player_path.child("lastSeen"), Some(json!(now))),
                (presence_path.clone(), Some(json!({ "lastSeen": now }))),
            ])
            .await;
        match beat {
            Ok(()) => trace!(path = %presence_path, now, "heartbeat"),
            Err(err) => warn!(%err, path = %presence_path, "heartbeat write failed"),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
