//! Two clients on one in-memory store: create a room, join it by code,
//! chat (including a moderation rejection and a shadow-muted echo),
//! ready up, and run the host countdown.
//!
//! Run with `RUST_LOG=lobbysync=debug cargo run -p lobby-demo` to watch
//! the synchronizer at work.

use std::sync::Arc;
use std::time::Duration;

use lobbysync::{CreateRoomInput, JoinByCodeInput, LobbyClient, LobbyConfig};
use lobbysync_model::{ReactionType, epoch_ms};
use lobbysync_store::MemoryStore;
use tracing_subscriber::prelude::*;

fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lobbysync=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();

    let store = MemoryStore::new();
    let alice = LobbyClient::new(Arc::new(store.clone()), LobbyConfig::default());
    let bob = LobbyClient::new(Arc::new(store.clone()), LobbyConfig::default());

    // Alice opens a room and shares the code.
    let room = alice
        .create_room(CreateRoomInput {
            slug: "trivia-night".into(),
            version: "1".into(),
            name: "Alice".into(),
            avatar: None,
            private: false,
            max_players: None,
        })
        .await?;
    println!("room {} open, join code {}", room.id, room.join_code);

    // Bob types the code in.
    bob.join_room_by_code(JoinByCodeInput {
        code: room.join_code.clone(),
        name: "Bob".into(),
        avatar: None,
    })
    .await?;

    let mut players = alice.watch_players();
    players.wait_for(|p| p.len() == 2).await?;
    println!(
        "players: {:?}",
        players.borrow().iter().map(|p| p.name.clone()).collect::<Vec<_>>()
    );
    let mut bob_players = bob.watch_players();
    bob_players.wait_for(|p| p.len() == 2).await?;

    // Chat, including a rejection surfaced on the feedback channel.
    let mut feedback = bob.moderation_feedback();
    bob.send_text("hey everyone!").await?;
    bob.send_text("CAN EVERYONE HEAR ME OK").await?;
    let verdict = feedback.recv().await?; // accepted
    println!("bob send #1: {:?}", verdict.reason);
    let verdict = feedback.recv().await?; // rejected: caps
    println!("bob send #2: {:?}", verdict.reason);

    let mut chat = alice.watch_chat();
    chat.wait_for(|c| !c.is_empty()).await?;
    for msg in chat.borrow().iter() {
        println!("[chat] {}: {}", msg.name, msg.text.as_deref().unwrap_or(""));
    }

    // A quick reaction burst (the second is rate-limited away).
    bob.send_reaction(ReactionType::Wave).await?;
    bob.send_reaction(ReactionType::Clap).await?;

    // Shadow-mute: Bob keeps seeing himself, Alice sees nothing new.
    alice.shadow_mute(&bob.self_id(), 1).await?;
    let bob_id = bob.self_id();
    let mut bob_players = bob.watch_players();
    bob_players
        .wait_for(|p| p.iter().any(|p| p.id == bob_id && p.muted_until.is_some()))
        .await?;
    bob.send_text("is this thing on?").await?;
    let mut bob_chat = bob.watch_chat();
    bob_chat.wait_for(|c| c.iter().any(|m| m.id.starts_with("local-"))).await?;
    println!("bob sees his echo; alice sees {} messages", chat.borrow().len());
    alice.shadow_unmute(&bob.self_id()).await?;

    // Ready up and count down.
    alice.set_ready(Some(true)).await?;
    bob.set_ready(None).await?; // toggle
    let mut ready = alice.watch_ready();
    ready.wait_for(|r| r.len() == 2).await?;

    alice.host_start_countdown(3).await?;
    let mut room_rx = bob.watch_room();
    room_rx.wait_for(|r| r.as_ref().is_some_and(|r| r.epoch_start.is_some())).await?;
    let target = room_rx.borrow().as_ref().unwrap().epoch_start.unwrap();
    println!("countdown! starting in {} ms", target.saturating_sub(epoch_ms()));

    tokio::time::sleep(Duration::from_millis(target.saturating_sub(epoch_ms()))).await;
    println!("game on");

    bob.leave_room().await;
    alice.leave_room().await;
    Ok(())
}
