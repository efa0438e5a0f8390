//! Join-code allocation and resolution.
//!
//! Codes are reserved with a compare-and-set against the global
//! `codes/{CODE}` namespace: write only if absent. Losing the race is
//! normal — draw another code and try again. A store *error* is not a
//! collision; after a few tolerated retries it escalates as
//! [`LobbyError::CodeWrite`] so callers can tell "access denied" from
//! "retries exhausted".

use lobbysync_model::{JOIN_CODE_ALPHABET, JOIN_CODE_LEN, RoomId};
use lobbysync_store::{Store, paths};
use rand::Rng;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::LobbyError;

/// Upper bound on reservation attempts.
const MAX_ATTEMPTS: usize = 32;

/// Store errors on attempts before this index are retried; from this
/// attempt on they escalate.
const ESCALATE_AFTER: usize = 3;

/// Draws a random code from the restricted alphabet.
fn random_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..JOIN_CODE_ALPHABET.len());
            JOIN_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Normalizes and validates a user-typed join code before any store
/// access: trimmed, uppercased, fixed length, `[A-Z0-9]` only.
pub(crate) fn validate_code(raw: &str) -> Result<String, LobbyError> {
    let code = raw.trim().to_uppercase();
    let well_formed = code.len() == JOIN_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if well_formed { Ok(code) } else { Err(LobbyError::InvalidCode) }
}

/// Reserves a fresh code for `room_id` and returns it.
pub(crate) async fn allocate(
    store: &dyn Store,
    room_id: &RoomId,
    now_ms: u64,
) -> Result<String, LobbyError> {
    for attempt in 0..MAX_ATTEMPTS {
        let code = random_code();
        let mapping = json!({
            "roomId": room_id.as_str(),
            "createdAt": now_ms,
        });
        match store
            .compare_and_swap(&paths::code(&code), None, Some(mapping))
            .await
        {
            Ok(true) => {
                debug!(%room_id, code, attempt, "join code reserved");
                return Ok(code);
            }
            Ok(false) => {
                trace!(code, attempt, "join code taken, redrawing");
            }
            Err(err) if attempt >= ESCALATE_AFTER => {
                return Err(LobbyError::CodeWrite(err));
            }
            Err(err) => {
                warn!(code, attempt, %err, "join code reservation errored, retrying");
            }
        }
    }
    Err(LobbyError::AllocateCode)
}

/// Resolves a (validated) code to its room id.
pub(crate) async fn resolve(store: &dyn Store, code: &str) -> Result<RoomId, LobbyError> {
    let mapping = store
        .get(&paths::code(code))
        .await?
        .ok_or(LobbyError::CodeNotFound)?;
    mapping
        .get("roomId")
        .and_then(Value::as_str)
        .map(RoomId::from)
        .ok_or(LobbyError::CodeNotFound)
}

// =========================================================================
// Tests
// =========================================================================
