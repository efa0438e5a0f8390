//! Stable per-device identity.
//!
//! On first use a random identifier is generated and persisted to local
//! storage; every later construction reads the same value back. When
//! the auth facility later supplies a verified identity, the provider
//! switches to it for all subsequent writes while the device id stays
//! readable for comparisons against records written earlier.

use std::fs;
use std::path::Path;
use std::sync::RwLock;

use lobbysync_model::PlayerId;
use rand::Rng;
use tracing::{debug, info, warn};

/// Issues the identity every store write is keyed by.
pub struct IdentityProvider {
    device_id: String,
    verified: RwLock<Option<String>>,
    persisted: bool,
}

impl IdentityProvider {
    /// Loads the persisted device id, creating and persisting one on
    /// first use. With no path, or when storage fails, the identity is
    /// held in memory only for this session (degraded: a restart gets
    /// a fresh id).
    pub fn load_or_create(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("no identity storage configured, using session-only id");
            return Self::ephemeral();
        };

        match fs::read_to_string(path) {
            Ok(contents) => {
                let id = contents.trim();
                if !id.is_empty() {
                    return Self {
                        device_id: id.to_owned(),
                        verified: RwLock::new(None),
                        persisted: true,
                    };
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %path.display(), %err, "identity storage unreadable, degrading to session-only id");
                return Self::ephemeral();
            }
        }

        let id = generate_id();
        let written = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => fs::create_dir_all(dir),
            None => Ok(()),
        }
        .and_then(|()| fs::write(path, &id));
        match written {
            Ok(()) => {
                info!(path = %path.display(), "device identity created");
                Self {
                    device_id: id,
                    verified: RwLock::new(None),
                    persisted: true,
                }
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "identity storage unwritable, degrading to session-only id");
                Self {
                    device_id: id,
                    verified: RwLock::new(None),
                    persisted: false,
                }
            }
        }
    }

    fn ephemeral() -> Self {
        Self {
            device_id: generate_id(),
            verified: RwLock::new(None),
            persisted: false,
        }
    }

    /// The identity to use for store writes: the verified id once
    /// adopted, the device id until then. Idempotent.
    pub fn current(&self) -> PlayerId {
        let verified = self.verified.read().expect("identity lock poisoned");
        PlayerId(
            verified
                .clone()
                .unwrap_or_else(|| self.device_id.clone()),
        )
    }

    /// The device-scoped id, regardless of verification. Still valid
    /// for comparing against records written before adoption.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Adopts a verified identity for all subsequent writes.
    pub fn adopt_verified(&self, uid: &str) {
        let mut verified = self.verified.write().expect("identity lock poisoned");
        if verified.as_deref() == Some(uid) {
            return;
        }
        if uid != self.device_id {
            info!(uid, "adopting verified identity");
        }
        *verified = Some(uid.to_owned());
    }

    /// Whether the device id survived to durable storage.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// 32 hex characters, 128 bits of entropy.
fn generate_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
