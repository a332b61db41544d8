// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! On-disk persistence for the device keypair and gateway-issued session
//! tokens.
//!
//! # Layout
//!
//! ```text
//! <dir>/device.yaml        keypair (mode 0600)
//! <dir>/device-auth.yaml   session tokens per role (mode 0600)
//! ```
//!
//! Tokens are bound to the device id they were issued for. Regenerating the
//! keypair deletes the token file, and a token file whose device id does not
//! match the current identity is ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeviceIdentity, IdentityError};

const FILE_VERSION: u32 = 1;
const IDENTITY_FILE: &str = "device.yaml";
const AUTH_FILE: &str = "device-auth.yaml";

/// A gateway-issued credential reused across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub updated_at_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    version: u32,
    device_id: String,
    public_key: String,
    /// Ed25519 secret seed, base64url.
    private_key: String,
    created_at_ms: i64,
}

#[derive(Default, Serialize, Deserialize)]
struct StoredDeviceAuth {
    version: u32,
    device_id: String,
    #[serde(default)]
    tokens: BTreeMap<String, SessionToken>,
}

/// File-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the persisted identity, or create and persist a new one.
    ///
    /// A file that cannot be decoded, or whose recorded device id does not
    /// match its key, is replaced; any stored tokens go with it.
    pub fn load_or_create(&self) -> Result<DeviceIdentity, IdentityError> {
        let path = self.dir.join(IDENTITY_FILE);
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            match decode_identity(&text) {
                Some(identity) => return Ok(identity),
                None => warn!(
                    path = %path.display(),
                    "device identity could not be decoded; regenerating"
                ),
            }
        }
        self.regenerate()
    }

    /// Replace the keypair with a fresh one and drop every stored token.
    pub fn regenerate(&self) -> Result<DeviceIdentity, IdentityError> {
        let identity = DeviceIdentity::generate();
        let stored = StoredIdentity {
            version: FILE_VERSION,
            device_id: identity.device_id().to_string(),
            public_key: identity.public_key().to_string(),
            private_key: URL_SAFE_NO_PAD.encode(identity.secret_bytes()),
            created_at_ms: now_ms(),
        };
        let yaml = serde_yaml::to_string(&stored).map_err(|e| IdentityError::Serde(e.to_string()))?;
        self.write(IDENTITY_FILE, yaml.as_bytes())?;
        self.clear_tokens()?;
        info!(device_id = %identity.device_id(), "created device identity");
        Ok(identity)
    }

    /// The token stored for `role`, if it was issued to `device_id`.
    pub fn load_token(
        &self,
        device_id: &str,
        role: &str,
    ) -> Result<Option<SessionToken>, IdentityError> {
        let Some(auth) = self.read_auth()? else {
            return Ok(None);
        };
        if auth.device_id != device_id {
            return Ok(None);
        }
        Ok(auth.tokens.get(role).cloned())
    }

    /// Persist `token` for `role`, replacing any previous one.
    pub fn store_token(
        &self,
        device_id: &str,
        role: &str,
        token: &str,
        scopes: &[String],
    ) -> Result<(), IdentityError> {
        let mut auth = match self.read_auth()? {
            Some(auth) if auth.device_id == device_id => auth,
            _ => StoredDeviceAuth {
                version: FILE_VERSION,
                device_id: device_id.to_string(),
                tokens: BTreeMap::new(),
            },
        };
        auth.tokens.insert(
            role.to_string(),
            SessionToken {
                token: token.to_string(),
                role: role.to_string(),
                scopes: scopes.to_vec(),
                updated_at_ms: now_ms(),
            },
        );
        let yaml = serde_yaml::to_string(&auth).map_err(|e| IdentityError::Serde(e.to_string()))?;
        self.write(AUTH_FILE, yaml.as_bytes())
    }

    /// Delete every stored session token.
    pub fn clear_tokens(&self) -> Result<(), IdentityError> {
        let path = self.dir.join(AUTH_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn read_auth(&self) -> Result<Option<StoredDeviceAuth>, IdentityError> {
        let path = self.dir.join(AUTH_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        match serde_yaml::from_str(&text) {
            Ok(auth) => Ok(Some(auth)),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable token file: {e}");
                Ok(None)
            }
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), IdentityError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        write_secret_file(&self.dir.join(name), data)
    }
}

fn decode_identity(text: &str) -> Option<DeviceIdentity> {
    let stored: StoredIdentity = serde_yaml::from_str(text).ok()?;
    let raw = URL_SAFE_NO_PAD.decode(stored.private_key).ok()?;
    let secret = <[u8; 32]>::try_from(raw.as_slice()).ok()?;
    let identity = DeviceIdentity::from_secret_bytes(&secret);
    (identity.device_id() == stored.device_id).then_some(identity)
}

/// Write `data` to `path` with mode 0o600 on Unix (owner-read/write only).
fn write_secret_file(path: &Path, data: &[u8]) -> Result<(), IdentityError> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        f.write_all(data).map_err(|e| io_err(path, e))?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> IdentityError {
    IdentityError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let first = store.load_or_create().unwrap();
        let second = store.load_or_create().unwrap();
        assert_eq!(first.device_id(), second.device_id());
    }

    #[test]
    fn token_round_trip_for_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let id = store.load_or_create().unwrap();
        assert!(store.load_token(id.device_id(), "node").unwrap().is_none());

        store
            .store_token(id.device_id(), "node", "tok-1", &[])
            .unwrap();
        let tok = store.load_token(id.device_id(), "node").unwrap().unwrap();
        assert_eq!(tok.token, "tok-1");
        assert!(store.load_token(id.device_id(), "operator").unwrap().is_none());
    }

    #[test]
    fn regenerate_invalidates_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let old = store.load_or_create().unwrap();
        store.store_token(old.device_id(), "node", "tok", &[]).unwrap();

        let new = store.regenerate().unwrap();
        assert_ne!(old.device_id(), new.device_id());
        assert!(store.load_token(new.device_id(), "node").unwrap().is_none());
        assert!(store.load_token(old.device_id(), "node").unwrap().is_none());
    }

    #[test]
    fn token_for_other_device_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.store_token("someone-else", "node", "tok", &[]).unwrap();
        assert!(store.load_token("me", "node").unwrap().is_none());
    }

    #[test]
    fn corrupt_identity_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IDENTITY_FILE), "garbage: [").unwrap();
        let store = IdentityStore::new(dir.path());
        let id = store.load_or_create().unwrap();
        assert_eq!(id.device_id().len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.load_or_create().unwrap();
        let mode = std::fs::metadata(dir.path().join(IDENTITY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
