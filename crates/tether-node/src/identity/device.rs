// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Long-lived Ed25519 device identity.
//!
//! # Encoding
//!
//! - **Public key**: raw 32 bytes, base64url without padding.
//! - **Device id**: lowercase hex of `SHA-256(raw public key)`. It is a pure
//!   function of the key, so the gateway can recompute and check it.
//! - **Signature**: raw 64 bytes, base64url without padding.
//!
//! The secret half never leaves this struct except through
//! [`DeviceIdentity::secret_bytes`], which only the on-disk store uses.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// The node's signing identity.
#[derive(Clone)]
pub struct DeviceIdentity {
    signing_key: SigningKey,
    device_id: String,
    public_key: String,
}

impl DeviceIdentity {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild an identity from its 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let raw_public = signing_key.verifying_key().to_bytes();
        Self {
            device_id: derive_device_id(&raw_public),
            public_key: URL_SAFE_NO_PAD.encode(raw_public),
            signing_key,
        }
    }

    /// Stable identifier derived from the public key.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Public key, base64url without padding.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign `payload` (UTF-8) and return the signature as base64url.
    pub fn sign(&self, payload: &str) -> String {
        let sig: Signature = self.signing_key.sign(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(sig.to_bytes())
    }

    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// `hex(SHA-256(raw_public_key))`.
pub fn derive_device_id(raw_public_key: &[u8]) -> String {
    hex::encode(Sha256::digest(raw_public_key))
}

/// Check a base64url signature over `payload` against a base64url public key.
///
/// This is the gateway's side of the handshake; the node uses it to
/// self-check and in tests.
pub fn verify_signature(public_key: &str, payload: &str, signature: &str) -> bool {
    let Ok(key_raw) = URL_SAFE_NO_PAD.decode(public_key) else {
        return false;
    };
    let Ok(sig_raw) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_raw.as_slice()) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    key.verify_strict(payload.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_sha256_hex_of_public_key() {
        let id = DeviceIdentity::generate();
        let raw = URL_SAFE_NO_PAD.decode(id.public_key()).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(id.device_id(), derive_device_id(&raw));
        assert_eq!(id.device_id().len(), 64);
    }

    #[test]
    fn secret_round_trip_preserves_device_id() {
        let id = DeviceIdentity::generate();
        let back = DeviceIdentity::from_secret_bytes(&id.secret_bytes());
        assert_eq!(back.device_id(), id.device_id());
        assert_eq!(back.public_key(), id.public_key());
    }

    #[test]
    fn signature_verifies_only_for_the_signed_payload() {
        let id = DeviceIdentity::generate();
        let sig = id.sign("v2|a|b");
        assert!(verify_signature(id.public_key(), "v2|a|b", &sig));
        assert!(!verify_signature(id.public_key(), "v2|b|a", &sig));
    }

    #[test]
    fn signature_from_other_key_is_rejected() {
        let a = DeviceIdentity::generate();
        let b = DeviceIdentity::generate();
        let sig = a.sign("payload");
        assert!(!verify_signature(b.public_key(), "payload", &sig));
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        let id = DeviceIdentity::generate();
        assert!(!verify_signature("not base64!", "x", &id.sign("x")));
        assert!(!verify_signature(id.public_key(), "x", "AAAA"));
    }

    #[test]
    fn debug_output_hides_secret() {
        let id = DeviceIdentity::generate();
        let dbg = format!("{id:?}");
        assert!(dbg.contains(id.device_id()));
        assert!(!dbg.contains("signing_key"));
    }
}
