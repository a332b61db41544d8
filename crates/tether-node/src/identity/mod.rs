// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod device;
pub mod store;

pub use device::{derive_device_id, verify_signature, DeviceIdentity};
pub use store::{IdentityStore, SessionToken};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity storage error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode identity file: {0}")]
    Serde(String),
}
