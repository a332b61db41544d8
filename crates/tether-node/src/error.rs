// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use crate::identity::IdentityError;
use crate::protocol::ErrorShape;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("node task has shut down")]
    Shutdown,
}

/// Why an outbound request did not produce a payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("gateway rejected request: {0}")]
    Rejected(ErrorShape),

    #[error("connection lost before a response arrived")]
    ConnectionLost,

    #[error("not connected to the gateway")]
    NotConnected,

    #[error("request timed out")]
    Timeout,

    #[error("node task has shut down")]
    Shutdown,

    #[error("could not encode request: {0}")]
    Encode(String),
}
