// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use thiserror::Error;

use super::capability::{CapabilityError, Permission};
use crate::protocol::ErrorShape;

/// Wire error codes a command can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CameraDisabled,
    CameraPermissionRequired,
    MicrophonePermissionRequired,
    LocationDisabled,
    LocationPermissionRequired,
    LocationTimeout,
    LocationUnavailable,
    ScreenRecordingPermissionRequired,
    BackgroundUnavailable,
    Unavailable,
    UnknownCommand,
    InvalidParams,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CameraDisabled => "CAMERA_DISABLED",
            ErrorCode::CameraPermissionRequired => "CAMERA_PERMISSION_REQUIRED",
            ErrorCode::MicrophonePermissionRequired => "MICROPHONE_PERMISSION_REQUIRED",
            ErrorCode::LocationDisabled => "LOCATION_DISABLED",
            ErrorCode::LocationPermissionRequired => "LOCATION_PERMISSION_REQUIRED",
            ErrorCode::LocationTimeout => "LOCATION_TIMEOUT",
            ErrorCode::LocationUnavailable => "LOCATION_UNAVAILABLE",
            ErrorCode::ScreenRecordingPermissionRequired => "SCREEN_RECORDING_PERMISSION_REQUIRED",
            ErrorCode::BackgroundUnavailable => "NODE_BACKGROUND_UNAVAILABLE",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command failure as reported to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::new(ErrorCode::UnknownCommand, format!("unknown command: {command}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    /// A failure nothing in the taxonomy describes.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownCommand, message)
    }

    /// Map a collaborator failure for a command in `domain`.
    pub fn from_capability(domain: Domain, err: CapabilityError) -> Self {
        let message = err.to_string();
        let code = match (&err, domain) {
            (CapabilityError::Disabled, Domain::Camera) => ErrorCode::CameraDisabled,
            (CapabilityError::Disabled, Domain::Location) => ErrorCode::LocationDisabled,
            (CapabilityError::Disabled, _) => ErrorCode::Unavailable,
            (CapabilityError::PermissionRequired(p), _) => match p {
                Permission::Camera => ErrorCode::CameraPermissionRequired,
                Permission::Microphone => ErrorCode::MicrophonePermissionRequired,
                Permission::Location => ErrorCode::LocationPermissionRequired,
                Permission::ScreenRecording => ErrorCode::ScreenRecordingPermissionRequired,
            },
            (CapabilityError::Timeout, Domain::Location) => ErrorCode::LocationTimeout,
            (CapabilityError::Unavailable(_), Domain::Location) => ErrorCode::LocationUnavailable,
            (CapabilityError::Timeout | CapabilityError::Unavailable(_), _) => {
                ErrorCode::Unavailable
            }
            (CapabilityError::InvalidInput(_), _) => ErrorCode::InvalidParams,
            (CapabilityError::Other(_), _) => ErrorCode::UnknownCommand,
        };
        Self { code, message }
    }

    pub fn to_shape(&self) -> ErrorShape {
        ErrorShape::new(self.code.as_str(), self.message.clone())
    }
}

/// Command namespace, the part before the dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Camera,
    Canvas,
    Location,
    Screen,
}

impl Domain {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "camera" => Some(Domain::Camera),
            "canvas" => Some(Domain::Canvas),
            "location" => Some(Domain::Location),
            "screen" => Some(Domain::Screen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Camera => "camera",
            Domain::Canvas => "canvas",
            Domain::Location => "location",
            Domain::Screen => "screen",
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_map_by_permission_not_domain() {
        let e = CommandError::from_capability(
            Domain::Camera,
            CapabilityError::PermissionRequired(Permission::Microphone),
        );
        assert_eq!(e.code.as_str(), "MICROPHONE_PERMISSION_REQUIRED");

        let e = CommandError::from_capability(
            Domain::Screen,
            CapabilityError::PermissionRequired(Permission::ScreenRecording),
        );
        assert_eq!(e.code.as_str(), "SCREEN_RECORDING_PERMISSION_REQUIRED");
    }

    #[test]
    fn location_failures_keep_their_own_codes() {
        let timeout = CommandError::from_capability(Domain::Location, CapabilityError::Timeout);
        assert_eq!(timeout.code, ErrorCode::LocationTimeout);
        let gone = CommandError::from_capability(
            Domain::Location,
            CapabilityError::Unavailable("no fix".into()),
        );
        assert_eq!(gone.code, ErrorCode::LocationUnavailable);
    }

    #[test]
    fn other_failures_carry_the_message_as_unknown_command() {
        let e = CommandError::from_capability(
            Domain::Canvas,
            CapabilityError::Other("webview crashed".into()),
        );
        let shape = e.to_shape();
        assert_eq!(shape.code, "UNKNOWN_COMMAND");
        assert_eq!(shape.message, "webview crashed");
    }

    #[test]
    fn disabled_camera_is_camera_disabled() {
        let e = CommandError::from_capability(Domain::Camera, CapabilityError::Disabled);
        assert_eq!(e.code.as_str(), "CAMERA_DISABLED");
    }
}
