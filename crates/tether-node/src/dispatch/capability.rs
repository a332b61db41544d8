// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Interfaces the host platform implements to expose device capabilities.
//!
//! Every operation is asynchronous and fails with a typed
//! [`CapabilityError`]; the dispatcher maps those onto wire error codes.
//! A host installs only the capabilities it has. Commands of a missing
//! capability are neither advertised nor served.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::commands::{CameraFacing, LocationAccuracy};

/// OS permission a capability depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Camera,
    Microphone,
    Location,
    ScreenRecording,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Camera => "camera",
            Permission::Microphone => "microphone",
            Permission::Location => "location",
            Permission::ScreenRecording => "screen recording",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("disabled in settings")]
    Disabled,

    #[error("{0} permission required")]
    PermissionRequired(Permission),

    #[error("timed out")]
    Timeout,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

// ── Value types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: String,
    pub name: String,
    pub position: String,
    pub device_type: String,
}

/// An encoded still image as produced by the host (any format `image` reads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub bytes: Vec<u8>,
}

/// A finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoClip {
    pub bytes: Vec<u8>,
    pub format: String,
    pub duration_ms: u64,
    pub has_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    /// Milliseconds since the Unix epoch at which the fix was taken.
    pub timestamp: i64,
    pub is_precise: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapRequest {
    pub facing: CameraFacing,
    pub device_id: Option<String>,
    pub max_width: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub facing: CameraFacing,
    pub device_id: Option<String>,
    pub duration_ms: u64,
    pub include_audio: bool,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenRecordRequest {
    pub duration_ms: u64,
    pub fps: f64,
    pub include_audio: bool,
    pub screen_index: u32,
    pub format: String,
}

// ── Capability traits ─────────────────────────────────────────────────────────

/// Foreground/background status and OS permission snapshot.
pub trait HostState: Send + Sync {
    fn is_foreground(&self) -> bool;

    /// Permission grants reported in the `connect` request.
    fn permissions(&self) -> BTreeMap<String, bool> {
        BTreeMap::new()
    }
}

#[async_trait]
pub trait CameraCapability: Send + Sync {
    async fn list(&self) -> Result<Vec<CameraDevice>, CapabilityError>;
    async fn snap(&self, req: SnapRequest) -> Result<RawImage, CapabilityError>;
    async fn clip(&self, req: ClipRequest) -> Result<VideoClip, CapabilityError>;
}

#[async_trait]
pub trait CanvasCapability: Send + Sync {
    async fn present(&self, url: Option<String>, placement: Option<Value>)
        -> Result<(), CapabilityError>;
    async fn hide(&self) -> Result<(), CapabilityError>;
    async fn navigate(&self, url: String) -> Result<(), CapabilityError>;
    async fn eval(&self, script: String) -> Result<String, CapabilityError>;
    async fn snapshot(&self, max_width: Option<u32>) -> Result<RawImage, CapabilityError>;
}

#[async_trait]
pub trait LocationCapability: Send + Sync {
    async fn current_fix(&self, accuracy: LocationAccuracy) -> Result<LocationFix, CapabilityError>;
}

#[async_trait]
pub trait ScreenCapability: Send + Sync {
    async fn record(&self, req: ScreenRecordRequest) -> Result<VideoClip, CapabilityError>;
}

/// The capabilities installed on this host.
#[derive(Clone)]
pub struct Capabilities {
    pub host: Arc<dyn HostState>,
    pub camera: Option<Arc<dyn CameraCapability>>,
    pub canvas: Option<Arc<dyn CanvasCapability>>,
    pub location: Option<Arc<dyn LocationCapability>>,
    pub screen: Option<Arc<dyn ScreenCapability>>,
}

impl Capabilities {
    pub fn new(host: Arc<dyn HostState>) -> Self {
        Self {
            host,
            camera: None,
            canvas: None,
            location: None,
            screen: None,
        }
    }

    pub fn with_camera(mut self, camera: Arc<dyn CameraCapability>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_canvas(mut self, canvas: Arc<dyn CanvasCapability>) -> Self {
        self.canvas = Some(canvas);
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationCapability>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_screen(mut self, screen: Arc<dyn ScreenCapability>) -> Self {
        self.screen = Some(screen);
        self
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("camera", &self.camera.is_some())
            .field("canvas", &self.canvas.is_some())
            .field("location", &self.location.is_some())
            .field("screen", &self.screen.is_some())
            .finish()
    }
}
