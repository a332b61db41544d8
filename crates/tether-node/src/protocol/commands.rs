// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Invocation envelopes and typed parameters for every node command.
//!
//! Parameter structs keep the raw optional fields as sent by the gateway and
//! expose `effective_*` accessors that apply defaults and clamps, so callers
//! never see an out-of-range value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NODE_INVOKE_METHOD: &str = "node.invoke";
pub const NODE_INVOKE_REQUEST_EVENT: &str = "node.invoke.request";
pub const NODE_INVOKE_RESULT_METHOD: &str = "node.invoke.result";
pub const NODE_EVENT_METHOD: &str = "node.event";

pub const CAMERA_LIST: &str = "camera.list";
pub const CAMERA_SNAP: &str = "camera.snap";
pub const CAMERA_CLIP: &str = "camera.clip";
pub const CANVAS_PRESENT: &str = "canvas.present";
pub const CANVAS_HIDE: &str = "canvas.hide";
pub const CANVAS_NAVIGATE: &str = "canvas.navigate";
pub const CANVAS_EVAL: &str = "canvas.eval";
pub const CANVAS_SNAPSHOT: &str = "canvas.snapshot";
pub const LOCATION_GET: &str = "location.get";
pub const SCREEN_RECORD: &str = "screen.record";

/// Upper bound for any recording duration.
pub const MAX_DURATION_MS: u64 = 60_000;
/// Upper bound for the pre-capture delay of `camera.snap`.
pub const MAX_SNAP_DELAY_MS: u64 = 10_000;

pub const DEFAULT_QUALITY: f64 = 0.9;
pub const DEFAULT_MAX_WIDTH: u32 = 1600;
pub const DEFAULT_CLIP_DURATION_MS: u64 = 3_000;
pub const DEFAULT_SCREEN_DURATION_MS: u64 = 10_000;
pub const DEFAULT_SCREEN_FPS: f64 = 10.0;
pub const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 10_000;

fn clamp_quality(q: Option<f64>) -> f64 {
    match q {
        Some(q) if q.is_finite() => q.clamp(0.05, 1.0),
        _ => DEFAULT_QUALITY,
    }
}

fn clamp_max_width(w: Option<u32>) -> u32 {
    match w {
        Some(w) if w > 0 => w,
        _ => DEFAULT_MAX_WIDTH,
    }
}

fn clamp_duration(d: Option<u64>, default: u64) -> u64 {
    d.unwrap_or(default).min(MAX_DURATION_MS)
}

// ── Invocation envelopes ──────────────────────────────────────────────────────

/// `params` of a `node.invoke` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInvokeParams {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, rename = "paramsJSON", skip_serializing_if = "Option::is_none")]
    pub params_json: Option<String>,
}

impl NodeInvokeParams {
    /// Command parameters, preferring the inline object over the JSON string.
    pub fn resolved_params(&self) -> Result<Option<Value>, String> {
        resolve_params(self.params.as_ref(), self.params_json.as_deref())
    }
}

/// Payload of a `node.invoke.request` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInvokeRequest {
    pub id: String,
    pub node_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, rename = "paramsJSON", skip_serializing_if = "Option::is_none")]
    pub params_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl NodeInvokeRequest {
    pub fn resolved_params(&self) -> Result<Option<Value>, String> {
        resolve_params(self.params.as_ref(), self.params_json.as_deref())
    }
}

fn resolve_params(inline: Option<&Value>, json: Option<&str>) -> Result<Option<Value>, String> {
    if let Some(v) = inline {
        return Ok(Some(v.clone()));
    }
    match json {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| format!("paramsJSON is not valid JSON: {e}")),
        _ => Ok(None),
    }
}

/// `params` of the `node.invoke.result` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInvokeResult {
    pub id: String,
    pub node_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<super::ErrorShape>,
}

/// `params` of a `node.event` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEventParams {
    pub event: String,
    #[serde(rename = "payloadJSON", skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
}

// ── Camera ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapParams {
    #[serde(default)]
    pub facing: Option<CameraFacing>,
    pub max_width: Option<u32>,
    pub quality: Option<f64>,
    pub format: Option<String>,
    pub delay_ms: Option<u64>,
    pub device_id: Option<String>,
}

impl CameraSnapParams {
    pub fn effective_facing(&self) -> CameraFacing {
        self.facing.unwrap_or_default()
    }
    pub fn effective_max_width(&self) -> u32 {
        clamp_max_width(self.max_width)
    }
    pub fn effective_quality(&self) -> f64 {
        clamp_quality(self.quality)
    }
    pub fn effective_delay_ms(&self) -> u64 {
        self.delay_ms.unwrap_or(0).min(MAX_SNAP_DELAY_MS)
    }
    /// Stills are always delivered as JPEG; any other requested format is
    /// refused rather than silently substituted.
    pub fn check_format(&self) -> Result<(), String> {
        match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("jpg") | Some("jpeg") => Ok(()),
            Some(other) => Err(format!("unsupported camera.snap format {other:?}; use \"jpg\"")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraClipParams {
    #[serde(default)]
    pub facing: Option<CameraFacing>,
    pub duration_ms: Option<u64>,
    pub include_audio: Option<bool>,
    pub format: Option<String>,
    pub device_id: Option<String>,
}

impl CameraClipParams {
    pub fn effective_facing(&self) -> CameraFacing {
        self.facing.unwrap_or_default()
    }
    pub fn effective_duration_ms(&self) -> u64 {
        clamp_duration(self.duration_ms, DEFAULT_CLIP_DURATION_MS)
    }
    pub fn effective_include_audio(&self) -> bool {
        self.include_audio.unwrap_or(true)
    }
    pub fn effective_format(&self) -> String {
        self.format.clone().unwrap_or_else(|| "mp4".to_string())
    }
}

// ── Canvas ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasPresentParams {
    pub url: Option<String>,
    pub placement: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CanvasEvalParams {
    #[serde(rename = "javaScript")]
    pub java_script: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshotParams {
    pub format: Option<SnapshotFormat>,
    pub max_width: Option<u32>,
    pub quality: Option<f64>,
}

impl CanvasSnapshotParams {
    pub fn effective_format(&self) -> SnapshotFormat {
        self.format.unwrap_or_default()
    }
    /// Canvas snapshots keep their native width unless asked otherwise.
    pub fn effective_max_width(&self) -> Option<u32> {
        self.max_width.filter(|w| *w > 0)
    }
    pub fn effective_quality(&self) -> f64 {
        clamp_quality(self.quality)
    }
}

// ── Location ──────────────────────────────────────────────────────────────────

/// Ordered from least to most precise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationAccuracy {
    Coarse,
    #[default]
    Balanced,
    Precise,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationGetParams {
    pub timeout_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
    pub desired_accuracy: Option<LocationAccuracy>,
}

impl LocationGetParams {
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_LOCATION_TIMEOUT_MS)
            .min(MAX_DURATION_MS)
    }
    pub fn effective_accuracy(&self) -> LocationAccuracy {
        self.desired_accuracy.unwrap_or_default()
    }
}

// ── Screen ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRecordParams {
    pub duration_ms: Option<u64>,
    pub fps: Option<f64>,
    pub include_audio: Option<bool>,
    pub screen_index: Option<u32>,
    pub format: Option<String>,
}

impl ScreenRecordParams {
    pub fn effective_duration_ms(&self) -> u64 {
        clamp_duration(self.duration_ms, DEFAULT_SCREEN_DURATION_MS)
    }
    pub fn effective_fps(&self) -> f64 {
        match self.fps {
            Some(f) if f.is_finite() => f.clamp(1.0, 60.0),
            _ => DEFAULT_SCREEN_FPS,
        }
    }
    pub fn effective_include_audio(&self) -> bool {
        self.include_audio.unwrap_or(true)
    }
    pub fn effective_screen_index(&self) -> u32 {
        self.screen_index.unwrap_or(0)
    }
    pub fn effective_format(&self) -> String {
        self.format.clone().unwrap_or_else(|| "mp4".to_string())
    }
}

// ── Result payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapPayload {
    pub format: String,
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipPayload {
    pub format: String,
    pub base64: String,
    pub duration_ms: u64,
    pub has_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenRecordPayload {
    pub format: String,
    pub base64: String,
    pub duration_ms: u64,
    pub fps: f64,
    pub screen_index: u32,
    pub has_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasEvalPayload {
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasSnapshotPayload {
    pub format: String,
    pub base64: String,
}

// ── Unit tests ────────────────────────────────────────────────────────────────
