// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Routes `domain.action` commands to the installed capabilities.
//!
//! Before any capability is touched the dispatcher rejects unknown commands,
//! commands that need the foreground while the host is backgrounded, and
//! commands disabled by local policy. Parameters are decoded into typed
//! structs whose accessors apply defaults and clamps. Captured stills are
//! recompressed with `tether-image`; recordings are base64-encoded verbatim.

pub mod activity;
pub mod capability;
pub mod completion;
pub mod error;
pub mod location;

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tether_config::{LocationMode, NodeConfig};
use tether_image::{encode_jpeg_within, encode_png, EncodedImage, MAX_SNAPSHOT_BYTES};
use tracing::debug;

pub use activity::{ActivityLog, ActivityRecord};
pub use capability::{
    CameraCapability, CameraDevice, CanvasCapability, Capabilities, CapabilityError, ClipRequest,
    HostState, LocationCapability, LocationFix, Permission, RawImage, ScreenCapability,
    ScreenRecordRequest, SnapRequest, VideoClip,
};
pub use completion::{completion, Completion, Pending};
pub use error::{CommandError, Domain, ErrorCode};
pub use location::LocationCache;

use crate::protocol::commands::*;

const CAMERA_COMMANDS: &[&str] = &[CAMERA_LIST, CAMERA_SNAP, CAMERA_CLIP];
const CANVAS_COMMANDS: &[&str] = &[
    CANVAS_PRESENT,
    CANVAS_HIDE,
    CANVAS_NAVIGATE,
    CANVAS_EVAL,
    CANVAS_SNAPSHOT,
];
const LOCATION_COMMANDS: &[&str] = &[LOCATION_GET];
const SCREEN_COMMANDS: &[&str] = &[SCREEN_RECORD];

/// Commands that only work while the host app is in the foreground.
pub const FOREGROUND_COMMANDS: &[&str] = &[
    CAMERA_SNAP,
    CAMERA_CLIP,
    CANVAS_PRESENT,
    CANVAS_NAVIGATE,
    CANVAS_EVAL,
    CANVAS_SNAPSHOT,
    SCREEN_RECORD,
];

pub fn requires_foreground(command: &str) -> bool {
    FOREGROUND_COMMANDS.contains(&command)
}

/// Local settings that can veto a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub camera_enabled: bool,
    pub location_mode: LocationMode,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            camera_enabled: true,
            location_mode: LocationMode::WhileUsing,
        }
    }
}

impl DispatchPolicy {
    pub fn from_config(node: &NodeConfig) -> Self {
        Self {
            camera_enabled: node.camera_enabled,
            location_mode: node.location_mode,
        }
    }
}

pub struct CommandDispatcher {
    caps: Capabilities,
    policy: DispatchPolicy,
    location_cache: LocationCache,
}

impl CommandDispatcher {
    pub fn new(caps: Capabilities, policy: DispatchPolicy) -> Self {
        Self {
            caps,
            policy,
            location_cache: LocationCache::new(),
        }
    }

    fn installed(&self) -> Vec<(Domain, &'static [&'static str])> {
        let mut out = Vec::new();
        if self.caps.camera.is_some() {
            out.push((Domain::Camera, CAMERA_COMMANDS));
        }
        if self.caps.canvas.is_some() {
            out.push((Domain::Canvas, CANVAS_COMMANDS));
        }
        if self.caps.location.is_some() {
            out.push((Domain::Location, LOCATION_COMMANDS));
        }
        if self.caps.screen.is_some() {
            out.push((Domain::Screen, SCREEN_COMMANDS));
        }
        out
    }

    /// Capability names reported in the `connect` request.
    pub fn advertised_caps(&self) -> Vec<String> {
        self.installed()
            .into_iter()
            .map(|(d, _)| d.as_str().to_string())
            .collect()
    }

    /// Commands reported in the `connect` request.
    pub fn advertised_commands(&self) -> Vec<String> {
        self.installed()
            .into_iter()
            .flat_map(|(_, cmds)| cmds.iter().map(|c| c.to_string()))
            .collect()
    }

    pub fn permissions(&self) -> BTreeMap<String, bool> {
        self.caps.host.permissions()
    }

    /// Run one command to completion.
    pub async fn dispatch(&self, command: &str, params: Option<Value>) -> Result<Value, CommandError> {
        let domain = command
            .split_once('.')
            .and_then(|(d, _)| Domain::parse(d))
            .filter(|_| is_known(command))
            .ok_or_else(|| CommandError::unknown_command(command))?;

        if requires_foreground(command) && !self.caps.host.is_foreground() {
            return Err(CommandError::new(
                ErrorCode::BackgroundUnavailable,
                format!("{command} requires the node to be in the foreground"),
            ));
        }

        debug!(command, "dispatching");
        match domain {
            Domain::Camera => self.camera(command, params).await,
            Domain::Canvas => self.canvas(command, params).await,
            Domain::Location => self.location(params).await,
            Domain::Screen => self.screen(params).await,
        }
    }

    async fn camera(&self, command: &str, params: Option<Value>) -> Result<Value, CommandError> {
        if !self.policy.camera_enabled {
            return Err(CommandError::new(
                ErrorCode::CameraDisabled,
                "camera is disabled in settings",
            ));
        }
        let camera = self
            .caps
            .camera
            .as_ref()
            .ok_or_else(|| not_installed(Domain::Camera))?;
        let fail = |e| CommandError::from_capability(Domain::Camera, e);

        match command {
            CAMERA_LIST => {
                let devices = camera.list().await.map_err(fail)?;
                Ok(json!({ "devices": devices }))
            }
            CAMERA_SNAP => {
                let p: CameraSnapParams = parse_params(params)?;
                p.check_format().map_err(CommandError::invalid_params)?;
                let delay = p.effective_delay_ms();
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                let raw = camera
                    .snap(SnapRequest {
                        facing: p.effective_facing(),
                        device_id: p.device_id.clone(),
                        max_width: p.effective_max_width(),
                    })
                    .await
                    .map_err(fail)?;
                let img = recompress(
                    raw.bytes,
                    SnapshotFormat::Jpeg,
                    Some(p.effective_max_width()),
                    p.effective_quality(),
                )
                .await?;
                to_payload(CameraSnapPayload {
                    format: img.format.wire_name().to_string(),
                    base64: img.to_base64(),
                    width: img.width,
                    height: img.height,
                })
            }
            CAMERA_CLIP => {
                let p: CameraClipParams = parse_params(params)?;
                let clip = camera
                    .clip(ClipRequest {
                        facing: p.effective_facing(),
                        device_id: p.device_id.clone(),
                        duration_ms: p.effective_duration_ms(),
                        include_audio: p.effective_include_audio(),
                        format: p.effective_format(),
                    })
                    .await
                    .map_err(fail)?;
                to_payload(ClipPayload {
                    format: clip.format,
                    base64: B64.encode(&clip.bytes),
                    duration_ms: clip.duration_ms,
                    has_audio: clip.has_audio,
                })
            }
            _ => Err(CommandError::unknown_command(command)),
        }
    }

    async fn canvas(&self, command: &str, params: Option<Value>) -> Result<Value, CommandError> {
        let canvas = self
            .caps
            .canvas
            .as_ref()
            .ok_or_else(|| not_installed(Domain::Canvas))?;
        let fail = |e| CommandError::from_capability(Domain::Canvas, e);

        match command {
            CANVAS_PRESENT => {
                let p: CanvasPresentParams = parse_params(params)?;
                canvas.present(p.url, p.placement).await.map_err(fail)?;
                Ok(json!({}))
            }
            CANVAS_HIDE => {
                canvas.hide().await.map_err(fail)?;
                Ok(json!({}))
            }
            CANVAS_NAVIGATE => {
                let p: CanvasNavigateParams = parse_required(params)?;
                if p.url.trim().is_empty() {
                    return Err(CommandError::invalid_params("url must not be empty"));
                }
                canvas.navigate(p.url).await.map_err(fail)?;
                Ok(json!({}))
            }
            CANVAS_EVAL => {
                let p: CanvasEvalParams = parse_required(params)?;
                let result = canvas.eval(p.java_script).await.map_err(fail)?;
                to_payload(CanvasEvalPayload { result })
            }
            CANVAS_SNAPSHOT => {
                let p: CanvasSnapshotParams = parse_params(params)?;
                let raw = canvas
                    .snapshot(p.effective_max_width())
                    .await
                    .map_err(fail)?;
                let img = recompress(
                    raw.bytes,
                    p.effective_format(),
                    p.effective_max_width(),
                    p.effective_quality(),
                )
                .await?;
                to_payload(CanvasSnapshotPayload {
                    format: img.format.wire_name().to_string(),
                    base64: img.to_base64(),
                })
            }
            _ => Err(CommandError::unknown_command(command)),
        }
    }

    async fn location(&self, params: Option<Value>) -> Result<Value, CommandError> {
        if self.policy.location_mode == LocationMode::Off {
            return Err(CommandError::new(
                ErrorCode::LocationDisabled,
                "location sharing is off",
            ));
        }
        let location = self
            .caps
            .location
            .as_ref()
            .ok_or_else(|| not_installed(Domain::Location))?;
        let p: LocationGetParams = parse_params(params)?;

        let accuracy = p.effective_accuracy();
        if let Some(max_age) = p.max_age_ms {
            if let Some(fix) = self
                .location_cache
                .fresh(Duration::from_millis(max_age), accuracy)
            {
                debug!(max_age_ms = max_age, "serving cached location fix");
                return to_payload(fix);
            }
        }

        let timeout_ms = p.effective_timeout_ms();
        let fix = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            location.current_fix(accuracy),
        )
        .await
        .map_err(|_| {
            CommandError::new(
                ErrorCode::LocationTimeout,
                format!("no location fix within {timeout_ms} ms"),
            )
        })?
        .map_err(|e| CommandError::from_capability(Domain::Location, e))?;

        self.location_cache.store(accuracy, fix.clone());
        to_payload(fix)
    }

    async fn screen(&self, params: Option<Value>) -> Result<Value, CommandError> {
        let screen = self
            .caps
            .screen
            .as_ref()
            .ok_or_else(|| not_installed(Domain::Screen))?;
        let p: ScreenRecordParams = parse_params(params)?;
        let req = ScreenRecordRequest {
            duration_ms: p.effective_duration_ms(),
            fps: p.effective_fps(),
            include_audio: p.effective_include_audio(),
            screen_index: p.effective_screen_index(),
            format: p.effective_format(),
        };
        let fps = req.fps;
        let screen_index = req.screen_index;
        let clip = screen
            .record(req)
            .await
            .map_err(|e| CommandError::from_capability(Domain::Screen, e))?;
        to_payload(ScreenRecordPayload {
            format: clip.format,
            base64: B64.encode(&clip.bytes),
            duration_ms: clip.duration_ms,
            fps,
            screen_index,
            has_audio: clip.has_audio,
        })
    }
}

fn is_known(command: &str) -> bool {
    [CAMERA_COMMANDS, CANVAS_COMMANDS, LOCATION_COMMANDS, SCREEN_COMMANDS]
        .iter()
        .any(|set| set.contains(&command))
}

fn not_installed(domain: Domain) -> CommandError {
    CommandError::new(
        ErrorCode::Unavailable,
        format!("{} is not available on this node", domain.as_str()),
    )
}

/// Decode optional params; absent or `null` yields the defaults.
fn parse_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, CommandError> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v).map_err(|e| CommandError::invalid_params(e.to_string())),
    }
}

fn parse_required<T: DeserializeOwned>(params: Option<Value>) -> Result<T, CommandError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| CommandError::invalid_params(e.to_string()))
}

fn to_payload<T: Serialize>(value: T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::unexpected(e.to_string()))
}

async fn recompress(
    raw: Vec<u8>,
    format: SnapshotFormat,
    max_width: Option<u32>,
    quality: f64,
) -> Result<EncodedImage, CommandError> {
    tokio::task::spawn_blocking(move || match format {
        SnapshotFormat::Jpeg => encode_jpeg_within(&raw, max_width, quality, MAX_SNAPSHOT_BYTES),
        SnapshotFormat::Png => encode_png(&raw, max_width),
    })
    .await
    .map_err(|e| CommandError::unexpected(format!("image task failed: {e}")))?
    .map_err(|e| CommandError::unexpected(e.to_string()))
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use base64::Engine as _;

    use super::*;

    struct Host {
        foreground: AtomicBool,
    }

    impl HostState for Host {
        fn is_foreground(&self) -> bool {
            self.foreground.load(Ordering::SeqCst)
        }
        fn permissions(&self) -> BTreeMap<String, bool> {
            BTreeMap::from([("camera".to_string(), true)])
        }
    }

    #[derive(Default)]
    struct Camera {
        calls: AtomicUsize,
        last_clip: Mutex<Option<ClipRequest>>,
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[async_trait]
    impl CameraCapability for Camera {
        async fn list(&self) -> Result<Vec<CameraDevice>, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![CameraDevice {
                id: "cam0".into(),
                name: "Back Camera".into(),
                position: "back".into(),
                device_type: "wide".into(),
            }])
        }
        async fn snap(&self, req: SnapRequest) -> Result<RawImage, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.facing, CameraFacing::Back);
            Ok(RawImage { bytes: png(40, 20) })
        }
        async fn clip(&self, req: ClipRequest) -> Result<VideoClip, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let clip = VideoClip {
                bytes: vec![1, 2, 3],
                format: req.format.clone(),
                duration_ms: req.duration_ms,
                has_audio: req.include_audio,
            };
            *self.last_clip.lock().unwrap() = Some(req);
            Ok(clip)
        }
    }

    struct SlowLocation {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationCapability for SlowLocation {
        async fn current_fix(&self, _: LocationAccuracy) -> Result<LocationFix, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(LocationFix {
                lat: 59.0 + n as f64,
                lon: 18.0,
                accuracy_meters: 10.0,
                altitude_meters: None,
                speed_mps: None,
                heading_deg: None,
                timestamp: 1_700_000_000_000,
                is_precise: true,
                source: "gps".into(),
            })
        }
    }

    struct Screen;

    #[async_trait]
    impl ScreenCapability for Screen {
        async fn record(&self, req: ScreenRecordRequest) -> Result<VideoClip, CapabilityError> {
            if req.screen_index > 0 {
                return Err(CapabilityError::PermissionRequired(Permission::ScreenRecording));
            }
            Ok(VideoClip {
                bytes: vec![0; 4],
                format: req.format,
                duration_ms: req.duration_ms,
                has_audio: false,
            })
        }
    }

    fn host(foreground: bool) -> Arc<Host> {
        Arc::new(Host {
            foreground: AtomicBool::new(foreground),
        })
    }

    fn dispatcher_with(camera: Arc<Camera>, foreground: bool) -> CommandDispatcher {
        CommandDispatcher::new(
            Capabilities::new(host(foreground)).with_camera(camera),
            DispatchPolicy::default(),
        )
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let d = dispatcher_with(Arc::new(Camera::default()), true);
        for cmd in ["camera.zoom", "sms.send", "nodot", ""] {
            let err = d.dispatch(cmd, None).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::UnknownCommand, "{cmd}");
        }
    }

    #[tokio::test]
    async fn background_blocks_foreground_commands_without_calling_camera() {
        let camera = Arc::new(Camera::default());
        let d = dispatcher_with(camera.clone(), false);

        let err = d.dispatch(CAMERA_SNAP, None).await.unwrap_err();
        assert_eq!(err.to_shape().code, "NODE_BACKGROUND_UNAVAILABLE");
        assert_eq!(camera.calls.load(Ordering::SeqCst), 0);

        // camera.list is allowed in the background
        d.dispatch(CAMERA_LIST, None).await.unwrap();
        assert_eq!(camera.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_camera_never_reaches_capability() {
        let camera = Arc::new(Camera::default());
        let d = CommandDispatcher::new(
            Capabilities::new(host(true)).with_camera(camera.clone()),
            DispatchPolicy {
                camera_enabled: false,
                ..DispatchPolicy::default()
            },
        );
        let err = d.dispatch(CAMERA_LIST, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CameraDisabled);
        assert_eq!(camera.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clip_duration_is_clamped_before_capture() {
        let camera = Arc::new(Camera::default());
        let d = dispatcher_with(camera.clone(), true);
        let payload = d
            .dispatch(CAMERA_CLIP, Some(json!({"durationMs": 120000})))
            .await
            .unwrap();
        assert_eq!(camera.last_clip.lock().unwrap().as_ref().unwrap().duration_ms, 60_000);
        assert_eq!(payload["durationMs"], 60_000);
        assert_eq!(payload["base64"], "AQID");
    }

    #[tokio::test]
    async fn snap_is_recompressed_to_jpeg() {
        let d = dispatcher_with(Arc::new(Camera::default()), true);
        let payload = d
            .dispatch(CAMERA_SNAP, Some(json!({"maxWidth": 20})))
            .await
            .unwrap();
        assert_eq!(payload["format"], "jpg");
        assert_eq!(payload["width"], 20);
        assert_eq!(payload["height"], 10);
        let bytes = B64.decode(payload["base64"].as_str().unwrap()).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn snap_refuses_formats_other_than_jpeg() {
        let camera = Arc::new(Camera::default());
        let d = dispatcher_with(camera.clone(), true);
        let err = d
            .dispatch(CAMERA_SNAP, Some(json!({"format": "png"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(camera.calls.load(Ordering::SeqCst), 0);

        let payload = d
            .dispatch(CAMERA_SNAP, Some(json!({"format": "JPEG"})))
            .await
            .unwrap();
        assert_eq!(payload["format"], "jpg");
    }

    #[tokio::test]
    async fn bad_params_are_invalid_params() {
        let d = dispatcher_with(Arc::new(Camera::default()), true);
        let err = d
            .dispatch(CAMERA_SNAP, Some(json!({"facing": "sideways"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn missing_capability_is_unavailable_and_not_advertised() {
        let d = dispatcher_with(Arc::new(Camera::default()), true);
        let err = d.dispatch(SCREEN_RECORD, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        assert_eq!(d.advertised_caps(), ["camera"]);
        assert_eq!(d.advertised_commands(), CAMERA_COMMANDS);
        assert_eq!(d.permissions().get("camera"), Some(&true));
    }

    #[tokio::test]
    async fn screen_record_clamps_and_maps_permission() {
        let d = CommandDispatcher::new(
            Capabilities::new(host(true)).with_screen(Arc::new(Screen)),
            DispatchPolicy::default(),
        );
        let payload = d
            .dispatch(SCREEN_RECORD, Some(json!({"durationMs": 90000, "fps": 0.5})))
            .await
            .unwrap();
        assert_eq!(payload["durationMs"], 60_000);
        assert_eq!(payload["fps"], 1.0);
        assert_eq!(payload["screenIndex"], 0);

        let err = d
            .dispatch(SCREEN_RECORD, Some(json!({"screenIndex": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ScreenRecordingPermissionRequired);
    }

    #[tokio::test(start_paused = true)]
    async fn location_serves_cache_within_max_age() {
        let loc = Arc::new(SlowLocation {
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        });
        let d = CommandDispatcher::new(
            Capabilities::new(host(false)).with_location(loc.clone()),
            DispatchPolicy::default(),
        );

        let first = d.dispatch(LOCATION_GET, None).await.unwrap();
        let cached = d
            .dispatch(LOCATION_GET, Some(json!({"maxAgeMs": 5000})))
            .await
            .unwrap();
        assert_eq!(first, cached);
        assert_eq!(loc.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(6000)).await;
        let fresh = d
            .dispatch(LOCATION_GET, Some(json!({"maxAgeMs": 5000})))
            .await
            .unwrap();
        assert_ne!(fresh["lat"], first["lat"]);
        assert_eq!(loc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn coarse_cached_fix_is_not_reused_for_precise_request() {
        let loc = Arc::new(SlowLocation {
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        });
        let d = CommandDispatcher::new(
            Capabilities::new(host(false)).with_location(loc.clone()),
            DispatchPolicy::default(),
        );

        d.dispatch(LOCATION_GET, Some(json!({"desiredAccuracy": "coarse"})))
            .await
            .unwrap();
        d.dispatch(
            LOCATION_GET,
            Some(json!({"desiredAccuracy": "precise", "maxAgeMs": 60000})),
        )
        .await
        .unwrap();
        assert_eq!(loc.calls.load(Ordering::SeqCst), 2);

        d.dispatch(
            LOCATION_GET,
            Some(json!({"desiredAccuracy": "coarse", "maxAgeMs": 60000})),
        )
        .await
        .unwrap();
        assert_eq!(loc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_location_times_out() {
        let loc = Arc::new(SlowLocation {
            delay: Duration::from_secs(30),
            calls: AtomicUsize::new(0),
        });
        let d = CommandDispatcher::new(
            Capabilities::new(host(true)).with_location(loc),
            DispatchPolicy::default(),
        );
        let err = d
            .dispatch(LOCATION_GET, Some(json!({"timeoutMs": 2000})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LocationTimeout);
    }

    #[tokio::test]
    async fn location_off_is_location_disabled() {
        let d = CommandDispatcher::new(
            Capabilities::new(host(true)).with_location(Arc::new(SlowLocation {
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })),
            DispatchPolicy {
                location_mode: LocationMode::Off,
                ..DispatchPolicy::default()
            },
        );
        let err = d.dispatch(LOCATION_GET, None).await.unwrap_err();
        assert_eq!(err.to_shape().code, "LOCATION_DISABLED");
    }
}
