//! In-memory platform with a single simulated camera
//!
//! Every device-level operation is appended to a shared log so callers can
//! check ordering. Readiness, failures and torch behaviour can be changed at
//! runtime to reproduce misbehaving devices.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{
    Attachment, CapabilitySet, MediaDevices, MediaStream, MediaTrack, Platform, StreamConstraints,
    TrackConstraints, TrackKind, VideoConstraints, VideoSink, LOADED_DATA_EVENT,
};
use crate::config::SimulatorConfig;
use crate::error::CameraError;
use crate::shim::PlatformDetails;
use crate::signal::{delay, EventEmitter, EventTarget, SinkEvent, ERROR_EVENT};

/// A device-level operation observed by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Acquire { stream: String },
    Attach { sink: String, method: &'static str },
    Play { sink: String },
    Detach { sink: String },
    Reload { sink: String },
    Torch { track: String, enabled: bool },
    RemoveTrack { stream: String, track: String },
    StopTrack { track: String },
}

/// How a sink reacts to play() while a stream is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Raise `loadeddata` after the configured latency
    Loads,
    /// Raise `error` instead
    Errors,
    /// Never signal anything, like a restarted mobile app shell
    Never,
}

struct Shared {
    config: Mutex<SimulatorConfig>,
    log: Mutex<Vec<DeviceOp>>,
    readiness: Mutex<Readiness>,
    pending_failure: Mutex<Option<CameraError>>,
    pending_patch_failure: Mutex<Option<CameraError>>,
    capabilities_available: AtomicBool,
    torch_rejected: AtomicBool,
    patches: AtomicUsize,
    patch_attempts: AtomicUsize,
    live_tracks: AtomicUsize,
    next_id: AtomicU64,
}

impl Shared {
    fn record(&self, op: DeviceOp) {
        debug!("Simulated device op: {:?}", op);
        lock(&self.log).push(op);
    }

    fn config(&self) -> SimulatorConfig {
        lock(&self.config).clone()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated execution environment
pub struct SimulatedPlatform {
    shared: Arc<Shared>,
}

impl SimulatedPlatform {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                log: Mutex::new(Vec::new()),
                readiness: Mutex::new(Readiness::Loads),
                pending_failure: Mutex::new(None),
                pending_patch_failure: Mutex::new(None),
                capabilities_available: AtomicBool::new(true),
                torch_rejected: AtomicBool::new(false),
                patches: AtomicUsize::new(0),
                patch_attempts: AtomicUsize::new(0),
                live_tracks: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a render surface bound to this platform
    pub fn sink(&self, name: &str) -> Arc<SimulatedSink> {
        Arc::new(SimulatedSink {
            name: name.to_string(),
            shared: self.shared.clone(),
            events: EventEmitter::new(),
            source: Mutex::new(None),
        })
    }

    pub fn operations(&self) -> Vec<DeviceOp> {
        lock(&self.shared.log).clone()
    }

    /// Number of successful device acquisitions so far
    pub fn acquisitions(&self) -> usize {
        lock(&self.shared.log)
            .iter()
            .filter(|op| matches!(op, DeviceOp::Acquire { .. }))
            .count()
    }

    /// Tracks acquired and not yet stopped
    pub fn live_tracks(&self) -> usize {
        self.shared.live_tracks.load(Ordering::SeqCst)
    }

    /// Compatibility patches that succeeded
    pub fn compat_patch_count(&self) -> usize {
        self.shared.patches.load(Ordering::SeqCst)
    }

    pub fn compat_patch_attempts(&self) -> usize {
        self.shared.patch_attempts.load(Ordering::SeqCst)
    }

    /// Make the next compatibility patch fail with `error`
    pub fn fail_next_compat_patch(&self, error: CameraError) {
        *lock(&self.shared.pending_patch_failure) = Some(error);
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        lock(&self.shared.config).user_agent = user_agent.to_string();
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        *lock(&self.shared.readiness) = readiness;
    }

    /// Make the next acquisition fail with `error`
    pub fn fail_next_acquisition(&self, error: CameraError) {
        *lock(&self.shared.pending_failure) = Some(error);
    }

    pub fn set_secure_context(&self, secure: bool) {
        lock(&self.shared.config).secure_context = secure;
    }

    pub fn set_media_devices(&self, available: bool) {
        lock(&self.shared.config).media_devices = available;
    }

    pub fn set_torch_supported(&self, supported: bool) {
        lock(&self.shared.config).torch_supported = supported;
    }

    /// Whether new tracks expose capabilities at all
    pub fn set_capabilities_available(&self, available: bool) {
        self.shared
            .capabilities_available
            .store(available, Ordering::SeqCst);
    }

    /// Make tracks reject torch constraints even when they advertise a torch
    pub fn set_torch_rejected(&self, rejected: bool) {
        self.shared.torch_rejected.store(rejected, Ordering::SeqCst);
    }
}

impl Platform for SimulatedPlatform {
    fn is_secure_context(&self) -> bool {
        self.shared.config().secure_context
    }

    fn media_devices(&self) -> Option<Arc<dyn MediaDevices>> {
        if self.shared.config().media_devices {
            Some(Arc::new(SimulatedDevices {
                shared: self.shared.clone(),
            }))
        } else {
            None
        }
    }

    fn user_agent(&self) -> String {
        self.shared.config().user_agent
    }

    fn apply_compat_patch(&self, details: &PlatformDetails) -> Result<(), CameraError> {
        debug!("Simulated compatibility patch for {:?}", details.browser);
        self.shared.patch_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.shared.pending_patch_failure).take() {
            return Err(error);
        }
        self.shared.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_object_url(&self, stream: &Arc<dyn MediaStream>) -> Option<String> {
        self.shared
            .config()
            .object_url_supported
            .then(|| format!("blob:simulated/{}", stream.id()))
    }

    fn create_legacy_object_url(&self, stream: &Arc<dyn MediaStream>) -> Option<String> {
        self.shared
            .config()
            .legacy_object_url_supported
            .then(|| format!("blob:simulated-legacy/{}", stream.id()))
    }
}

struct SimulatedDevices {
    shared: Arc<Shared>,
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Arc<dyn MediaStream>, CameraError> {
        let config = self.shared.config();
        delay(Duration::from_millis(config.acquire_latency_ms)).await;

        if let Some(error) = lock(&self.shared.pending_failure).take() {
            return Err(error);
        }

        let id = self.shared.next_id();
        let capabilities = if self.shared.capabilities_available.load(Ordering::SeqCst) {
            Some(camera_capabilities(&constraints.video, config.torch_supported))
        } else {
            None
        };

        let track = Arc::new(SimulatedTrack {
            id: format!("track-{}", id),
            shared: self.shared.clone(),
            capabilities,
            stopped: AtomicBool::new(false),
        });
        let stream = Arc::new(SimulatedStream {
            id: format!("stream-{}", id),
            shared: self.shared.clone(),
            tracks: Mutex::new(vec![track]),
        });

        self.shared.live_tracks.fetch_add(1, Ordering::SeqCst);
        self.shared.record(DeviceOp::Acquire {
            stream: stream.id.clone(),
        });
        Ok(stream as Arc<dyn MediaStream>)
    }
}

fn camera_capabilities(constraints: &VideoConstraints, torch: bool) -> CapabilitySet {
    let facing = constraints
        .facing_mode
        .map(|mode| vec![mode.as_str()])
        .unwrap_or_default();
    let device_id = constraints
        .device_id
        .clone()
        .unwrap_or_else(|| "simulated-camera-0".to_string());

    let capabilities = CapabilitySet::new()
        .with("deviceId", json!(device_id))
        .with("facingMode", json!(facing))
        .with("width", json!({"min": 1, "max": 1920}))
        .with("height", json!({"min": 1, "max": 1080}))
        .with("frameRate", json!({"min": 1, "max": 30}));

    if torch {
        capabilities.with("torch", json!(true))
    } else {
        capabilities
    }
}

/// Simulated camera track
pub struct SimulatedTrack {
    id: String,
    shared: Arc<Shared>,
    capabilities: Option<CapabilitySet>,
    stopped: AtomicBool,
}

#[async_trait]
impl MediaTrack for SimulatedTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn capabilities(&self) -> Option<CapabilitySet> {
        self.capabilities.clone()
    }

    async fn apply_constraints(&self, constraints: &TrackConstraints) -> Result<(), CameraError> {
        let Some(enabled) = constraints.requested_torch() else {
            return Ok(());
        };

        let supported = self
            .capabilities
            .as_ref()
            .map(CapabilitySet::supports_torch)
            .unwrap_or(false);
        if !supported || self.shared.torch_rejected.load(Ordering::SeqCst) {
            return Err(CameraError::Constraint(format!(
                "torch not available on {}",
                self.id
            )));
        }

        self.shared.record(DeviceOp::Torch {
            track: self.id.clone(),
            enabled,
        });
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shared.live_tracks.fetch_sub(1, Ordering::SeqCst);
            self.shared.record(DeviceOp::StopTrack {
                track: self.id.clone(),
            });
        }
    }
}

/// Simulated media stream
pub struct SimulatedStream {
    id: String,
    shared: Arc<Shared>,
    tracks: Mutex<Vec<Arc<SimulatedTrack>>>,
}

impl MediaStream for SimulatedStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        lock(&self.tracks)
            .iter()
            .map(|t| t.clone() as Arc<dyn MediaTrack>)
            .collect()
    }

    fn remove_track(&self, track_id: &str) {
        lock(&self.tracks).retain(|t| t.id != track_id);
        self.shared.record(DeviceOp::RemoveTrack {
            stream: self.id.clone(),
            track: track_id.to_string(),
        });
    }
}

/// Simulated render surface
pub struct SimulatedSink {
    name: String,
    shared: Arc<Shared>,
    events: EventEmitter,
    source: Mutex<Option<String>>,
}

impl SimulatedSink {
    /// Current source: stream id for stream attachments, URL otherwise
    pub fn source(&self) -> Option<String> {
        lock(&self.source).clone()
    }

    fn emit_later(&self, event: SinkEvent, after: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            delay(after).await;
            events.emit(event);
        });
    }
}

impl EventTarget for SimulatedSink {
    fn events(&self) -> &EventEmitter {
        &self.events
    }
}

impl VideoSink for SimulatedSink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn supports_src_object(&self) -> bool {
        self.shared.config().src_object_supported
    }

    fn supports_legacy_src_object(&self) -> bool {
        self.shared.config().legacy_src_object_supported
    }

    fn attach(&self, attachment: Attachment) {
        let method = attachment.method();
        let source = match attachment {
            Attachment::SrcObject(stream) | Attachment::LegacySrcObject(stream) => stream.id(),
            Attachment::Source(url) => url,
        };
        *lock(&self.source) = Some(source);
        self.shared.record(DeviceOp::Attach {
            sink: self.name.clone(),
            method,
        });
    }

    fn detach(&self) {
        *lock(&self.source) = None;
        self.shared.record(DeviceOp::Detach {
            sink: self.name.clone(),
        });
    }

    fn play(&self) {
        self.shared.record(DeviceOp::Play {
            sink: self.name.clone(),
        });
        if self.source().is_none() {
            return;
        }

        let latency = Duration::from_millis(self.shared.config().ready_latency_ms);
        let readiness = *lock(&self.shared.readiness);
        match readiness {
            Readiness::Loads => self.emit_later(SinkEvent::new(LOADED_DATA_EVENT), latency),
            Readiness::Errors => self.emit_later(
                SinkEvent::new(ERROR_EVENT).with_detail("MEDIA_ERR_DECODE"),
                latency,
            ),
            Readiness::Never => {}
        }
    }

    fn load(&self) {
        self.shared.record(DeviceOp::Reload {
            sink: self.name.clone(),
        });
        if self.source().is_none() {
            // Reloading an empty source always fails.
            let latency = Duration::from_millis(self.shared.config().reload_latency_ms);
            self.emit_later(
                SinkEvent::new(ERROR_EVENT).with_detail("MEDIA_ERR_SRC_NOT_SUPPORTED"),
                latency,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{select_attachment, FacingMode};
    use crate::signal::event_on;

    fn platform() -> SimulatedPlatform {
        SimulatedPlatform::new(SimulatorConfig::default())
    }

    async fn acquire(platform: &SimulatedPlatform) -> Arc<dyn MediaStream> {
        let devices = platform.media_devices().unwrap();
        let constraints =
            StreamConstraints::video_only(VideoConstraints::facing(FacingMode::User).shared());
        devices.get_user_media(&constraints).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reports_capabilities() {
        let platform = platform();
        let stream = acquire(&platform).await;

        let tracks = stream.video_tracks();
        assert_eq!(tracks.len(), 1);
        let capabilities = tracks[0].capabilities().unwrap();
        assert!(capabilities.supports_torch());
        assert_eq!(capabilities.get("facingMode"), Some(&json!(["user"])));
        assert_eq!(platform.live_tracks(), 1);
        assert_eq!(platform.acquisitions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_failure_is_consumed_once() {
        let platform = platform();
        let devices = platform.media_devices().unwrap();
        let constraints = StreamConstraints::video_only(VideoConstraints::default().shared());
        let denied = CameraError::acquisition(crate::error::AcquisitionErrorKind::NotAllowed, "denied");

        platform.fail_next_acquisition(denied.clone());
        assert_eq!(devices.get_user_media(&constraints).await.err(), Some(denied));
        assert!(devices.get_user_media(&constraints).await.is_ok());
    }

    async fn attach_with(
        config: SimulatorConfig,
    ) -> (&'static str, Option<String>, Vec<DeviceOp>, String) {
        let platform = SimulatedPlatform::new(config);
        let stream = acquire(&platform).await;

        let sink = platform.sink("video");
        let attachment = select_attachment(sink.as_ref(), &platform, stream.clone());
        let method = attachment.method();
        sink.attach(attachment);

        let attaches = platform
            .operations()
            .into_iter()
            .filter(|op| matches!(op, DeviceOp::Attach { .. }))
            .collect();
        (method, sink.source(), attaches, stream.id())
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_priority() {
        let all = SimulatorConfig {
            src_object_supported: true,
            legacy_src_object_supported: true,
            object_url_supported: true,
            legacy_object_url_supported: true,
            ..SimulatorConfig::default()
        };

        let tiers = [
            (all.clone(), "srcObject", None),
            (
                SimulatorConfig {
                    src_object_supported: false,
                    ..all.clone()
                },
                "mozSrcObject",
                None,
            ),
            (
                SimulatorConfig {
                    src_object_supported: false,
                    legacy_src_object_supported: false,
                    ..all.clone()
                },
                "src",
                Some("blob:simulated/"),
            ),
            (
                SimulatorConfig {
                    src_object_supported: false,
                    legacy_src_object_supported: false,
                    object_url_supported: false,
                    ..all.clone()
                },
                "src",
                Some("blob:simulated-legacy/"),
            ),
            (
                SimulatorConfig {
                    src_object_supported: false,
                    legacy_src_object_supported: false,
                    object_url_supported: false,
                    legacy_object_url_supported: false,
                    ..all.clone()
                },
                "src",
                Some(""),
            ),
        ];

        for (config, expected_method, url_prefix) in tiers {
            let (method, source, attaches, stream_id) = attach_with(config).await;
            assert_eq!(method, expected_method);

            // Stream attachments and the bare-id fallback use the stream id,
            // URL attachments use the URL.
            let expected_source = match url_prefix {
                Some(prefix) => format!("{}{}", prefix, stream_id),
                None => stream_id,
            };
            assert_eq!(source, Some(expected_source));

            // Exactly one mechanism is used per attachment.
            assert_eq!(
                attaches,
                vec![DeviceOp::Attach {
                    sink: "video".to_string(),
                    method: expected_method,
                }]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capabilities_follow_requested_device() {
        let platform = platform();
        let devices = platform.media_devices().unwrap();
        let constraints = StreamConstraints::video_only(VideoConstraints::device("rear-wide").shared());
        let stream = devices.get_user_media(&constraints).await.unwrap();

        let capabilities = stream.video_tracks()[0].capabilities().unwrap();
        assert_eq!(capabilities.get("deviceId"), Some(&json!("rear-wide")));
        assert_eq!(capabilities.get("facingMode"), Some(&json!([])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reload_raises_error() {
        let platform = platform();
        let sink = platform.sink("sink");
        let reloaded = event_on(sink.as_ref(), ERROR_EVENT);
        sink.load();
        let event = reloaded.await.unwrap();
        assert_eq!(event.detail.as_deref(), Some("MEDIA_ERR_SRC_NOT_SUPPORTED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_stop_is_counted_once() {
        let platform = platform();
        let stream = acquire(&platform).await;
        let track = stream.tracks().remove(0);
        track.stop();
        track.stop();
        assert_eq!(platform.live_tracks(), 0);
        let stops = platform
            .operations()
            .into_iter()
            .filter(|op| matches!(op, DeviceOp::StopTrack { .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_torch_rejected_without_support() {
        let platform = platform();
        platform.set_torch_supported(false);
        let stream = acquire(&platform).await;
        let track = stream.video_tracks().remove(0);
        assert!(track
            .apply_constraints(&TrackConstraints::torch(true))
            .await
            .is_err());
    }
}
