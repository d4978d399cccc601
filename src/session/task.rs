//! Start and stop tasks run by the session queue

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::SessionRequest;
use crate::config::SessionConfig;
use crate::error::CameraError;
use crate::media::{
    same_sink, select_attachment, CapabilitySet, MediaStream, MediaTrack, Platform,
    StreamConstraints, TrackConstraints, VideoConstraints, VideoSink, LOADED_DATA_EVENT,
};
use crate::shim::ShimLoader;
use crate::signal::{delay, event_on, race_timeout, ERROR_EVENT};

/// Authoritative state of the session, replaced wholesale on every transition
pub enum TaskResult {
    /// A stream is attached to a sink and ready
    Started(ActiveCapture),
    /// Nothing is running
    Stopped,
    /// The latest attempt failed; idle for the purpose of new requests
    Failed(CameraError),
}

impl TaskResult {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started(active) => f.debug_tuple("Started").field(active).finish(),
            Self::Stopped => f.write_str("Stopped"),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// A stream attached to a sink
pub struct ActiveCapture {
    pub sink: Arc<dyn VideoSink>,
    pub stream: Arc<dyn MediaStream>,
    pub capabilities: CapabilitySet,
    pub constraints: Arc<VideoConstraints>,
    pub torch_enabled: bool,
}

impl ActiveCapture {
    /// Whether `request` asks for exactly this capture.
    /// Sink and constraints are compared by identity, not by value.
    pub fn matches(&self, request: &SessionRequest) -> bool {
        same_sink(&self.sink, &request.sink)
            && Arc::ptr_eq(&self.constraints, &request.constraints)
            && self.torch_enabled == request.torch
    }
}

impl fmt::Debug for ActiveCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCapture")
            .field("sink", &self.sink.name())
            .field("stream", &self.stream.id())
            .field("capabilities", &self.capabilities.len())
            .field("torch_enabled", &self.torch_enabled)
            .finish()
    }
}

/// Acquire a stream, attach it to the request's sink and wait until it is usable
pub(crate) async fn run_start_task(
    platform: &dyn Platform,
    shim: &ShimLoader,
    config: &SessionConfig,
    request: &SessionRequest,
) -> Result<ActiveCapture, CameraError> {
    debug!(
        "Starting camera with constraints: {}",
        serde_json::to_string(request.constraints.as_ref()).unwrap_or_default()
    );

    // The acquisition API may be present but unusable outside a secure
    // context, so check that first.
    if !platform.is_secure_context() {
        return Err(CameraError::InsecureContext);
    }
    let devices = platform
        .media_devices()
        .ok_or(CameraError::StreamApiNotSupported)?;

    shim.load(platform)?;

    debug!("Requesting media stream");
    let stream = devices
        .get_user_media(&StreamConstraints::video_only(request.constraints.clone()))
        .await?;

    match attach_and_settle(platform, config, request, &stream).await {
        Ok(active) => Ok(active),
        Err(err) => {
            release_unattached(request.sink.as_ref(), stream.as_ref());
            Err(err)
        }
    }
}

async fn attach_and_settle(
    platform: &dyn Platform,
    config: &SessionConfig,
    request: &SessionRequest,
    stream: &Arc<dyn MediaStream>,
) -> Result<ActiveCapture, CameraError> {
    let sink = &request.sink;

    // Listen before attaching so an early signal is not missed.
    let loaded = event_on(sink.as_ref(), LOADED_DATA_EVENT);

    let attachment = select_attachment(sink.as_ref(), platform, stream.clone());
    debug!(
        "Attaching stream {} to {} via {}",
        stream.id(),
        sink.name(),
        attachment.method()
    );
    sink.attach(attachment);

    // Some platforms hold back loaded data until playback is requested.
    sink.play();

    debug!("Waiting for video sink to load");
    let timeout_ms = config.readiness_timeout_ms;
    race_timeout(
        async { loaded.await.map(|_| ()).map_err(CameraError::from) },
        config.readiness_timeout(),
        || CameraError::StreamLoadTimeout { timeout_ms },
    )
    .await?;
    debug!("Video sink loaded");

    // Capabilities can show up late with no event to wait on.
    delay(config.capability_settle()).await;

    let track = stream.video_tracks().into_iter().next();
    let capabilities = track
        .as_ref()
        .and_then(|t| t.capabilities())
        .unwrap_or_default();

    let torch_enabled = match &track {
        Some(track) if request.torch && capabilities.supports_torch() => enable_torch(track).await,
        _ => false,
    };
    if request.torch && !torch_enabled {
        debug!("Torch requested but not available on this device");
    }

    info!(
        "Camera ready on {} ({} capabilities, torch {})",
        sink.name(),
        capabilities.len(),
        if torch_enabled { "on" } else { "off" }
    );

    Ok(ActiveCapture {
        sink: sink.clone(),
        stream: stream.clone(),
        capabilities,
        constraints: request.constraints.clone(),
        torch_enabled,
    })
}

async fn enable_torch(track: &Arc<dyn MediaTrack>) -> bool {
    match track.apply_constraints(&TrackConstraints::torch(true)).await {
        Ok(()) => true,
        Err(err) => {
            warn!("Failed to enable torch on {}: {}", track.id(), err);
            false
        }
    }
}

/// Drop a stream that never became ready so the next start finds the sink empty
fn release_unattached(sink: &dyn VideoSink, stream: &dyn MediaStream) {
    warn!("Releasing stream {} after failed start", stream.id());
    sink.detach();
    for track in stream.tracks() {
        stream.remove_track(&track.id());
        track.stop();
    }
}

/// Detach the stream from its sink and release every track
pub(crate) async fn run_stop_task(active: &ActiveCapture) -> Result<(), CameraError> {
    debug!("Stopping camera on {}", active.sink.name());

    let sink = &active.sink;
    sink.detach();

    // Reloading an empty source raises the sink's error signal; that is the
    // confirmation the old stream is no longer rendered.
    let reloaded = event_on(sink.as_ref(), ERROR_EVENT);
    sink.load();
    reloaded.await?;

    for track in active.stream.tracks() {
        if active.torch_enabled {
            if let Err(err) = track.apply_constraints(&TrackConstraints::torch(false)).await {
                debug!("Ignoring torch disable failure on {}: {}", track.id(), err);
            }
        }
        active.stream.remove_track(&track.id());
        track.stop();
    }

    info!("Camera stopped");
    Ok(())
}
