//! Platform collaborators consumed by the camera session
//!
//! The session never talks to hardware directly. It drives these traits:
//! - [`Platform`]: environment probes, the acquisition entry point and URL factories
//! - [`MediaDevices`]: acquires a [`MediaStream`] for a set of constraints
//! - [`MediaStream`] / [`MediaTrack`]: track enumeration, capabilities, torch, release
//! - [`VideoSink`]: the render surface a stream gets attached to

mod constraints;
pub mod simulated;

pub use constraints::{
    AdvancedConstraint, CapabilitySet, FacingMode, Hint, StreamConstraints, TrackConstraints,
    VideoConstraints,
};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::CameraError;
use crate::signal::EventTarget;

/// Event a sink raises once frames are available
pub const LOADED_DATA_EVENT: &str = "loadeddata";

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A single track of a captured stream
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Capabilities of the underlying device, if the platform exposes them
    fn capabilities(&self) -> Option<CapabilitySet>;

    async fn apply_constraints(&self, constraints: &TrackConstraints) -> Result<(), CameraError>;

    /// Release the device behind this track
    fn stop(&self);
}

/// A captured media stream
pub trait MediaStream: Send + Sync {
    fn id(&self) -> String;

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn video_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind() == TrackKind::Video)
            .collect()
    }

    fn remove_track(&self, track_id: &str);
}

/// The acquisition API
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Arc<dyn MediaStream>, CameraError>;
}

/// How a stream is bound to a sink
pub enum Attachment {
    /// Direct stream property
    SrcObject(Arc<dyn MediaStream>),
    /// Vendor-prefixed stream property on older platforms
    LegacySrcObject(Arc<dyn MediaStream>),
    /// Plain source URL (object URL or stream id)
    Source(String),
}

impl Attachment {
    pub fn method(&self) -> &'static str {
        match self {
            Self::SrcObject(_) => "srcObject",
            Self::LegacySrcObject(_) => "mozSrcObject",
            Self::Source(_) => "src",
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SrcObject(stream) | Self::LegacySrcObject(stream) => f
                .debug_tuple(self.method())
                .field(&stream.id())
                .finish(),
            Self::Source(url) => f.debug_tuple(self.method()).field(url).finish(),
        }
    }
}

/// Render surface a stream is attached to
///
/// Sinks raise `"loadeddata"` once frames are available and `"error"` when
/// loading fails, including after [`VideoSink::load`] with an empty source.
pub trait VideoSink: EventTarget + Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> String;

    fn supports_src_object(&self) -> bool;

    fn supports_legacy_src_object(&self) -> bool;

    fn attach(&self, attachment: Attachment);

    /// Clear the stream property and the source URL
    fn detach(&self);

    /// Request playback
    fn play(&self);

    /// Reload from the current source
    fn load(&self);
}

/// Execution environment hosting the acquisition API
pub trait Platform: Send + Sync {
    fn is_secure_context(&self) -> bool;

    /// `None` when the acquisition API is missing
    fn media_devices(&self) -> Option<Arc<dyn MediaDevices>>;

    /// Identification string used to pick a compatibility patch
    fn user_agent(&self) -> String;

    /// Patch the global acquisition entry points for the detected platform
    fn apply_compat_patch(&self, details: &crate::shim::PlatformDetails)
        -> Result<(), CameraError>;

    fn create_object_url(&self, _stream: &Arc<dyn MediaStream>) -> Option<String> {
        None
    }

    /// Vendor-prefixed object URL factory
    fn create_legacy_object_url(&self, _stream: &Arc<dyn MediaStream>) -> Option<String> {
        None
    }
}

/// Pick the first attachment mechanism the sink and platform support
pub fn select_attachment(
    sink: &dyn VideoSink,
    platform: &dyn Platform,
    stream: Arc<dyn MediaStream>,
) -> Attachment {
    if sink.supports_src_object() {
        Attachment::SrcObject(stream)
    } else if sink.supports_legacy_src_object() {
        Attachment::LegacySrcObject(stream)
    } else if let Some(url) = platform.create_object_url(&stream) {
        Attachment::Source(url)
    } else if let Some(url) = platform.create_legacy_object_url(&stream) {
        Attachment::Source(url)
    } else {
        Attachment::Source(stream.id())
    }
}

/// Identity comparison for shared sink handles
pub fn same_sink(a: &Arc<dyn VideoSink>, b: &Arc<dyn VideoSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
