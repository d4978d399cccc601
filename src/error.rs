//! Error types surfaced by the camera session
//!
//! Errors fall into four groups:
//! - Environmental (insecure context, missing stream API): fatal until the
//!   environment changes
//! - Acquisition (permission denied, device busy or missing): passed through
//!   verbatim from the platform
//! - Readiness timeout: the sink never reported loaded data
//! - Teardown: only the stop confirmation wait can fail

use std::fmt;

use thiserror::Error;

use crate::signal::SignalError;

/// Platform error names as raised by the acquisition API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    /// The user or the platform denied camera permission
    NotAllowed,
    /// No device matches the requested constraints
    NotFound,
    /// The device exists but is in use or failed at the hardware level
    NotReadable,
    /// Constraints cannot be satisfied by any device
    Overconstrained,
    /// The platform blocked access for security reasons
    Security,
    /// Acquisition was aborted before completing
    Abort,
    /// Anything the platform reports that has no dedicated variant
    Other,
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotAllowed => "NotAllowedError",
            Self::NotFound => "NotFoundError",
            Self::NotReadable => "NotReadableError",
            Self::Overconstrained => "OverconstrainedError",
            Self::Security => "SecurityError",
            Self::Abort => "AbortError",
            Self::Other => "Error",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`CameraSession`](crate::session::CameraSession) requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Camera access requires a secure execution context
    #[error("camera access is only permitted in a secure context")]
    InsecureContext,

    /// The media stream acquisition API is unavailable on this platform
    #[error("the media stream API is not supported on this platform")]
    StreamApiNotSupported,

    /// The sink did not signal loaded data in time
    #[error("loading the camera stream timed out after {timeout_ms} ms")]
    StreamLoadTimeout { timeout_ms: u64 },

    /// Passthrough error from the acquisition API
    #[error("{kind}: {message}")]
    Acquisition {
        kind: AcquisitionErrorKind,
        message: String,
    },

    /// The sink raised its error signal while we waited for another event
    #[error("video sink raised `{event}`")]
    Sink { event: String },

    /// The sink went away while a task was waiting on one of its signals
    #[error("video sink was dropped while waiting for `{event}`")]
    SinkDetached { event: String },

    /// A track rejected a constraint update
    #[error("track rejected constraints: {0}")]
    Constraint(String),

    /// The session actor is no longer running
    #[error("camera session has shut down")]
    SessionClosed,
}

impl CameraError {
    /// Shorthand for a passthrough acquisition error
    pub fn acquisition(kind: AcquisitionErrorKind, message: impl Into<String>) -> Self {
        Self::Acquisition {
            kind,
            message: message.into(),
        }
    }

    /// Errors that only an environment change can fix
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::InsecureContext | Self::StreamApiNotSupported)
    }

    /// Errors where offering the user a retry makes sense
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StreamLoadTimeout { .. } | Self::Sink { .. } => true,
            Self::Acquisition { kind, .. } => matches!(
                kind,
                AcquisitionErrorKind::NotReadable
                    | AcquisitionErrorKind::Abort
                    | AcquisitionErrorKind::Other
            ),
            Self::InsecureContext
            | Self::StreamApiNotSupported
            | Self::SinkDetached { .. }
            | Self::Constraint(_)
            | Self::SessionClosed => false,
        }
    }
}

impl From<SignalError> for CameraError {
    fn from(err: SignalError) -> Self {
        match err {
            SignalError::Rejected(event) => Self::Sink { event: event.name },
            SignalError::Detached { awaiting } => Self::SinkDetached { event: awaiting },
        }
    }
}
