//! camera-session
//!
//! Serialized controller for a single shared capture device. Callers ask a
//! [`CameraSession`] to start or stop the camera; the session turns racing
//! requests into one ordered sequence of device operations, detects when the
//! attached stream is actually usable, and negotiates the torch.

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod session;
pub mod shim;
pub mod signal;

pub use config::{Config, SessionConfig, SimulatorConfig};
pub use error::{AcquisitionErrorKind, CameraError};
pub use media::{CapabilitySet, FacingMode, VideoConstraints, VideoSink};
pub use session::{CameraSession, SessionEvent, SessionEventKind, SessionRequest};
