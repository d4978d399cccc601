//! Camera session controller
//!
//! A [`CameraSession`] is a cheap, cloneable handle to a single actor task that
//! owns the capture device. Every request is pushed onto one ordered channel
//! at call time and the actor runs them one after another, so a start never
//! overlaps a stop and the device never sees two acquisitions in flight.
//!
//! The two device-touching entry points are [`CameraSession::request_start`]
//! and [`CameraSession::request_stop`].

mod queue;
mod task;

pub use task::{ActiveCapture, TaskResult};

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::CameraError;
use crate::media::{CapabilitySet, Platform, VideoConstraints, VideoSink};
use crate::shim::ShimLoader;

use queue::SessionQueue;

const DEFAULT_EVENT_CAPACITY: usize = 32;

/// What a caller wants the camera to do
#[derive(Clone)]
pub struct SessionRequest {
    /// Surface the stream is attached to
    pub sink: Arc<dyn VideoSink>,
    /// Compared by identity against the running capture
    pub constraints: Arc<VideoConstraints>,
    /// Turn the torch on if the device has one
    pub torch: bool,
    /// Restart even if nothing changed
    pub restart: bool,
}

impl SessionRequest {
    pub fn new(sink: Arc<dyn VideoSink>, constraints: Arc<VideoConstraints>) -> Self {
        Self {
            sink,
            constraints,
            torch: false,
            restart: false,
        }
    }

    pub fn with_torch(mut self, torch: bool) -> Self {
        self.torch = torch;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("sink", &self.sink.name())
            .field("constraints", &self.constraints)
            .field("torch", &self.torch)
            .field("restart", &self.restart)
            .finish()
    }
}

/// Lifecycle notification broadcast to subscribers
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// A new capture is attached and ready
    CameraOn {
        capabilities: CapabilitySet,
        torch_enabled: bool,
    },
    /// The running capture was released
    CameraOff,
    /// A request failed
    Error { error: CameraError },
}

impl SessionEvent {
    fn now(kind: SessionEventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

pub(crate) enum SessionCommand {
    Start {
        request: SessionRequest,
        reply: oneshot::Sender<Result<CapabilitySet, CameraError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), CameraError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running camera session
#[derive(Clone)]
pub struct CameraSession {
    id: Uuid,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl CameraSession {
    /// Spawn a session with the process-wide shim loader.
    /// Must be called from within a tokio runtime.
    pub fn spawn(platform: Arc<dyn Platform>, config: SessionConfig) -> Self {
        Self::builder(platform).config(config).spawn()
    }

    pub fn builder(platform: Arc<dyn Platform>) -> SessionBuilder {
        SessionBuilder {
            platform,
            config: SessionConfig::default(),
            shim: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start the camera on `request.sink`, resolving with the device capabilities.
    ///
    /// The request is queued before this returns; awaiting the future only
    /// waits for the outcome. If the camera is already running with the same
    /// sink, the same constraints `Arc` and the same torch state, and
    /// `restart` is false, the running capture is reused untouched.
    pub fn request_start(
        &self,
        request: SessionRequest,
    ) -> impl Future<Output = Result<CapabilitySet, CameraError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let queued = self.cmd_tx.send(SessionCommand::Start { request, reply });
        async move {
            queued.map_err(|_| CameraError::SessionClosed)?;
            rx.await.map_err(|_| CameraError::SessionClosed)?
        }
    }

    /// Stop the camera. Stopping an idle session succeeds without touching the device.
    pub fn request_stop(&self) -> impl Future<Output = Result<(), CameraError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let queued = self.cmd_tx.send(SessionCommand::Stop { reply });
        async move {
            queued.map_err(|_| CameraError::SessionClosed)?;
            rx.await.map_err(|_| CameraError::SessionClosed)?
        }
    }

    /// End the session after every request queued so far, releasing the camera.
    /// Later requests fail with [`CameraError::SessionClosed`].
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let queued = self.cmd_tx.send(SessionCommand::Shutdown { reply });
        async move {
            if queued.is_ok() {
                let _ = rx.await;
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Configures and spawns a [`CameraSession`]
pub struct SessionBuilder {
    platform: Arc<dyn Platform>,
    config: SessionConfig,
    shim: Option<Arc<ShimLoader>>,
    event_capacity: usize,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a dedicated shim loader instead of the process-wide one
    pub fn shim(mut self, shim: Arc<ShimLoader>) -> Self {
        self.shim = Some(shim);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Spawn the session actor on the current tokio runtime
    pub fn spawn(self) -> CameraSession {
        let id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(self.event_capacity);

        let queue = SessionQueue::new(
            self.platform,
            self.shim.unwrap_or_else(ShimLoader::shared),
            self.config,
            cmd_rx,
            events_tx.clone(),
        );
        tokio::spawn(queue.run().instrument(info_span!("camera_session", %id)));

        CameraSession {
            id,
            cmd_tx,
            events_tx,
        }
    }
}
