//! Session actor
//!
//! Owns the single current [`TaskResult`] and processes commands strictly in
//! arrival order. A command is finished (camera attached and ready, or fully
//! released) before the next one is taken off the channel, so the channel
//! itself is the lock around the device.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::task::{run_start_task, run_stop_task, TaskResult};
use super::{SessionCommand, SessionEvent, SessionEventKind, SessionRequest};
use crate::config::SessionConfig;
use crate::error::CameraError;
use crate::media::{CapabilitySet, Platform};
use crate::shim::ShimLoader;

pub(crate) struct SessionQueue {
    platform: Arc<dyn Platform>,
    shim: Arc<ShimLoader>,
    config: SessionConfig,
    current: TaskResult,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionQueue {
    pub(crate) fn new(
        platform: Arc<dyn Platform>,
        shim: Arc<ShimLoader>,
        config: SessionConfig,
        cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            platform,
            shim,
            config,
            current: TaskResult::Stopped,
            cmd_rx,
            events_tx,
        }
    }

    /// Process commands until shutdown or until every handle is dropped
    pub(crate) async fn run(mut self) {
        info!("Camera session started");

        while let Some(command) = self.cmd_rx.recv().await {
            match command {
                SessionCommand::Start { request, reply } => {
                    let result = self.start(request).await;
                    // The caller may have stopped waiting; the outcome is kept either way.
                    let _ = reply.send(result);
                }
                SessionCommand::Stop { reply } => {
                    let result = self.stop().await;
                    let _ = reply.send(result);
                }
                SessionCommand::Shutdown { reply } => {
                    if let Err(e) = self.stop().await {
                        warn!("Failed to release camera during shutdown: {}", e);
                    }
                    self.cmd_rx.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        if self.current.is_started() {
            // Every handle was dropped while the camera was running.
            if let Err(e) = self.stop().await {
                warn!("Failed to release camera on exit: {}", e);
            }
        }
        info!("Camera session ended");
    }

    async fn start(&mut self, request: SessionRequest) -> Result<CapabilitySet, CameraError> {
        let outcome = match std::mem::replace(&mut self.current, TaskResult::Stopped) {
            TaskResult::Started(active) if !request.restart && active.matches(&request) => {
                debug!("Camera already running with the requested settings, reusing it");
                let capabilities = active.capabilities.clone();
                self.current = TaskResult::Started(active);
                return Ok(capabilities);
            }
            TaskResult::Started(active) => {
                debug!(
                    "Restarting camera (restart requested: {})",
                    request.restart
                );
                match run_stop_task(&active).await {
                    Ok(()) => {
                        self.publish(SessionEventKind::CameraOff);
                        run_start_task(self.platform.as_ref(), &self.shim, &self.config, &request)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            TaskResult::Stopped | TaskResult::Failed(_) => {
                run_start_task(self.platform.as_ref(), &self.shim, &self.config, &request).await
            }
        };

        match outcome {
            Ok(active) => {
                let capabilities = active.capabilities.clone();
                self.publish(SessionEventKind::CameraOn {
                    capabilities: capabilities.clone(),
                    torch_enabled: active.torch_enabled,
                });
                self.current = TaskResult::Started(active);
                Ok(capabilities)
            }
            Err(e) => {
                debug!("Starting camera failed with \"{}\"", e);
                self.publish(SessionEventKind::Error { error: e.clone() });
                self.current = TaskResult::Failed(e.clone());
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CameraError> {
        match std::mem::replace(&mut self.current, TaskResult::Stopped) {
            TaskResult::Stopped | TaskResult::Failed(_) => {
                debug!("Camera already stopped");
                Ok(())
            }
            TaskResult::Started(active) => match run_stop_task(&active).await {
                Ok(()) => {
                    self.publish(SessionEventKind::CameraOff);
                    Ok(())
                }
                Err(e) => {
                    warn!("Stopping camera failed with \"{}\"", e);
                    self.publish(SessionEventKind::Error { error: e.clone() });
                    self.current = TaskResult::Failed(e.clone());
                    Err(e)
                }
            },
        }
    }

    fn publish(&self, kind: SessionEventKind) {
        // No subscribers is fine.
        let _ = self.events_tx.send(SessionEvent::now(kind));
    }
}
