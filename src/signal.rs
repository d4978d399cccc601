//! One-shot waiters on named sink events
//!
//! A [`Deferred`] settles exactly once: it resolves when its success event is
//! emitted and rejects when its error event is emitted. Its registration is
//! removed from the emitter as soon as it settles, or when the waiter is
//! dropped unsettled (for example as the losing side of a timeout race), so
//! repeated start/stop cycles never accumulate listeners.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

/// Default name of the event that rejects a waiter
pub const ERROR_EVENT: &str = "error";

/// A named event raised by a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub name: String,
    pub detail: Option<String>,
}

impl SinkEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Why a [`Deferred`] did not resolve
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The error event fired first
    #[error("rejected by `{}` event", .0.name)]
    Rejected(SinkEvent),
    /// The emitter was dropped before either event fired
    #[error("event target dropped while awaiting `{awaiting}`")]
    Detached { awaiting: String },
}

type Settlement = Result<SinkEvent, SinkEvent>;

struct Registration {
    id: u64,
    success: String,
    error: String,
    tx: oneshot::Sender<Settlement>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Registration>,
}

/// Event source owned by a sink
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Mutex<Registry>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event, settling every waiter listening for it.
    /// Returns how many waiters were settled.
    pub fn emit(&self, event: SinkEvent) -> usize {
        let settled: Vec<Registration> = {
            let mut registry = self.lock();
            let (hit, kept) = std::mem::take(&mut registry.entries)
                .into_iter()
                .partition(|r| r.success == event.name || r.error == event.name);
            registry.entries = kept;
            hit
        };

        let count = settled.len();
        for registration in settled {
            // The success event wins when both names match.
            let outcome = if registration.success == event.name {
                Ok(event.clone())
            } else {
                Err(event.clone())
            };
            // A closed receiver means the waiter was dropped mid-settlement.
            let _ = registration.tx.send(outcome);
        }
        trace!("Emitted `{}` to {} waiter(s)", event.name, count);
        count
    }

    /// Number of waiters still registered
    pub fn pending_waiters(&self) -> usize {
        self.lock().entries.len()
    }

    fn register(&self, success: &str, error: &str) -> (u64, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Registration {
            id,
            success: success.to_string(),
            error: error.to_string(),
            tx,
        });
        (id, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the registry half-updated.
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("pending_waiters", &self.pending_waiters())
            .finish()
    }
}

/// Anything exposing an [`EventEmitter`]
pub trait EventTarget {
    fn events(&self) -> &EventEmitter;
}

/// Wait for `success` on `target`, rejecting on the default `"error"` event.
///
/// The registration happens immediately, not on first poll, so an event
/// emitted between this call and the first `.await` is not missed.
pub fn event_on<T: EventTarget + ?Sized>(target: &T, success: &str) -> Deferred {
    event_on_or(target, success, ERROR_EVENT)
}

/// Wait for `success` on `target`, rejecting on `error`
pub fn event_on_or<T: EventTarget + ?Sized>(target: &T, success: &str, error: &str) -> Deferred {
    let emitter = target.events();
    let (id, rx) = emitter.register(success, error);
    Deferred {
        id,
        rx,
        registry: Arc::downgrade(&emitter.registry),
        awaiting: success.to_string(),
        settled: false,
    }
}

/// Single-settlement waiter returned by [`event_on`]
#[must_use = "a Deferred does nothing unless awaited"]
pub struct Deferred {
    id: u64,
    rx: oneshot::Receiver<Settlement>,
    registry: Weak<Mutex<Registry>>,
    awaiting: String,
    settled: bool,
}

impl Future for Deferred {
    type Output = Result<SinkEvent, SignalError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(received) => {
                self.settled = true;
                Poll::Ready(match received {
                    Ok(Ok(event)) => Ok(event),
                    Ok(Err(event)) => Err(SignalError::Rejected(event)),
                    Err(_) => Err(SignalError::Detached {
                        awaiting: self.awaiting.clone(),
                    }),
                })
            }
        }
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(|p| p.into_inner());
            registry.entries.retain(|r| r.id != self.id);
        }
    }
}

/// Timer variant: resolves after `duration` with no event dependency
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Race `waiter` against a timer; whichever settles first wins.
///
/// The losing side is dropped, which for a [`Deferred`] removes its
/// registration from the emitter.
pub async fn race_timeout<F, T, E>(
    waiter: F,
    limit: Duration,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        settled = waiter => settled,
        _ = delay(limit) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Target(EventEmitter);

    impl EventTarget for Target {
        fn events(&self) -> &EventEmitter {
            &self.0
        }
    }

    fn target() -> Target {
        Target(EventEmitter::new())
    }

    #[tokio::test]
    async fn test_resolves_on_success_and_cleans_up() {
        let t = target();
        let waiter = event_on(&t, "loadeddata");
        assert_eq!(t.events().pending_waiters(), 1);

        assert_eq!(t.events().emit(SinkEvent::new("loadeddata")), 1);
        assert_eq!(t.events().pending_waiters(), 0);

        let event = waiter.await.unwrap();
        assert_eq!(event.name, "loadeddata");
    }

    #[tokio::test]
    async fn test_rejects_on_error_event() {
        let t = target();
        let waiter = event_on(&t, "loadeddata");
        t.events().emit(SinkEvent::new("error").with_detail("MEDIA_ERR_SRC_NOT_SUPPORTED"));

        match waiter.await {
            Err(SignalError::Rejected(event)) => {
                assert_eq!(event.name, "error");
                assert_eq!(event.detail.as_deref(), Some("MEDIA_ERR_SRC_NOT_SUPPORTED"));
            }
            other => panic!("unexpected settlement: {:?}", other),
        }
        assert_eq!(t.events().pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_success_wins_when_names_collide() {
        let t = target();
        let waiter = event_on(&t, ERROR_EVENT);
        t.events().emit(SinkEvent::new(ERROR_EVENT));
        assert!(waiter.await.is_ok());
    }

    #[tokio::test]
    async fn test_unrelated_events_are_ignored() {
        let t = target();
        let waiter = event_on(&t, "loadeddata");
        assert_eq!(t.events().emit(SinkEvent::new("play")), 0);
        assert_eq!(t.events().pending_waiters(), 1);
        t.events().emit(SinkEvent::new("loadeddata"));
        assert!(waiter.await.is_ok());
    }

    #[tokio::test]
    async fn test_event_before_await_is_not_lost() {
        let t = target();
        let waiter = event_on(&t, "loadeddata");
        t.events().emit(SinkEvent::new("loadeddata"));
        tokio::task::yield_now().await;
        assert!(waiter.await.is_ok());
    }

    #[test]
    fn test_drop_unregisters() {
        let t = target();
        let waiter = event_on(&t, "loadeddata");
        let other = event_on(&t, "loadeddata");
        assert_eq!(t.events().pending_waiters(), 2);
        drop(waiter);
        assert_eq!(t.events().pending_waiters(), 1);
        drop(other);
        assert_eq!(t.events().pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_detached_when_target_dropped() {
        let t = target();
        let waiter = event_on(&t, "error");
        drop(t);
        assert_eq!(
            waiter.await,
            Err(SignalError::Detached {
                awaiting: "error".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_timeout_drops_loser() {
        let t = target();
        let result = race_timeout(
            async { event_on(&t, "loadeddata").await.map_err(|_| "rejected") },
            Duration::from_millis(6000),
            || "timed out",
        )
        .await;

        assert_eq!(result, Err("timed out"));
        assert_eq!(t.events().pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_timeout_waiter_wins() {
        let t = target();
        let emitter = t.events().clone();
        tokio::spawn(async move {
            delay(Duration::from_millis(100)).await;
            emitter.emit(SinkEvent::new("loadeddata"));
        });

        let result = race_timeout(
            async { event_on(&t, "loadeddata").await.map_err(|_| "rejected") },
            Duration::from_millis(6000),
            || "timed out",
        )
        .await;
        assert!(result.is_ok());
    }
}
