//! Notifications fired after committed permission mutations.

use std::error::Error as StdError;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{trace, warn};

pub type ListenerError = Box<dyn StdError + Send + Sync>;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PermissionEventKind {
    /// A grant was written, whether or not its value changed.
    Set,
    /// The effective value (allow, deny or absent) changed.
    Changed,
    Removed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionEvent {
    pub kind: PermissionEventKind,
    pub service: String,
    pub subject: String,
    /// Value after the mutation; `None` once removed.
    pub allow: Option<bool>,
    pub previous: Option<bool>,
}

/// Observer invoked synchronously after a mutation has been committed.
pub trait PermissionListener: Send + Sync {
    fn on_event(&self, event: &PermissionEvent) -> Result<(), ListenerError>;
}

impl<F> PermissionListener for F
where
    F: Fn(&PermissionEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &PermissionEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Observer lists per event kind plus a broadcast channel for async consumers.
pub struct PermissionObservers {
    on_set: RwLock<Vec<Arc<dyn PermissionListener>>>,
    on_change: RwLock<Vec<Arc<dyn PermissionListener>>>,
    on_remove: RwLock<Vec<Arc<dyn PermissionListener>>>,
    events: broadcast::Sender<PermissionEvent>,
}

impl Default for PermissionObservers {
    fn default() -> Self {
        let (events, _rx) = broadcast::channel(128);
        Self {
            on_set: RwLock::new(Vec::new()),
            on_change: RwLock::new(Vec::new()),
            on_remove: RwLock::new(Vec::new()),
            events,
        }
    }
}

impl PermissionObservers {
    pub fn register(&self, kind: PermissionEventKind, listener: Arc<dyn PermissionListener>) {
        self.slot(kind).write().push(listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.events.subscribe()
    }

    fn slot(&self, kind: PermissionEventKind) -> &RwLock<Vec<Arc<dyn PermissionListener>>> {
        match kind {
            PermissionEventKind::Set => &self.on_set,
            PermissionEventKind::Changed => &self.on_change,
            PermissionEventKind::Removed => &self.on_remove,
        }
    }

    /// Fans `event` out. Listener failures are logged, never returned.
    pub fn publish(&self, event: PermissionEvent) {
        let listeners = self.slot(event.kind).read().clone();
        for listener in listeners {
            if let Err(err) = listener.on_event(&event) {
                warn!(
                    service = %event.service,
                    subject = %event.subject,
                    kind = ?event.kind,
                    "permission listener failed: {err}"
                );
            }
        }
        if self.events.send(event).is_err() {
            trace!("no permission event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: PermissionEventKind) -> PermissionEvent {
        PermissionEvent {
            kind,
            service: "weather".into(),
            subject: "all".into(),
            allow: Some(true),
            previous: None,
        }
    }

    #[test]
    fn failing_listener_does_not_stop_others() {
        let observers = PermissionObservers::default();
        let calls = Arc::new(AtomicUsize::new(0));
        observers.register(
            PermissionEventKind::Set,
            Arc::new(|_: &PermissionEvent| -> Result<(), ListenerError> { Err("boom".into()) }),
        );
        let counter = Arc::clone(&calls);
        observers.register(
            PermissionEventKind::Set,
            Arc::new(move |_: &PermissionEvent| -> Result<(), ListenerError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        observers.publish(event(PermissionEventKind::Set));
        observers.publish(event(PermissionEventKind::Removed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_every_kind() {
        let observers = PermissionObservers::default();
        let mut rx = observers.subscribe();
        observers.publish(event(PermissionEventKind::Changed));
        let received = rx.recv().await.expect("event");
        assert_eq!(received.kind, PermissionEventKind::Changed);
    }
}
