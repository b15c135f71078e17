//! Event hub for distributing `WorkflowEvent` to listeners and subscribers.
//!
//! Listeners registered with [`EventHub::add_listener`] are invoked
//! synchronously, in registration order, on the publishing task. A listener
//! that returns an error or panics is logged and skipped; it never affects
//! the orchestrator. Async consumers can additionally `subscribe()` to a
//! `tokio::sync::broadcast` channel. Publishing with no subscribers is a no-op.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use anvil_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Default broadcast capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Synchronous event handler.
pub trait WorkflowEventListener: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent) -> anyhow::Result<()>;
}

/// Adapts a closure into a [`WorkflowEventListener`].
pub struct FnListener<F>(pub F);

impl<F> WorkflowEventListener for FnListener<F>
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    fn on_event(&self, event: &WorkflowEvent) -> anyhow::Result<()> {
        (self.0)(event);
        Ok(())
    }
}

/// Listener list plus broadcast channel.
///
/// Cloning shares both the listener list and the channel.
#[derive(Clone)]
pub struct EventHub {
    listeners: Arc<RwLock<Vec<Arc<dyn WorkflowEventListener>>>>,
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn WorkflowEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Register a closure as a listener.
    pub fn on<F>(&self, f: F)
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(FnListener(f)));
    }

    /// Receiver for every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear_listeners(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Deliver `event` to every listener, then to broadcast subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        // Snapshot so a listener can register another listener without deadlocking.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        event = event.label(),
                        execution_id = %event.execution_id,
                        error = %e,
                        "event listener failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        event = event.label(),
                        execution_id = %event.execution_id,
                        "event listener panicked"
                    );
                }
            }
        }

        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anvil_types::event::WorkflowEventKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event() -> WorkflowEvent {
        WorkflowEvent::new(
            Uuid::nil(),
            "checkout",
            Utc::now(),
            WorkflowEventKind::WorkflowStarted {
                workflow_id: Uuid::nil(),
                operation_count: 3,
                start_index: 0,
            },
        )
    }

    struct Failing;

    impl WorkflowEventListener for Failing {
        fn on_event(&self, _event: &WorkflowEvent) -> anyhow::Result<()> {
            anyhow::bail!("listener exploded")
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let hub = EventHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hub.on(move |_| seen.lock().unwrap().push(tag));
        }
        hub.publish(sample_event());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_stop_delivery() {
        let hub = EventHub::default();
        let delivered = Arc::new(Mutex::new(0));

        hub.add_listener(Arc::new(Failing));
        hub.on(|_| panic!("handler bug"));
        let counter = Arc::clone(&delivered);
        hub.on(move |_| *counter.lock().unwrap() += 1);

        hub.publish(sample_event());
        hub.publish(sample_event());
        assert_eq!(*delivered.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn broadcast_subscribers_receive_events() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        hub.publish(sample_event());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.label(), "workflow_started");
    }

    #[test]
    fn publish_with_nobody_listening_is_a_no_op() {
        let hub = EventHub::default();
        hub.publish(sample_event());
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn clear_listeners_detaches_everything() {
        let hub = EventHub::default();
        hub.on(|_| {});
        hub.clone().on(|_| {});
        assert_eq!(hub.listener_count(), 2);
        hub.clear_listeners();
        assert_eq!(hub.listener_count(), 0);
    }
}
