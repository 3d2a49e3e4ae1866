use crate::events::Event;
use std::panic::{self, AssertUnwindSafe};

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Synchronous, totally ordered publish/subscribe for a single market.
/// `publish` delivers to every subscriber, in registration order, before
/// returning; a subscriber that panics is isolated so it cannot stop
/// delivery to the others.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(handler));
    }

    pub fn publish(&self, event: &Event) {
        for subscriber in &self.subscribers {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(%message, "event subscriber failed, continuing delivery");
            }
        }
    }

    pub fn publish_all(&self, events: &[Event]) {
        for event in events {
            self.publish(event);
        }
    }
}
