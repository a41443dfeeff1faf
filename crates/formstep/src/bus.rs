//! The notification bus shared by the step controller and its host.
//!
//! Navigation commands and step events travel on one channel as a closed
//! [`StepMessage`] enum. Delivery is synchronous and run-to-completion: a
//! message published while another is being delivered (for example the
//! `CurrentChanged` published from inside a `Goto` handler) is queued and
//! delivered once the current message has reached every subscriber.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use formstep_core::logging::targets;
use formstep_core::{ConnectionGuard, ConnectionId, Signal};
use parking_lot::Mutex;

/// A message carried on the [`NotificationBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMessage {
    /// Validate the current step and advance by one.
    Next,
    /// Go back one step, without validation.
    Previous,
    /// Jump to a zero-based step index, without validation.
    ///
    /// Signed so that out-of-range requests from the UI can be represented
    /// and ignored instead of failing to convert.
    Goto(i64),
    /// The current step changed.
    CurrentChanged {
        /// The new index.
        value: usize,
        /// The index before the change.
        previous: usize,
    },
    /// The host form and its fields now exist.
    FormInitialized,
}

impl StepMessage {
    /// Whether this is an inbound navigation command.
    pub fn is_command(&self) -> bool {
        matches!(self, Self::Next | Self::Previous | Self::Goto(_))
    }

    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
            Self::Goto(_) => "goto",
            Self::CurrentChanged { .. } => "current_changed",
            Self::FormInitialized => "form_initialized",
        }
    }
}

/// Publish/subscribe channel for [`StepMessage`]s.
///
/// Shared as `Arc<NotificationBus>` between the controller and the host.
pub struct NotificationBus {
    signal: Arc<Signal<StepMessage>>,
    pending: Mutex<VecDeque<StepMessage>>,
    dispatching: AtomicBool,
}

impl NotificationBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::new()),
            pending: Mutex::new(VecDeque::new()),
            dispatching: AtomicBool::new(false),
        }
    }

    /// Subscribe to every message on the bus.
    pub fn subscribe<F>(&self, handler: F) -> ConnectionId
    where
        F: Fn(&StepMessage) + Send + Sync + 'static,
    {
        self.signal.connect(handler)
    }

    /// Subscribe until the returned guard is dropped.
    pub fn subscribe_scoped<F>(&self, handler: F) -> ConnectionGuard<StepMessage>
    where
        F: Fn(&StepMessage) + Send + Sync + 'static,
    {
        self.signal.connect_scoped(handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: ConnectionId) -> bool {
        self.signal.disconnect(id)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.signal.connection_count()
    }

    /// Whether a message is being delivered right now.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    /// Publish a message.
    ///
    /// When called outside of a delivery, every queued message (this one
    /// included) has been delivered by the time this returns. When called from
    /// inside a subscriber, the message is queued behind the current one.
    pub fn publish(&self, message: StepMessage) {
        self.pending.lock().push_back(message);

        loop {
            if self.dispatching.swap(true, Ordering::AcqRel) {
                tracing::trace!(target: targets::BUS, kind = message.kind(), "queued behind active delivery");
                return;
            }

            loop {
                // The lock is released before delivery so subscribers can publish.
                let Some(next) = self.pending.lock().pop_front() else {
                    break;
                };
                let _span =
                    tracing::trace_span!(target: targets::BUS, "formstep::dispatch", kind = next.kind())
                        .entered();
                tracing::debug!(target: targets::BUS, message = ?next, "delivering message");
                self.signal.emit(next);
            }

            self.dispatching.store(false, Ordering::Release);

            // Another thread may have queued a message after the drain saw an
            // empty queue but before the flag was cleared.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    /// Publish [`StepMessage::Next`].
    pub fn next(&self) {
        self.publish(StepMessage::Next);
    }

    /// Publish [`StepMessage::Previous`].
    pub fn previous(&self) {
        self.publish(StepMessage::Previous);
    }

    /// Publish [`StepMessage::Goto`].
    pub fn goto(&self, index: i64) {
        self.publish(StepMessage::Goto(index));
    }

    /// Publish [`StepMessage::FormInitialized`].
    pub fn form_initialized(&self) {
        self.publish(StepMessage::FormInitialized);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .field("pending", &self.pending.lock().len())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &NotificationBus) -> Arc<Mutex<Vec<StepMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(move |msg| seen_clone.lock().push(*msg));
        seen
    }

    #[test]
    fn test_publish_delivers_in_order() {
        let bus = NotificationBus::new();
        let seen = recorder(&bus);

        bus.next();
        bus.goto(2);
        bus.previous();

        assert_eq!(
            *seen.lock(),
            vec![StepMessage::Next, StepMessage::Goto(2), StepMessage::Previous]
        );
        assert!(!bus.is_dispatching());
    }

    #[test]
    fn test_nested_publish_runs_after_current_message() {
        let bus = Arc::new(NotificationBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&bus);
        let order_clone = order.clone();
        bus.subscribe(move |msg| {
            order_clone.lock().push(format!("a:{}", msg.kind()));
            if let (StepMessage::Goto(i), Some(bus)) = (msg, weak.upgrade()) {
                bus.publish(StepMessage::CurrentChanged {
                    value: *i as usize,
                    previous: 0,
                });
            }
        });
        let order_clone = order.clone();
        bus.subscribe(move |msg| order_clone.lock().push(format!("b:{}", msg.kind())));

        bus.goto(1);

        assert_eq!(
            *order.lock(),
            vec![
                "a:goto",
                "b:goto",
                "a:current_changed",
                "b:current_changed"
            ]
        );
    }

    #[test]
    fn test_scoped_subscription() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = seen.clone();
            let _guard = bus.subscribe_scoped(move |_| *seen.lock() += 1);
            bus.next();
            assert_eq!(bus.subscriber_count(), 1);
        }
        bus.next();
        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = NotificationBus::new();
        let id = bus.subscribe(|_| {});
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_message_classification() {
        assert!(StepMessage::Next.is_command());
        assert!(StepMessage::Goto(-1).is_command());
        assert!(!StepMessage::FormInitialized.is_command());
        assert!(!StepMessage::CurrentChanged { value: 1, previous: 0 }.is_command());
    }
}
