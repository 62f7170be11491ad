//! User-facing event bus.
//!
//! Every public operation on [`crate::facade::User`] fires exactly one
//! [`UserEvent`] on completion instead of returning synchronously, breaking
//! what would otherwise be a cyclic reference between the facade and its
//! callers. Realized as a `tokio::sync::broadcast` channel, grounded on
//! `roslibrust`'s publisher-side subscriber fan-out.

use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 256;

/// The closed tag set of user-visible outcomes. Exhaustive match arms over
/// this enum catch an unhandled tag at compile time rather than at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    MessageSent,
    MessageReceived,
    TopicCreated,
    TopicDeleted,
    ServerTopicDeleted,
    TopicListened,
    TopicLoaded,
    TopicListenStopped,
}

/// `{tag, topicName, success, cause?}`.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub tag: EventTag,
    pub topic: String,
    pub success: bool,
    pub cause: Option<String>,
}

impl UserEvent {
    pub fn ok(tag: EventTag, topic: impl Into<String>) -> Self {
        Self { tag, topic: topic.into(), success: true, cause: None }
    }

    pub fn failed(tag: EventTag, topic: impl Into<String>, cause: impl Into<String>) -> Self {
        Self { tag, topic: topic.into(), success: false, cause: Some(cause.into()) }
    }
}

/// Typed event stream every client operation reports to. Cloning shares the
/// same underlying channel; each subscriber gets its own receiver and sees
/// every event published after it subscribed, in publish order.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UserEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A lagged/absent receiver is not an error: nobody
    /// is required to be listening for every event.
    pub fn emit(&self, event: UserEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
