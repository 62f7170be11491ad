//! User facade: the single entry point applications use. One method per
//! user intent, each asynchronous; outcomes surface only on the event bus,
//! never as a return value that can fail -- every method returns without
//! throwing, and the outcome is the event.

use crate::ci_manager::CiManager;
use crate::config::ClientConfig;
use crate::consumer::Consumer;
use crate::events::{EventBus, EventTag, UserEvent};
use crate::publisher::Publisher;
use log::warn;
use postmesh_common::{Post, PostInfo, ProfileStore, FETCH_ALL_SENTINEL};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Ties the publish/consume side (Publisher, Consumer, CI-manager) to the
/// event bus and profile-store adapter. A default listener is registered at
/// construction time and performs local bookkeeping; user code adds
/// listeners via [`User::subscribe`] and only ever observes the bus, never
/// the facade's internal state.
pub struct User {
    publisher: Publisher,
    consumer: Arc<Consumer>,
    profile: Arc<dyn ProfileStore>,
    events: EventBus,
}

impl User {
    pub fn new(_config: ClientConfig, ci_manager: Arc<CiManager>, profile: Arc<dyn ProfileStore>) -> Arc<Self> {
        let events = EventBus::new();
        let user = Arc::new(Self {
            publisher: Publisher::new(ci_manager.clone(), events.clone()),
            consumer: Arc::new(Consumer::new(ci_manager, events.clone(), profile.clone())),
            profile,
            events,
        });
        tokio::spawn(run_default_listener(user.events.subscribe(), user.profile.clone()));
        user
    }

    /// Registers a new listener; returns a receiver that observes every
    /// event published from this point on, in the order operations
    /// complete.
    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.events.subscribe()
    }

    pub fn post(&self, topic: impl Into<String>, poster_name: impl Into<String>, file_extension: impl Into<String>, data: Vec<u8>) {
        let id = generate_post_id();
        let info = PostInfo::new(poster_name, file_extension, id);
        self.publisher.publish(topic, Post::new(info, data));
    }

    pub fn create_topic(&self, name: impl Into<String>) {
        self.publisher.create_topic(name);
    }

    pub fn delete_topic(&self, name: impl Into<String>) {
        self.publisher.delete_topic(name);
    }

    pub async fn pull(&self, name: &str) -> postmesh_common::Result<Vec<Post>> {
        self.consumer.pull(name).await
    }

    pub fn listen_for_new_topic(self: &Arc<Self>, name: impl Into<String>) {
        let name = name.into();
        let last_seen_id = self.consumer.last_seen_id(&name);
        self.consumer.listen_for_new_topic(name, last_seen_id);
    }

    pub fn stop_listening_for_topic(&self, name: &str) {
        self.consumer.stop_listening(name);
    }

    /// Switches the active profile, creating it if `create` is set,
    /// otherwise loading an existing one. Fires one `TOPIC_LOADED` event per
    /// topic the profile already knew about.
    pub fn switch_profile(self: &Arc<Self>, name: impl Into<String>, create: bool) {
        let name = name.into();
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = if create {
                this.profile.create_new_profile(&name).await.map(|()| Vec::new())
            } else {
                this.profile.load_profile(&name).await
            };

            match outcome {
                Ok(topics) => {
                    for topic in topics {
                        let last_seen_id = topic.posts.last().map(|p| p.info.id).unwrap_or(FETCH_ALL_SENTINEL);
                        this.consumer.seed_last_seen_id(&topic.name, last_seen_id);
                        this.events.emit(UserEvent::ok(EventTag::TopicLoaded, topic.name));
                    }
                }
                Err(e) => {
                    warn!("switch_profile({name}) failed: {e}");
                    this.events.emit(UserEvent::failed(EventTag::TopicLoaded, name, e.to_string()));
                }
            }
        });
    }
}

/// Local bookkeeping fired by every completed operation: persist newly-created
/// topics and mirror local topic directories as listening starts/stops.
/// Received posts are persisted directly by the consumer as they arrive,
/// since this listener only sees the event tag, not the post payload.
async fn run_default_listener(mut rx: broadcast::Receiver<UserEvent>, profile: Arc<dyn ProfileStore>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
        };
        if !event.success {
            continue;
        }
        let outcome = match event.tag {
            EventTag::TopicCreated | EventTag::TopicListened => profile.create_topic(&event.topic).await,
            EventTag::TopicDeleted | EventTag::ServerTopicDeleted | EventTag::TopicListenStopped => {
                profile.delete_topic(&event.topic).await
            }
            EventTag::MessageReceived | EventTag::MessageSent | EventTag::TopicLoaded => Ok(()),
        };
        // Duplicate create/delete against bookkeeping already done by a
        // prior event for the same topic is expected, not a fault.
        if let Err(e) = outcome {
            if !matches!(e, postmesh_common::Error::AlreadyExists(_) | postmesh_common::Error::NoSuchTopic(_)) {
                warn!("default listener bookkeeping failed for {:?} on {}: {e}", event.tag, event.topic);
            }
        }
    }
}

fn generate_post_id() -> i64 {
    loop {
        let id: i64 = rand::thread_rng().gen();
        if id != FETCH_ALL_SENTINEL {
            return id;
        }
    }
}
