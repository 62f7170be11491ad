//! Plug-in boundaries: the Topic-DAO persistence contract and the
//! client-side profile store contract. Either may be swapped for an
//! alternative engine as long as the abstract semantics below hold.

use crate::{Post, Result, Topic};

/// Durable, per-topic, ordered, crash-consistent-per-post persistence for the
/// broker side. The reference implementation is `postmesh_store`'s
/// filesystem layout; any engine satisfying this contract is acceptable.
#[async_trait::async_trait]
pub trait TopicDao: Send + Sync {
    /// Creates on-disk state for a brand new topic. Must fail if the topic
    /// already has persisted state.
    async fn create_topic(&self, name: &str) -> Result<()>;

    /// Destroys all persisted state for a topic. Idempotent deletion of an
    /// absent topic is left to the implementation; the broker only calls
    /// this after the manager has confirmed the topic exists in memory.
    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// Durably appends one completed post to `topic_name`'s store. Called
    /// exactly once per post, at the moment its final packet is appended to
    /// the in-memory log.
    async fn write_post(&self, post: &Post, topic_name: &str) -> Result<()>;

    /// Reconstructs every topic this DAO knows about, in earliest-to-latest
    /// post order within each topic. Called once at broker startup.
    async fn read_all_topics(&self) -> Result<Vec<Topic>>;
}

/// Per-user local cache of subscribed topics and last-seen posts.
/// Only posts the user has actually received are stored here; it mirrors the
/// Topic-DAO layout but lives client-side.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// Initializes a brand new, empty profile.
    async fn create_new_profile(&self, name: &str) -> Result<()>;

    /// Loads an existing profile's previously-seen topics and posts.
    async fn load_profile(&self, name: &str) -> Result<Vec<Topic>>;

    /// Records that the local user has started following a topic.
    async fn create_topic(&self, name: &str) -> Result<()>;

    /// Drops all local state for a topic the user is no longer following.
    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// Persists one post the user has received for `topic_name`.
    async fn save_post(&self, post: &Post, topic_name: &str) -> Result<()>;
}
