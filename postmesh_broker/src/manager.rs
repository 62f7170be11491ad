//! `BrokerTopicManager`: the thread-safe registry of topics and their
//! attached consumer connections.

use crate::topic::BrokerTopic;
use dashmap::{DashMap, DashSet};
use log::{debug, warn};
use postmesh_common::{Error, Result, TopicDao};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle a registered consumer connection needs so `removeTopic` can close
/// it. Cloning shares the same cancellation signal.
#[derive(Clone)]
pub struct ConsumerHandle {
    pub id: u64,
    pub cancel: CancellationToken,
}

/// Thread-safe registry of `{topicsByName, consumerSocketsByTopic}`. Every
/// mutator is serialized with respect to the maps it touches; the fixed
/// acquisition order `topicsByName -> consumerSocketsByTopic -> DAO` is
/// preserved by always updating the topic map first, the consumer-socket
/// map second, and only then calling out to the DAO.
pub struct BrokerTopicManager {
    topics: DashMap<String, Arc<BrokerTopic>>,
    consumers: DashMap<String, DashSet<u64>>,
    cancellations: DashMap<u64, CancellationToken>,
    dao: Arc<dyn TopicDao>,
}

impl BrokerTopicManager {
    pub fn new(dao: Arc<dyn TopicDao>) -> Self {
        Self {
            topics: DashMap::new(),
            consumers: DashMap::new(),
            cancellations: DashMap::new(),
            dao,
        }
    }

    /// Loads every topic the DAO knows about at startup, reconstructing
    /// each `BrokerTopic` in memory.
    pub async fn load_from_dao(&self) -> Result<()> {
        for topic in self.dao.read_all_topics().await? {
            debug!("loaded topic {} with {} posts from store", topic.name, topic.posts.len());
            let name = topic.name.clone();
            self.topics
                .insert(name.clone(), Arc::new(BrokerTopic::from_posts(topic.name, topic.posts)));
            self.consumers.insert(name, DashSet::new());
        }
        Ok(())
    }

    pub async fn add_topic(&self, name: &str) -> Result<()> {
        if self.topics.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        self.dao.create_topic(name).await?;
        self.topics
            .insert(name.to_string(), Arc::new(BrokerTopic::new(name)));
        self.consumers.insert(name.to_string(), DashSet::new());
        Ok(())
    }

    /// Closes every attached consumer socket, then removes the topic from
    /// both maps and tells the DAO to delete it. A consumer close failure is
    /// logged but never blocks removal of the remaining consumers.
    pub async fn remove_topic(&self, name: &str) -> Result<()> {
        if !self.topics.contains_key(name) {
            return Err(Error::NoSuchTopic(name.to_string()));
        }
        if let Some((_, ids)) = self.consumers.remove(name) {
            for id in ids.iter() {
                if let Some((_, cancel)) = self.cancellations.remove(&id) {
                    cancel.cancel();
                } else {
                    warn!("consumer {} had no cancellation handle registered", *id);
                }
            }
        }
        self.topics.remove(name);
        self.dao.delete_topic(name).await?;
        Ok(())
    }

    pub fn get_topic(&self, name: &str) -> Result<Arc<BrokerTopic>> {
        self.topics
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NoSuchTopic(name.to_string()))
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Registers a consumer connection against a topic so it can be closed
    /// out from under it by `remove_topic`.
    pub fn register_consumer(&self, name: &str, handle: ConsumerHandle) -> Result<()> {
        let set = self
            .consumers
            .get(name)
            .ok_or_else(|| Error::NoSuchTopic(name.to_string()))?;
        set.insert(handle.id);
        self.cancellations.insert(handle.id, handle.cancel);
        Ok(())
    }

    /// Removes a consumer's bookkeeping once its connection closes on its
    /// own (remote close, not a server-initiated topic deletion).
    pub fn unregister_consumer(&self, name: &str, id: u64) {
        if let Some(set) = self.consumers.get(name) {
            set.remove(&id);
        }
        self.cancellations.remove(&id);
    }

    /// Cancels every registered consumer across every topic, closing their
    /// push-worker sockets. Used by broker shutdown; does not touch the DAO
    /// or the topic/consumer maps themselves.
    pub fn shutdown_all_consumers(&self) {
        for entry in self.cancellations.iter() {
            entry.value().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmesh_store::FileTopicDao;

    fn manager() -> (BrokerTopicManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dao: Arc<dyn TopicDao> = Arc::new(FileTopicDao::new(dir.path()));
        (BrokerTopicManager::new(dao), dir)
    }

    #[tokio::test]
    async fn add_then_duplicate_add_fails() {
        let (mgr, _dir) = manager();
        mgr.add_topic("t").await.unwrap();
        let err = mgr.add_topic("t").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn get_missing_topic_fails() {
        let (mgr, _dir) = manager();
        let err = mgr.get_topic("missing").unwrap_err();
        assert!(matches!(err, Error::NoSuchTopic(_)));
    }

    #[tokio::test]
    async fn remove_topic_cancels_registered_consumers() {
        let (mgr, _dir) = manager();
        mgr.add_topic("t").await.unwrap();
        let cancel = CancellationToken::new();
        mgr.register_consumer("t", ConsumerHandle { id: 1, cancel: cancel.clone() })
            .unwrap();
        mgr.remove_topic("t").await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(mgr.get_topic("t").is_err());
    }

    #[tokio::test]
    async fn register_consumer_on_missing_topic_fails() {
        let (mgr, _dir) = manager();
        let err = mgr
            .register_consumer("missing", ConsumerHandle { id: 1, cancel: CancellationToken::new() })
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchTopic(_)));
    }

    #[tokio::test]
    async fn keys_of_both_maps_stay_in_sync() {
        let (mgr, _dir) = manager();
        mgr.add_topic("a").await.unwrap();
        mgr.add_topic("b").await.unwrap();
        assert!(mgr.consumers.contains_key("a"));
        assert!(mgr.consumers.contains_key("b"));
        mgr.remove_topic("a").await.unwrap();
        assert!(!mgr.consumers.contains_key("a"));
        assert!(mgr.topics.contains_key("b"));
    }
}
