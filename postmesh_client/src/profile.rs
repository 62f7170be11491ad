//! Profile store adapter: a per-user local cache of subscribed topics and
//! last-seen post ids. A profile is a directory of topic subdirectories
//! mirroring the Topic-DAO layout, so the reference adapter simply roots a
//! [`postmesh_store::FileTopicDao`] at the active profile's directory and
//! forwards to it.

use postmesh_common::{Error, Post, ProfileStore, Result, Topic, TopicDao};
use postmesh_store::FileTopicDao;
use std::path::PathBuf;
use tokio::sync::RwLock;

pub struct FileProfileStore {
    base_dir: PathBuf,
    active: RwLock<Option<FileTopicDao>>,
}

impl FileProfileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), active: RwLock::new(None) }
    }

    fn profile_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

#[async_trait::async_trait]
impl ProfileStore for FileProfileStore {
    async fn create_new_profile(&self, name: &str) -> Result<()> {
        let dir = self.profile_dir(name);
        tokio::fs::create_dir_all(&dir).await?;
        *self.active.write().await = Some(FileTopicDao::new(dir));
        Ok(())
    }

    async fn load_profile(&self, name: &str) -> Result<Vec<Topic>> {
        let dir = self.profile_dir(name);
        let dao = FileTopicDao::new(dir);
        let topics = dao.read_all_topics().await?;
        *self.active.write().await = Some(dao);
        Ok(topics)
    }

    async fn create_topic(&self, name: &str) -> Result<()> {
        let guard = self.active.read().await;
        let dao = guard.as_ref().ok_or(Error::NoActiveProfile)?;
        dao.create_topic(name).await
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let guard = self.active.read().await;
        let dao = guard.as_ref().ok_or(Error::NoActiveProfile)?;
        dao.delete_topic(name).await
    }

    async fn save_post(&self, post: &Post, topic_name: &str) -> Result<()> {
        let guard = self.active.read().await;
        let dao = guard.as_ref().ok_or(Error::NoActiveProfile)?;
        dao.write_post(post, topic_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmesh_common::PostInfo;

    #[tokio::test]
    async fn create_then_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.create_new_profile("alice").await.unwrap();
        store.create_topic("t").await.unwrap();
        store
            .save_post(&Post::new(PostInfo::new("u", "txt", 1), b"hi".to_vec()), "t")
            .await
            .unwrap();

        let topics = store.load_profile("alice").await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].posts.len(), 1);
    }

    #[tokio::test]
    async fn operations_before_any_profile_selected_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path());
        let err = store.create_topic("t").await.unwrap_err();
        assert!(matches!(err, Error::NoActiveProfile));
    }
}
