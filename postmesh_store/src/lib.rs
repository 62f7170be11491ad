//! # postmesh_store
//! The reference [`postmesh_common::TopicDao`] implementation: one directory
//! per topic, a `HEAD` pointer, and a singly-linked chain of `.meta`
//! back-links from newest post to oldest.
//!
//! Alternative engines only need to satisfy the trait's abstract semantics;
//! this layout is authoritative for data this crate itself writes, not a
//! requirement on every conforming implementation.

use log::{debug, trace, warn};
use postmesh_common::{Error, Post, PostInfo, Result, Topic, TopicDao};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const HEAD_FILE: &str = "HEAD";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<id>-?\d+)-(?P<poster>\w+)\.(?P<ext>.*)$")
            .expect("post filename pattern is a valid regex")
    })
}

/// Parses a post's primary filename (`{id}-{posterName}.{ext}`) per the
/// authoritative regex.
fn parse_post_filename(filename: &str) -> Result<PostInfo> {
    let caps = name_pattern()
        .captures(filename)
        .ok_or_else(|| Error::BadFilename(filename.to_string()))?;
    let id: i64 = caps["id"]
        .parse()
        .map_err(|_| Error::BadFilename(filename.to_string()))?;
    Ok(PostInfo {
        id,
        poster_name: caps["poster"].to_string(),
        file_extension: caps["ext"].to_string(),
    })
}

fn post_filename(info: &PostInfo) -> String {
    format!("{}-{}.{}", info.id, info.poster_name, info.file_extension)
}

fn meta_filename(filename: &str) -> String {
    format!("{filename}.meta")
}

/// Filesystem-backed [`TopicDao`]: one directory per topic under `root`.
#[derive(Debug, Clone)]
pub struct FileTopicDao {
    root: PathBuf,
}

impl FileTopicDao {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn topic_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn read_head(&self, topic_dir: &Path) -> Result<Option<String>> {
        let head_path = topic_dir.join(HEAD_FILE);
        let content = fs::read_to_string(&head_path).await?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    async fn write_head(&self, topic_dir: &Path, filename: &str) -> Result<()> {
        let head_path = topic_dir.join(HEAD_FILE);
        let mut file = fs::File::create(&head_path).await?;
        file.write_all(filename.as_bytes()).await?;
        Ok(())
    }

    /// Walks the `.meta` back-link chain for one topic directory, newest to
    /// oldest, then reverses so the caller sees earliest-to-latest order.
    async fn read_topic(&self, name: &str, topic_dir: &Path) -> Result<Topic> {
        let mut posts = Vec::new();
        let mut cursor = self.read_head(topic_dir).await?;

        while let Some(filename) = cursor {
            let info = parse_post_filename(&filename)?;
            let data = fs::read(topic_dir.join(&filename)).await?;
            posts.push(Post::new(info, data));

            let meta_path = topic_dir.join(meta_filename(&filename));
            let previous = fs::read_to_string(&meta_path).await.unwrap_or_default();
            let previous = previous.trim();
            cursor = if previous.is_empty() {
                None
            } else {
                Some(previous.to_string())
            };
        }

        posts.reverse();
        Ok(Topic {
            name: name.to_string(),
            posts,
        })
    }
}

#[async_trait::async_trait]
impl TopicDao for FileTopicDao {
    async fn create_topic(&self, name: &str) -> Result<()> {
        let dir = self.topic_dir(name);
        if dir.exists() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir).await?;
        self.write_head(&dir, "").await?;
        debug!("created topic store directory for {name}");
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let dir = self.topic_dir(name);
        if !dir.exists() {
            return Err(Error::NoSuchTopic(name.to_string()));
        }
        fs::remove_dir_all(&dir).await?;
        debug!("deleted topic store directory for {name}");
        Ok(())
    }

    async fn write_post(&self, post: &Post, topic_name: &str) -> Result<()> {
        let dir = self.topic_dir(topic_name);
        if !dir.exists() {
            return Err(Error::NoSuchTopic(topic_name.to_string()));
        }
        let filename = post_filename(&post.info);
        let previous_head = self.read_head(&dir).await?.unwrap_or_default();

        fs::write(dir.join(&filename), &post.data).await?;
        fs::write(dir.join(meta_filename(&filename)), previous_head.as_bytes()).await?;
        self.write_head(&dir, &filename).await?;
        trace!("wrote post {filename} for topic {topic_name}");
        Ok(())
    }

    async fn read_all_topics(&self) -> Result<Vec<Topic>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut topics = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read_topic(&name, &entry.path()).await {
                Ok(topic) => topics.push(topic),
                Err(e) => {
                    warn!("failed to load topic {name} from store: {e}");
                    return Err(e);
                }
            }
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmesh_common::PostInfo;

    #[tokio::test]
    async fn create_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dao = FileTopicDao::new(dir.path());

        dao.create_topic("t").await.unwrap();
        dao.write_post(&Post::new(PostInfo::new("u", "txt", 1), b"hi".to_vec()), "t")
            .await
            .unwrap();
        dao.write_post(
            &Post::new(PostInfo::new("u", "txt", 2), b"there".to_vec()),
            "t",
        )
        .await
        .unwrap();

        let topics = dao.read_all_topics().await.unwrap();
        assert_eq!(topics.len(), 1);
        let topic = &topics[0];
        assert_eq!(topic.name, "t");
        assert_eq!(topic.posts.len(), 2);
        assert_eq!(topic.posts[0].info.id, 1);
        assert_eq!(topic.posts[1].info.id, 2);
        assert_eq!(topic.posts[1].data, b"there".to_vec());
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dao = FileTopicDao::new(dir.path());
        dao.create_topic("t").await.unwrap();
        let err = dao.create_topic("t").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dao = FileTopicDao::new(dir.path());
        dao.create_topic("t").await.unwrap();
        dao.delete_topic("t").await.unwrap();
        assert!(!dir.path().join("t").exists());
        let err = dao.delete_topic("t").await.unwrap_err();
        assert!(matches!(err, Error::NoSuchTopic(_)));
    }

    #[tokio::test]
    async fn empty_topic_round_trips_to_no_posts() {
        let dir = tempfile::tempdir().unwrap();
        let dao = FileTopicDao::new(dir.path());
        dao.create_topic("t").await.unwrap();
        let topics = dao.read_all_topics().await.unwrap();
        assert_eq!(topics.len(), 1);
        assert!(topics[0].posts.is_empty());
    }

    #[test]
    fn parses_authoritative_filename_pattern() {
        let info = parse_post_filename("12-alice.txt").unwrap();
        assert_eq!(info.id, 12);
        assert_eq!(info.poster_name, "alice");
        assert_eq!(info.file_extension, "txt");
    }

    #[test]
    fn negative_sentinel_id_is_parseable() {
        let info = parse_post_filename("-1-alice.txt").unwrap();
        assert_eq!(info.id, -1);
    }

    #[test]
    fn unparseable_filename_is_bad_filename_error() {
        let err = parse_post_filename("not-a-valid-name").unwrap_err();
        assert!(matches!(err, Error::BadFilename(_)));
    }
}
