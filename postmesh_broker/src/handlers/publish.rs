//! DATA_PACKET_SEND handling: the publish-side pull-loop run inline on the
//! accept thread.

use crate::broker::Broker;
use crate::topic::BrokerTopic;
use log::{trace, warn};
use postmesh_codec::{read_packet, read_post_count, read_post_info};
use postmesh_common::{Error, Result, TopicDao};
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Reads `int32 count`, then for each of `count` posts reads one `PostInfo`
/// followed by its packets until a final one, appending each record to the
/// topic's log as it arrives so subscribers see a true live stream.
///
/// A packet whose `post_id` doesn't match the post currently being received
/// is a protocol violation: the partially-appended post is discarded from
/// the log and the whole connection is aborted.
///
/// A failed durable write is treated as a fault in the broker itself, not
/// just this connection: it triggers a graceful whole-broker shutdown
/// rather than only aborting the publisher that happened to trigger it.
pub async fn run_pull_loop<S>(
    stream: &mut S,
    topic: Arc<BrokerTopic>,
    dao: Arc<dyn TopicDao>,
    broker: &Arc<Broker>,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let count = read_post_count(stream).await?;
    trace!("pull-loop for {} expects {} posts", topic.name(), count);

    for _ in 0..count {
        let info = read_post_info(stream).await?;
        let post_id = info.id;
        topic.append_post_info(info);

        loop {
            let packet = read_packet(stream).await?;
            if packet.post_id != post_id {
                topic.discard_unfinished(post_id);
                return Err(Error::ProtocolViolation(format!(
                    "packet for post {} arrived while receiving post {post_id}",
                    packet.post_id
                )));
            }
            let is_final = packet.is_final;
            let completed = topic.append_packet(packet);
            if is_final {
                if let Some(post) = completed {
                    if let Err(e) = dao.write_post(&post, topic.name()).await {
                        warn!(
                            "persistence failed for post {post_id} on topic {}: {e}",
                            topic.name()
                        );
                        broker.shutdown();
                        return Err(e);
                    }
                }
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use async_trait::async_trait;
    use postmesh_codec::{write_packet, write_post_count, write_post_info};
    use postmesh_common::{Post, Topic, FETCH_ALL_SENTINEL, Packet, PostInfo};
    use postmesh_store::FileTopicDao;
    use std::net::{Ipv4Addr, SocketAddr};

    async fn build_stream(bytes: &[u8]) -> std::io::Cursor<Vec<u8>> {
        std::io::Cursor::new(bytes.to_vec())
    }

    async fn test_broker(dao: Arc<dyn TopicDao>) -> Arc<Broker> {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig {
            broker_dir: dir.path().to_path_buf(),
            client_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            peer_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            leader_peer: None,
        };
        std::mem::forget(dir);
        Broker::start(config, dao).await.unwrap()
    }

    #[tokio::test]
    async fn valid_single_post_commits_to_log() {
        let mut buf = Vec::new();
        write_post_count(&mut buf, 1).await.unwrap();
        write_post_info(&mut buf, &PostInfo::new("u", "txt", 1)).await.unwrap();
        write_packet(
            &mut buf,
            &Packet {
                post_id: 1,
                index: 0,
                is_final: true,
                payload: b"hi".to_vec(),
            },
        )
        .await
        .unwrap();

        let mut stream = build_stream(&buf).await;
        let topic = Arc::new(BrokerTopic::new("t"));
        let dir = tempfile::tempdir().unwrap();
        let dao: Arc<dyn TopicDao> = Arc::new(FileTopicDao::new(dir.path()));
        dao.create_topic("t").await.unwrap();
        let broker = test_broker(dao.clone()).await;

        run_pull_loop(&mut stream, topic.clone(), dao, &broker).await.unwrap();
        assert_eq!(topic.posts_since(FETCH_ALL_SENTINEL).len(), 1);
        assert!(!broker.is_shut_down());
    }

    #[tokio::test]
    async fn foreign_post_id_aborts_and_discards() {
        let mut buf = Vec::new();
        write_post_count(&mut buf, 1).await.unwrap();
        write_post_info(&mut buf, &PostInfo::new("u", "txt", 1)).await.unwrap();
        write_packet(
            &mut buf,
            &Packet { post_id: 1, index: 0, is_final: false, payload: b"part".to_vec() },
        )
        .await
        .unwrap();
        // foreign post id mid-stream
        write_packet(
            &mut buf,
            &Packet { post_id: 2, index: 0, is_final: true, payload: b"x".to_vec() },
        )
        .await
        .unwrap();

        let mut stream = build_stream(&buf).await;
        let topic = Arc::new(BrokerTopic::new("t"));
        let dir = tempfile::tempdir().unwrap();
        let dao: Arc<dyn TopicDao> = Arc::new(FileTopicDao::new(dir.path()));
        dao.create_topic("t").await.unwrap();
        let broker = test_broker(dao.clone()).await;

        let err = run_pull_loop(&mut stream, topic.clone(), dao, &broker).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(topic.posts_since(FETCH_ALL_SENTINEL).is_empty());
        assert!(!broker.is_shut_down());
    }

    struct FailingDao;

    #[async_trait]
    impl TopicDao for FailingDao {
        async fn create_topic(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_topic(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn write_post(&self, _post: &Post, _topic_name: &str) -> Result<()> {
            Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn read_all_topics(&self) -> Result<Vec<Topic>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_shuts_down_the_broker() {
        let mut buf = Vec::new();
        write_post_count(&mut buf, 1).await.unwrap();
        write_post_info(&mut buf, &PostInfo::new("u", "txt", 1)).await.unwrap();
        write_packet(
            &mut buf,
            &Packet { post_id: 1, index: 0, is_final: true, payload: b"hi".to_vec() },
        )
        .await
        .unwrap();

        let mut stream = build_stream(&buf).await;
        let topic = Arc::new(BrokerTopic::new("t"));
        let dao: Arc<dyn TopicDao> = Arc::new(FailingDao);
        let broker = test_broker(dao.clone()).await;

        let err = run_pull_loop(&mut stream, topic, dao, &broker).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(broker.is_shut_down());
    }
}
