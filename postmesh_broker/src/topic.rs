//! `BrokerTopic`: the in-memory append-only log for a single topic, plus its
//! subscriber fan-out.

use log::{trace, warn};
use parking_lot::Mutex;
use postmesh_common::{Packet, Post, PostInfo};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// One record as delivered to a subscriber, in the exact order it was
/// appended to the log.
#[derive(Debug, Clone)]
pub enum TopicRecord {
    Info(PostInfo),
    Packet(Packet),
}

/// Bound on each subscriber's outgoing channel. A slow consumer that falls
/// this far behind is detached rather than allowed to backpressure the
/// whole topic.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<TopicRecord>,
}

struct Inner {
    post_infos: Vec<PostInfo>,
    packets_by_post_id: HashMap<i64, Vec<Packet>>,
    index_by_post_id: HashMap<i64, usize>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

impl Inner {
    fn notify_all(&mut self, record: TopicRecord) {
        self.subscribers.retain(|sub| match sub.sender.try_send(record.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("subscriber {} fell behind, detaching", sub.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("subscriber {} channel closed, detaching", sub.id);
                false
            }
        });
    }

    fn rebuild_index(&mut self) {
        self.index_by_post_id.clear();
        for (pos, info) in self.post_infos.iter().enumerate() {
            self.index_by_post_id.insert(info.id, pos);
        }
    }
}

/// In-memory append-only log of [`PostInfo`]s and their [`Packet`]s for one
/// topic, with synchronous subscriber fan-out under a single lock.
pub struct BrokerTopic {
    name: String,
    inner: Mutex<Inner>,
}

impl BrokerTopic {
    pub fn new(name: impl Into<String>) -> Self {
        let mut post_infos = Vec::new();
        let mut index_by_post_id = HashMap::new();
        let sentinel = PostInfo::sentinel();
        index_by_post_id.insert(sentinel.id, 0);
        post_infos.push(sentinel);
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                post_infos,
                packets_by_post_id: HashMap::new(),
                index_by_post_id,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            }),
        }
    }

    /// Reconstructs a topic's log from posts already read out of the
    /// Topic-DAO at broker startup, in the earliest-to-latest order the DAO
    /// returns them.
    pub fn from_posts(name: impl Into<String>, posts: Vec<Post>) -> Self {
        let topic = Self::new(name);
        for post in posts {
            topic.append_post_info(post.info.clone());
            for packet in post.to_packets(postmesh_common::DEFAULT_PACKET_SIZE) {
                topic.append_packet(packet);
            }
        }
        topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a post header to the log and notifies subscribers. The
    /// header's `packetsByPostId` entry starts empty and grows until a final
    /// packet arrives.
    pub fn append_post_info(&self, info: PostInfo) {
        let mut inner = self.inner.lock();
        let pos = inner.post_infos.len();
        inner.index_by_post_id.insert(info.id, pos);
        inner.packets_by_post_id.insert(info.id, Vec::new());
        inner.post_infos.push(info.clone());
        inner.notify_all(TopicRecord::Info(info));
    }

    /// Appends one packet to its post's entry and notifies subscribers.
    /// Returns the reassembled [`Post`] once the just-appended packet is the
    /// final one, so the caller can fire the persistence hook exactly once
    /// per post without holding this log's lock during I/O.
    pub fn append_packet(&self, packet: Packet) -> Option<Post> {
        let mut inner = self.inner.lock();
        let is_final = packet.is_final;
        let post_id = packet.post_id;
        inner
            .packets_by_post_id
            .entry(post_id)
            .or_default()
            .push(packet.clone());
        inner.notify_all(TopicRecord::Packet(packet));

        if !is_final {
            return None;
        }
        let pos = *inner.index_by_post_id.get(&post_id)?;
        let info = inner.post_infos[pos].clone();
        let packets = inner.packets_by_post_id.get(&post_id)?.clone();
        Some(Post::from_packets(info, &packets))
    }

    /// Discards a post that never reached its final packet because its
    /// publisher connection was aborted on a protocol violation -- a foreign
    /// post id mid-stream must leave no trace of the offending post in the
    /// log. A no-op if the post was already finalized or never started.
    pub fn discard_unfinished(&self, post_id: i64) {
        let mut inner = self.inner.lock();
        let Some(&pos) = inner.index_by_post_id.get(&post_id) else {
            return;
        };
        if inner
            .packets_by_post_id
            .get(&post_id)
            .is_some_and(|pkts| pkts.last().is_some_and(|p| p.is_final))
        {
            // Already finalized; once final a post's entry is immutable.
            return;
        }
        inner.post_infos.remove(pos);
        inner.packets_by_post_id.remove(&post_id);
        inner.rebuild_index();
    }

    /// Everything strictly after the post with `id`. If `id` isn't present
    /// (e.g. the broker restarted since the consumer last saw it), returns
    /// an empty vector -- this is not an error, the consumer just resumes
    /// from the current log head next time it learns new ids.
    pub fn posts_since(&self, id: i64) -> Vec<(PostInfo, Vec<Packet>)> {
        let inner = self.inner.lock();
        let Some(&pos) = inner.index_by_post_id.get(&id) else {
            return Vec::new();
        };
        inner.post_infos[pos + 1..]
            .iter()
            .map(|info| {
                let packets = inner
                    .packets_by_post_id
                    .get(&info.id)
                    .cloned()
                    .unwrap_or_default();
                (info.clone(), packets)
            })
            .collect()
    }

    /// Registers a new subscriber and returns its id plus the receiving end
    /// of its channel. The push worker owns the receiver and the socket;
    /// this log only ever holds the sending end.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<TopicRecord>) {
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        inner.subscribers.push(Subscriber { id, sender: tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.retain(|s| s.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmesh_common::FETCH_ALL_SENTINEL;

    fn one_packet_post(id: i64, data: &[u8]) -> (PostInfo, Packet) {
        let info = PostInfo::new("u", "txt", id);
        let packet = Packet {
            post_id: id,
            index: 0,
            is_final: true,
            payload: data.to_vec(),
        };
        (info, packet)
    }

    #[test]
    fn posts_since_sentinel_returns_everything() {
        let topic = BrokerTopic::new("t");
        let (info, packet) = one_packet_post(1, b"hi");
        topic.append_post_info(info);
        let completed = topic.append_packet(packet);
        assert!(completed.is_some());

        let since = topic.posts_since(FETCH_ALL_SENTINEL);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].0.id, 1);
        assert_eq!(since[0].1.len(), 1);
    }

    #[test]
    fn posts_since_unknown_id_is_empty_not_error() {
        let topic = BrokerTopic::new("t");
        assert!(topic.posts_since(999).is_empty());
    }

    #[test]
    fn discard_unfinished_removes_partial_post() {
        let topic = BrokerTopic::new("t");
        topic.append_post_info(PostInfo::new("u", "txt", 1));
        topic.append_packet(Packet {
            post_id: 1,
            index: 0,
            is_final: false,
            payload: b"partial".to_vec(),
        });
        topic.discard_unfinished(1);
        assert!(topic.posts_since(FETCH_ALL_SENTINEL).is_empty());
    }

    #[test]
    fn discard_unfinished_is_noop_once_finalized() {
        let topic = BrokerTopic::new("t");
        let (info, packet) = one_packet_post(1, b"hi");
        topic.append_post_info(info);
        topic.append_packet(packet);
        topic.discard_unfinished(1);
        assert_eq!(topic.posts_since(FETCH_ALL_SENTINEL).len(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_records_in_order() {
        let topic = BrokerTopic::new("t");
        let (_id, mut rx) = topic.subscribe();
        let (info, packet) = one_packet_post(1, b"hi");
        topic.append_post_info(info);
        topic.append_packet(packet);

        match rx.recv().await.unwrap() {
            TopicRecord::Info(i) => assert_eq!(i.id, 1),
            _ => panic!("expected info first"),
        }
        match rx.recv().await.unwrap() {
            TopicRecord::Packet(p) => assert_eq!(p.post_id, 1),
            _ => panic!("expected packet second"),
        }
    }

    #[test]
    fn from_posts_reconstructs_log() {
        let post = Post::new(PostInfo::new("u", "txt", 1), b"hello".to_vec());
        let topic = BrokerTopic::from_posts("t", vec![post]);
        let since = topic.posts_since(FETCH_ALL_SENTINEL);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].0.id, 1);
    }
}
