//! Wire-level and logical data types shared by every postmesh crate.
//!
//! These are plain value types; framing them onto the wire is
//! `postmesh_codec`'s job, not this crate's.

use serde::{Deserialize, Serialize};

/// Reserved post id meaning "fetch everything" when passed to
/// [`crate::TopicDao`]/`BrokerTopic::posts_since`-style queries.
pub const FETCH_ALL_SENTINEL: i64 = -1;

/// Default chunk size used when splitting a [`Post`]'s payload into
/// [`Packet`]s. Not part of the wire contract -- purely a local choice by
/// whichever side is doing the splitting.
pub const DEFAULT_PACKET_SIZE: usize = 16 * 1024;

/// Immutable header of a post.
///
/// `id` is assigned by the publisher and must be unique within the topic and
/// monotonic within a single publisher session. [`FETCH_ALL_SENTINEL`] is
/// reserved and must never be used for a real post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub poster_name: String,
    pub file_extension: String,
    pub id: i64,
}

impl PostInfo {
    pub fn new(poster_name: impl Into<String>, file_extension: impl Into<String>, id: i64) -> Self {
        Self {
            poster_name: poster_name.into(),
            file_extension: file_extension.into(),
            id,
        }
    }

    /// The sentinel `PostInfo` occupying position 0 of every in-memory topic
    /// log, so that "posts since -1" naturally returns everything.
    pub fn sentinel() -> Self {
        Self {
            poster_name: String::new(),
            file_extension: String::new(),
            id: FETCH_ALL_SENTINEL,
        }
    }
}

/// An immutable fragment of a post. Packets of one post share `post_id`,
/// are sent in `index` order, and exactly one of them (the last) has
/// `is_final` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub post_id: i64,
    pub index: u32,
    pub is_final: bool,
    pub payload: Vec<u8>,
}

/// A complete logical post: header plus the data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub info: PostInfo,
    pub data: Vec<u8>,
}

impl Post {
    pub fn new(info: PostInfo, data: impl Into<Vec<u8>>) -> Self {
        Self {
            info,
            data: data.into(),
        }
    }

    /// Splits this post's data into packets of at most `chunk_size` bytes.
    /// Always yields at least one packet (possibly empty), and the last one
    /// always has `is_final = true`.
    pub fn to_packets(&self, chunk_size: usize) -> Vec<Packet> {
        debug_assert!(chunk_size > 0);
        if self.data.is_empty() {
            return vec![Packet {
                post_id: self.info.id,
                index: 0,
                is_final: true,
                payload: Vec::new(),
            }];
        }
        let chunks: Vec<&[u8]> = self.data.chunks(chunk_size).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Packet {
                post_id: self.info.id,
                index: index as u32,
                is_final: index == last,
                payload: payload.to_vec(),
            })
            .collect()
    }

    /// Reassembles a post from its header and an ordered, complete packet
    /// sequence. Callers are responsible for having collected packets for a
    /// single `post_id` in index order ending with the final packet; this is
    /// the round-trip inverse of [`Post::to_packets`].
    pub fn from_packets(info: PostInfo, packets: &[Packet]) -> Self {
        let mut data = Vec::with_capacity(packets.iter().map(|p| p.payload.len()).sum());
        for packet in packets {
            data.extend_from_slice(&packet.payload);
        }
        Self { info, data }
    }
}

/// A named, ordered, append-only log of posts. Topic names are a primary key
/// across the whole cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub posts: Vec<Post>,
}

/// A consumer's resume cursor: "send me everything for `name` strictly after
/// `last_seen_id`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicToken {
    pub name: String,
    pub last_seen_id: i64,
}

impl TopicToken {
    pub fn from_start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_seen_id: FETCH_ALL_SENTINEL,
        }
    }
}

/// A `{address, port}` pair, the network identity of a broker's client-facing
/// or peer-facing listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub address: std::net::Ipv4Addr,
    pub port: u16,
}

impl ConnectionInfo {
    pub fn new(address: std::net::Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((self.address, self.port))
    }
}

impl From<std::net::SocketAddrV4> for ConnectionInfo {
    fn from(addr: std::net::SocketAddrV4) -> Self {
        Self {
            address: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_chunk() {
        let post = Post::new(PostInfo::new("u", "txt", 1), b"hello".to_vec());
        let packets = post.to_packets(DEFAULT_PACKET_SIZE);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_final);
        let rebuilt = Post::from_packets(post.info.clone(), &packets);
        assert_eq!(rebuilt.data, post.data);
    }

    #[test]
    fn round_trip_multi_chunk() {
        let data = vec![7u8; 10_000];
        let post = Post::new(PostInfo::new("u", "bin", 2), data.clone());
        let packets = post.to_packets(4096);
        assert_eq!(packets.len(), 3);
        assert!(packets[..2].iter().all(|p| !p.is_final));
        assert!(packets[2].is_final);
        for (idx, p) in packets.iter().enumerate() {
            assert_eq!(p.index as usize, idx);
            assert_eq!(p.post_id, 2);
        }
        let rebuilt = Post::from_packets(post.info.clone(), &packets);
        assert_eq!(rebuilt.data, data);
    }

    #[test]
    fn empty_post_still_yields_one_final_packet() {
        let post = Post::new(PostInfo::new("u", "txt", 3), Vec::new());
        let packets = post.to_packets(DEFAULT_PACKET_SIZE);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_final);
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn sentinel_post_info_has_reserved_id() {
        assert_eq!(PostInfo::sentinel().id, FETCH_ALL_SENTINEL);
    }
}
