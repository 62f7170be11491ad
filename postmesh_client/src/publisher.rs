//! Publisher: publish, create-topic, delete-topic — the three request
//! families that open one connection, send one request, and fire one event.

use crate::ci_manager::CiManager;
use crate::events::{EventBus, EventTag, UserEvent};
use log::warn;
use postmesh_codec::{read_bool, write_message, write_packet, write_post_count, write_post_info};
use postmesh_common::{Error, Post};
use std::sync::Arc;
use tokio::net::TcpStream;

pub struct Publisher {
    ci_manager: Arc<CiManager>,
    events: EventBus,
}

impl Publisher {
    pub fn new(ci_manager: Arc<CiManager>, events: EventBus) -> Self {
        Self { ci_manager, events }
    }

    /// Spawns the publish operation on its own task, since every public
    /// client operation is asynchronous. The topic's name is taken from
    /// `topic`, independent of anything in `post`.
    pub fn publish(&self, topic: impl Into<String>, post: Post) {
        let topic = topic.into();
        let ci_manager = self.ci_manager.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = Self::run_publish(&ci_manager, &topic, post).await;
            match outcome {
                Ok(()) => events.emit(UserEvent::ok(EventTag::MessageSent, topic)),
                Err(e) => {
                    warn!("publish to {topic} failed: {e}");
                    events.emit(UserEvent::failed(EventTag::MessageSent, topic, e.to_string()));
                }
            }
        });
    }

    async fn run_publish(ci_manager: &CiManager, topic: &str, post: Post) -> postmesh_common::Result<()> {
        let ci = ci_manager.resolve(topic).await?;
        let mut stream = TcpStream::connect(ci.socket_addr()).await?;
        write_message(&mut stream, &postmesh_codec::Message::data_packet_send(topic)).await?;
        if !read_bool(&mut stream).await? {
            return Err(Error::NoSuchTopic(topic.to_string()));
        }

        let packets = post.to_packets(postmesh_common::DEFAULT_PACKET_SIZE);
        write_post_count(&mut stream, 1).await?;
        write_post_info(&mut stream, &post.info).await?;
        for packet in &packets {
            write_packet(&mut stream, packet).await?;
        }
        Ok(())
    }

    pub fn create_topic(&self, name: impl Into<String>) {
        self.topic_lifecycle_op(name.into(), EventTag::TopicCreated, postmesh_codec::Message::create_topic);
    }

    pub fn delete_topic(&self, name: impl Into<String>) {
        self.topic_lifecycle_op(name.into(), EventTag::TopicDeleted, postmesh_codec::Message::delete_topic);
    }

    fn topic_lifecycle_op(
        &self,
        topic: String,
        tag: EventTag,
        build_request: fn(String) -> postmesh_codec::Message,
    ) {
        let ci_manager = self.ci_manager.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome: postmesh_common::Result<bool> = async {
                let ci = ci_manager.resolve(&topic).await?;
                let mut stream = TcpStream::connect(ci.socket_addr()).await?;
                write_message(&mut stream, &build_request(topic.clone())).await?;
                Ok(read_bool(&mut stream).await?)
            }
            .await;

            match outcome {
                Ok(true) => events.emit(UserEvent::ok(tag, topic)),
                Ok(false) => events.emit(UserEvent::failed(tag, topic, "broker rejected request")),
                Err(e) => {
                    warn!("{tag:?} for {topic} failed: {e}");
                    events.emit(UserEvent::failed(tag, topic, e.to_string()));
                }
            }
        });
    }
}
