use postmesh_common::{Error, Result, TopicToken};
use serde::{Deserialize, Serialize};

/// The five request kinds a client can open a connection with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    DataPacketSend,
    InitialiseConsumer,
    BrokerDiscovery,
    CreateTopic,
    DeleteTopic,
}

/// The payload carried by a [`Message`]: a bare topic name for every request
/// type except `InitialiseConsumer`, which carries a resume [`TopicToken`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageValue {
    Name(String),
    Token(TopicToken),
}

/// The request header sent by clients to open any protocol exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub value: MessageValue,
}

impl Message {
    pub fn create_topic(name: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::CreateTopic,
            value: MessageValue::Name(name.into()),
        }
    }

    pub fn delete_topic(name: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::DeleteTopic,
            value: MessageValue::Name(name.into()),
        }
    }

    pub fn broker_discovery(name: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::BrokerDiscovery,
            value: MessageValue::Name(name.into()),
        }
    }

    pub fn data_packet_send(name: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::DataPacketSend,
            value: MessageValue::Name(name.into()),
        }
    }

    pub fn initialise_consumer(token: TopicToken) -> Self {
        Self {
            msg_type: MessageType::InitialiseConsumer,
            value: MessageValue::Token(token),
        }
    }

    /// Returns the topic name carried by this message, or a protocol
    /// violation if the message type isn't one that carries a bare name.
    pub fn name(&self) -> Result<&str> {
        match &self.value {
            MessageValue::Name(name) => Ok(name),
            MessageValue::Token(_) => Err(Error::ProtocolViolation(format!(
                "{:?} message carries a TopicToken, not a name",
                self.msg_type
            ))),
        }
    }

    /// Returns the [`TopicToken`] carried by this message, or a protocol
    /// violation if it isn't an `InitialiseConsumer` message.
    pub fn token(&self) -> Result<&TopicToken> {
        match &self.value {
            MessageValue::Token(token) => Ok(token),
            MessageValue::Name(_) => Err(Error::ProtocolViolation(format!(
                "{:?} message carries a name, not a TopicToken",
                self.msg_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_message, write_message};

    #[tokio::test]
    async fn message_round_trips_through_framing() {
        let msg = Message::create_topic("weather");
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_message(&mut cursor).await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn initialise_consumer_round_trips_token() {
        let msg = Message::initialise_consumer(TopicToken {
            name: "weather".into(),
            last_seen_id: 41,
        });
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_message(&mut cursor).await.unwrap();
        assert_eq!(got.token().unwrap().last_seen_id, 41);
    }

    #[test]
    fn name_accessor_rejects_token_messages() {
        let msg = Message::initialise_consumer(TopicToken::from_start("t"));
        assert!(msg.name().is_err());
    }

    #[test]
    fn token_accessor_rejects_name_messages() {
        let msg = Message::create_topic("t");
        assert!(msg.token().is_err());
    }
}
