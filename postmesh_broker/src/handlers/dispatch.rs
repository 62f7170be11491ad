//! Per-connection request dispatch: reads one
//! [`Message`] header then routes to the matching one-shot handler or
//! long-lived worker.

use crate::broker::Broker;
use crate::handlers::{consume, publish};
use crate::manager::ConsumerHandle;
use log::{debug, warn};
use postmesh_codec::{read_message, write_bool, write_connection_info, Message, MessageType};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

pub async fn handle_client_connection(mut stream: TcpStream, broker: Arc<Broker>) {
    let peer = stream.peer_addr().ok();
    let msg: Message = match read_message(&mut stream).await {
        Ok(msg) => msg,
        Err(e) => {
            debug!("failed to read request header from {peer:?}: {e}");
            return;
        }
    };

    match msg.msg_type {
        MessageType::BrokerDiscovery => handle_discovery(&mut stream, &msg, &broker).await,
        MessageType::CreateTopic => handle_create_topic(&mut stream, &msg, &broker).await,
        MessageType::DeleteTopic => handle_delete_topic(&mut stream, &msg, &broker).await,
        MessageType::DataPacketSend => handle_data_packet_send(&mut stream, &msg, &broker).await,
        MessageType::InitialiseConsumer => handle_initialise_consumer(stream, &msg, &broker).await,
    }
}

async fn handle_discovery(stream: &mut TcpStream, msg: &Message, broker: &Arc<Broker>) {
    let Ok(name) = msg.name() else {
        warn!("BROKER_DISCOVERY with malformed value");
        return;
    };
    let ci = broker.owner(name).await;
    if let Err(e) = write_connection_info(stream, &ci).await {
        debug!("failed to reply to discovery for {name}: {e}");
    }
}

async fn handle_create_topic(stream: &mut TcpStream, msg: &Message, broker: &Arc<Broker>) {
    let Ok(name) = msg.name() else {
        warn!("CREATE_TOPIC with malformed value");
        return;
    };
    let success = broker.manager.add_topic(name).await.is_ok();
    let _ = write_bool(stream, success).await;
}

async fn handle_delete_topic(stream: &mut TcpStream, msg: &Message, broker: &Arc<Broker>) {
    let Ok(name) = msg.name() else {
        warn!("DELETE_TOPIC with malformed value");
        return;
    };
    let success = broker.manager.remove_topic(name).await.is_ok();
    let _ = write_bool(stream, success).await;
}

async fn handle_data_packet_send(stream: &mut TcpStream, msg: &Message, broker: &Arc<Broker>) {
    let Ok(name) = msg.name() else {
        warn!("DATA_PACKET_SEND with malformed value");
        return;
    };
    match broker.manager.get_topic(name) {
        Ok(topic) => {
            if write_bool(stream, true).await.is_err() {
                return;
            }
            if let Err(e) = publish::run_pull_loop(stream, topic, broker.dao.clone(), broker).await {
                debug!("pull-loop for {name} aborted: {e}");
            }
        }
        Err(_) => {
            let _ = write_bool(stream, false).await;
        }
    }
}

async fn handle_initialise_consumer(stream: TcpStream, msg: &Message, broker: &Arc<Broker>) {
    let Ok(token) = msg.token() else {
        warn!("INITIALISE_CONSUMER with malformed value");
        return;
    };
    let topic = match broker.manager.get_topic(&token.name) {
        Ok(topic) => topic,
        Err(_) => {
            let mut stream = stream;
            let _ = write_bool(&mut stream, false).await;
            return;
        }
    };

    let mut stream = stream;
    if write_bool(&mut stream, true).await.is_err() {
        return;
    }

    let (mut read_half, mut write_half) = stream.into_split();
    let cancel = CancellationToken::new();
    let consumer_id = broker.next_consumer_id();
    if let Err(e) = broker.manager.register_consumer(
        &token.name,
        ConsumerHandle { id: consumer_id, cancel: cancel.clone() },
    ) {
        debug!("failed to register consumer for {}: {e}", token.name);
        return;
    }

    // Detect the consumer closing its end (remote close / reset) so the
    // manager stops tracking it even if no new post ever arrives to notice.
    let reader_cancel = cancel.clone();
    let reader_manager = broker.manager.clone();
    let reader_topic_name = token.name.clone();
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut probe = [0u8; 1];
        let _ = read_half.read(&mut probe).await;
        reader_cancel.cancel();
        reader_manager.unregister_consumer(&reader_topic_name, consumer_id);
    });

    if let Err(e) = consume::run_push_worker(&mut write_half, topic, token.last_seen_id, cancel).await {
        debug!("push worker for {} ended: {e}", token.name);
    }
    broker.manager.unregister_consumer(&token.name, consumer_id);
}
