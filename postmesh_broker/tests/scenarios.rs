//! End-to-end broker scenarios that don't require the client crate:
//! duplicate-create racing two raw protocol connections against a running
//! broker, and discovery across a leader + follower pair.

use postmesh_broker::{Broker, BrokerConfig};
use postmesh_codec::{read_bool, read_connection_info, write_message, Message};
use postmesh_common::TopicDao;
use postmesh_store::FileTopicDao;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

async fn start_leader(client_port: u16, peer_port: u16) -> Arc<Broker> {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    std::mem::forget(dir); // keep the tempdir alive for the test process
    let config = BrokerConfig {
        broker_dir: dir_path.clone(),
        client_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, client_port)),
        peer_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, peer_port)),
        leader_peer: None,
    };
    let dao = Arc::new(FileTopicDao::new(dir_path));
    Broker::start(config, dao).await.unwrap()
}

async fn start_follower(client_port: u16, peer_port: u16, leader_peer_port: u16) -> Arc<Broker> {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    std::mem::forget(dir);
    let config = BrokerConfig {
        broker_dir: dir_path.clone(),
        client_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, client_port)),
        peer_bind: SocketAddr::from((Ipv4Addr::LOCALHOST, peer_port)),
        leader_peer: Some(SocketAddr::from((Ipv4Addr::LOCALHOST, leader_peer_port))),
    };
    let dao = Arc::new(FileTopicDao::new(dir_path));
    Broker::start(config, dao).await.unwrap()
}

async fn send_create_topic(client_port: u16, name: &str) -> bool {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, client_port)).await.unwrap();
    write_message(&mut stream, &Message::create_topic(name)).await.unwrap();
    read_bool(&mut stream).await.unwrap()
}

#[tokio::test]
async fn duplicate_create_exactly_one_succeeds() {
    let broker = start_leader(39621, 39622).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (a, b) = tokio::join!(send_create_topic(39621, "z"), send_create_topic(39621, "z"));
    assert_ne!(a, b, "exactly one of the two concurrent creates must succeed");
    assert!(broker.manager.topic_exists("z"));
}

#[tokio::test]
async fn discovery_across_two_brokers_resolves_each_owner() {
    let leader = start_leader(39721, 39722).await;
    let _follower = start_follower(39731, 39732, 39722).await;
    // Let the follower's peer handshake land before discovering.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, 39721)).await.unwrap();
    write_message(&mut stream, &Message::broker_discovery("any-topic")).await.unwrap();
    let ci = read_connection_info(&mut stream).await.unwrap();

    // With exactly one follower registered, owner_index yields either 0
    // (the follower) or 1 (the leader, i.e. "self") -- both are valid
    // members of the two-broker mesh the leader knows about.
    let leader_ci = leader.config.self_client_ci();
    assert!(ci == leader_ci || ci.port == 39731);
}
