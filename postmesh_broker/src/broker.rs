//! The broker node: owns the topic manager, accepts both client and peer
//! connections, and answers BROKER_DISCOVERY by consulting its view of the
//! peer mesh.

use crate::config::BrokerConfig;
use crate::handlers::dispatch::handle_client_connection;
use crate::manager::BrokerTopicManager;
use log::{info, warn};
use postmesh_codec::{read_connection_info, write_connection_info};
use postmesh_common::{hash, ConnectionInfo, Result, TopicDao};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A running broker. Shared behind an `Arc` with every spawned connection
/// task so handlers can reach the topic manager and the peer roster.
pub struct Broker {
    pub config: BrokerConfig,
    pub manager: Arc<BrokerTopicManager>,
    pub dao: Arc<dyn TopicDao>,
    /// The other brokers in the mesh, as seen by this broker. A leader
    /// accumulates these as followers connect; a follower's list never
    /// grows past what it was told at startup. No peer-failure detection:
    /// a dropped TCP connection does not remove the peer's slot.
    peer_client_cis: RwLock<Vec<ConnectionInfo>>,
    next_consumer_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Broker {
    /// Builds and starts a broker per `config`: loads persisted topics,
    /// binds both listeners, and, if `config.leader_peer` is set, dials the
    /// leader to join its mesh. Returns once both accept loops are spawned;
    /// they run for the lifetime of the process.
    pub async fn start(config: BrokerConfig, dao: Arc<dyn TopicDao>) -> Result<Arc<Self>> {
        let manager = Arc::new(BrokerTopicManager::new(dao.clone()));
        manager.load_from_dao().await?;

        let broker = Arc::new(Broker {
            config,
            manager,
            dao,
            peer_client_cis: RwLock::new(Vec::new()),
            next_consumer_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        let client_listener = TcpListener::bind(broker.config.client_bind).await?;
        info!("client listener bound on {}", broker.config.client_bind);
        let peer_listener = TcpListener::bind(broker.config.peer_bind).await?;
        info!("peer listener bound on {}", broker.config.peer_bind);

        tokio::spawn(Broker::run_client_accept_loop(client_listener, broker.clone()));
        tokio::spawn(Broker::run_peer_accept_loop(peer_listener, broker.clone()));

        if let Some(leader_peer) = broker.config.leader_peer {
            Broker::join_leader(&broker, leader_peer).await?;
        }

        Ok(broker)
    }

    async fn run_client_accept_loop(listener: TcpListener, broker: Arc<Broker>) {
        loop {
            tokio::select! {
                _ = broker.shutdown.cancelled() => {
                    info!("client accept loop shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let broker = broker.clone();
                            tokio::spawn(async move {
                                handle_client_connection(stream, broker).await;
                            });
                        }
                        Err(e) => {
                            warn!("client accept loop error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn run_peer_accept_loop(listener: TcpListener, broker: Arc<Broker>) {
        loop {
            tokio::select! {
                _ = broker.shutdown.cancelled() => {
                    info!("peer accept loop shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((mut stream, addr)) => {
                            info!("peer connection from {addr}");
                            match read_connection_info(&mut stream).await {
                                Ok(ci) => {
                                    broker.peer_client_cis.write().await.push(ci);
                                    // Held open as the peer's liveness signal, but
                                    // nothing is actually detected from it.
                                    tokio::spawn(Broker::hold_peer_socket(stream));
                                }
                                Err(e) => {
                                    warn!("malformed peer handshake from {addr}: {e}");
                                }
                            }
                        }
                        Err(e) => {
                            warn!("peer accept loop error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn hold_peer_socket(mut stream: TcpStream) {
        use tokio::io::AsyncReadExt;
        let mut probe = [0u8; 1];
        let _ = stream.read(&mut probe).await;
    }

    async fn join_leader(broker: &Arc<Broker>, leader_peer: std::net::SocketAddr) -> Result<()> {
        info!("dialing leader peer at {leader_peer}");
        let mut stream = TcpStream::connect(leader_peer).await?;
        write_connection_info(&mut stream, &broker.config.self_client_ci()).await?;
        tokio::spawn(Broker::hold_peer_socket(stream));
        Ok(())
    }

    /// Resolves the owning broker's client-facing [`ConnectionInfo`] for
    /// `topic_name`, using this broker's own client CI plus whatever peers
    /// it currently knows about.
    ///
    /// A follower with an empty peer list falls out of
    /// [`hash::owner_index`] naturally returning index `peer_count` (i.e.
    /// `0`), which this function maps back to "self" — this quirk is not
    /// special-cased.
    pub async fn owner(&self, topic_name: &str) -> ConnectionInfo {
        let peers = self.peer_client_cis.read().await;
        let index = hash::owner_index(topic_name, peers.len());
        if index == peers.len() {
            self.config.self_client_ci()
        } else {
            peers[index]
        }
    }

    pub fn next_consumer_id(&self) -> u64 {
        self.next_consumer_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Orderly shutdown: stops both accept loops (closing their listening
    /// sockets) and cancels every manager-tracked consumer's push worker.
    /// Idempotent -- cancelling an already-cancelled token is a no-op.
    /// Existing in-flight request handlers finish on their own; this does
    /// not forcibly kill connections outside the manager's tracking.
    pub fn shutdown(&self) {
        warn!("broker shutting down");
        self.shutdown.cancel();
        self.manager.shutdown_all_consumers();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
