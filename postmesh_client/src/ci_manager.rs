//! Client-side CI-Manager: caches `topic -> ConnectionInfo` of the owning
//! broker, querying the default broker on a cache miss.

use dashmap::DashMap;
use log::trace;
use postmesh_codec::{read_connection_info, write_message, Message};
use postmesh_common::{ConnectionInfo, Result};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Never invalidated during a session: once a topic resolves to an owner,
/// this manager assumes that mapping holds for the session's lifetime. A
/// longer-lived process that needs fresher routing after cluster membership
/// changes must be restarted or construct a new `CiManager`.
pub struct CiManager {
    default_broker: SocketAddr,
    cache: DashMap<String, ConnectionInfo>,
}

impl CiManager {
    pub fn new(default_broker: SocketAddr) -> Self {
        Self { default_broker, cache: DashMap::new() }
    }

    /// Resolves the owning broker's client-facing [`ConnectionInfo`] for
    /// `topic`, issuing BROKER_DISCOVERY against the default broker on a
    /// cache miss.
    pub async fn resolve(&self, topic: &str) -> Result<ConnectionInfo> {
        if let Some(ci) = self.cache.get(topic) {
            return Ok(*ci);
        }
        trace!("CI-manager cache miss for {topic}, querying default broker");
        let mut stream = TcpStream::connect(self.default_broker).await?;
        write_message(&mut stream, &Message::broker_discovery(topic)).await?;
        let ci = read_connection_info(&mut stream).await?;
        self.cache.insert(topic.to_string(), ci);
        Ok(ci)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_empty() {
        let mgr = CiManager::new("127.0.0.1:29621".parse().unwrap());
        assert!(mgr.cache.is_empty());
    }
}
