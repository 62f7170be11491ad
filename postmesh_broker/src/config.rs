//! Broker startup configuration. Not part of the wire protocol; this is the
//! ambient "how do I even start" layer, driven by CLI flags or a properties
//! file without mandating any particular representation on the wire.

use postmesh_common::ConnectionInfo;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// The reference broker's default client-facing port.
pub const DEFAULT_CLIENT_PORT: u16 = 29621;
/// The reference broker's default peer-facing port.
pub const DEFAULT_PEER_PORT: u16 = 29622;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Directory the reference Topic-DAO persists into.
    pub broker_dir: PathBuf,
    /// Address this broker's client-facing listener binds to.
    pub client_bind: SocketAddr,
    /// Address this broker's peer-facing listener binds to.
    pub peer_bind: SocketAddr,
    /// When set, this broker is a follower that dials the given leader peer
    /// endpoint at startup. When `None`, this broker is the leader.
    pub leader_peer: Option<SocketAddr>,
}

impl BrokerConfig {
    pub fn leader(broker_dir: impl Into<PathBuf>, host: Ipv4Addr) -> Self {
        Self {
            broker_dir: broker_dir.into(),
            client_bind: SocketAddr::from((host, DEFAULT_CLIENT_PORT)),
            peer_bind: SocketAddr::from((host, DEFAULT_PEER_PORT)),
            leader_peer: None,
        }
    }

    pub fn follower(
        broker_dir: impl Into<PathBuf>,
        host: Ipv4Addr,
        leader_ip: Ipv4Addr,
        leader_peer_port: u16,
    ) -> Self {
        Self {
            broker_dir: broker_dir.into(),
            client_bind: SocketAddr::from((host, DEFAULT_CLIENT_PORT)),
            peer_bind: SocketAddr::from((host, DEFAULT_PEER_PORT)),
            leader_peer: Some(SocketAddr::from((leader_ip, leader_peer_port))),
        }
    }

    /// This broker's own client-facing [`ConnectionInfo`], as advertised to
    /// peers and returned from BROKER_DISCOVERY when this broker is the
    /// owner.
    pub fn self_client_ci(&self) -> ConnectionInfo {
        match self.client_bind {
            SocketAddr::V4(addr) => ConnectionInfo::from(addr),
            SocketAddr::V6(_) => {
                // ConnectionInfo is IPv4-only; binding to an IPv6 address
                // is a configuration error for this implementation.
                ConnectionInfo::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.client_bind.port()))
            }
        }
    }
}

/// Parses a simple `key=value` properties file into `ip`/`port` fields, the
/// `-f <path>` invocation form's grammar.
pub fn parse_properties_file(contents: &str) -> anyhow::Result<(Ipv4Addr, u16)> {
    let mut ip = None;
    let mut port = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "ip" => ip = Some(value.trim().parse::<Ipv4Addr>()?),
                "port" => port = Some(value.trim().parse::<u16>()?),
                _ => {}
            }
        }
    }
    let ip = ip.ok_or_else(|| anyhow::anyhow!("properties file missing 'ip='"))?;
    let port = port.ok_or_else(|| anyhow::anyhow!("properties file missing 'port='"))?;
    Ok((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_properties_file() {
        let (ip, port) = parse_properties_file("ip=127.0.0.1\nport=29622\n").unwrap();
        assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 29622);
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse_properties_file("ip=127.0.0.1\n").is_err());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let (ip, port) =
            parse_properties_file("# comment\n\nip=10.0.0.1\nport=1234\n").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(port, 1234);
    }
}
