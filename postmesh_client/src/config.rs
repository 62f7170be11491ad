//! Client startup configuration: CLI/properties-file parsing, mirrored from
//! `postmesh_broker::config`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// The reference broker's default client-facing port, used as the default
/// broker a fresh client talks to.
pub const DEFAULT_BROKER_PORT: u16 = 29621;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The broker this client's CI-manager queries on a cache miss.
    pub default_broker: SocketAddr,
    /// Root directory of this client's profile store.
    pub user_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(default_broker: SocketAddr, user_dir: impl Into<PathBuf>) -> Self {
        Self { default_broker, user_dir: user_dir.into() }
    }
}

/// Parses a simple `key=value` properties file into `ip`/`port` fields,
/// identical grammar to the broker's properties file.
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
        let (ip, port) = parse_properties_file("ip=127.0.0.1\nport=29621\n").unwrap();
        assert_eq!(ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 29621);
    }
}
