//! `postmesh-server` CLI entry point.
//!
//! ```text
//! server <broker_dir>                    start a leader on 0.0.0.0, default ports
//! server <broker_dir> <ip> <port>         start a follower, dialing <ip>:<port>
//! server <broker_dir> -f <properties>     same, reading ip/port from a file
//! ```

use clap::Parser;
use log::error;
use postmesh_broker::{config::parse_properties_file, Broker, BrokerConfig};
use postmesh_store::FileTopicDao;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "postmesh-server", about = "postmesh broker node")]
struct Cli {
    /// Directory this broker persists its topics into.
    broker_dir: PathBuf,

    /// Leader's peer-facing address to join, e.g. 10.0.0.1.
    leader_ip: Option<Ipv4Addr>,

    /// Leader's peer-facing port to join.
    leader_port: Option<u16>,

    /// Read `ip`/`port` for the leader to join from a properties file
    /// instead of positional arguments.
    #[arg(short = 'f', long = "file", conflicts_with_all = ["leader_ip", "leader_port"])]
    properties_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = if let Some(path) = &cli.properties_file {
        let contents = std::fs::read_to_string(path)?;
        let (ip, port) = parse_properties_file(&contents)?;
        BrokerConfig::follower(cli.broker_dir.clone(), Ipv4Addr::UNSPECIFIED, ip, port)
    } else if let (Some(ip), Some(port)) = (cli.leader_ip, cli.leader_port) {
        BrokerConfig::follower(cli.broker_dir.clone(), Ipv4Addr::UNSPECIFIED, ip, port)
    } else {
        BrokerConfig::leader(cli.broker_dir.clone(), Ipv4Addr::UNSPECIFIED)
    };

    std::fs::create_dir_all(&config.broker_dir)?;
    let dao = Arc::new(FileTopicDao::new(&config.broker_dir));

    let broker = Broker::start(config, dao).await;
    match broker {
        Ok(_broker) => {
            // Accept loops run forever on their own spawned tasks; block
            // the main task so the process stays alive.
            std::future::pending::<()>().await;
        }
        Err(e) => {
            error!("failed to start broker: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
