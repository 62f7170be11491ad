//! `postmesh-client` CLI entry point.
//!
//! ```text
//! client -c|-l <name> <ip> <port> <user_dir>
//! client -c|-l <name> -f <path> <user_dir>
//! ```
//!
//! `-c` creates a new profile named `<name>`; `-l` loads an existing one.
//! The profile directory lives under `<user_dir>`. Once started, this is an
//! interactive shell driving the [`postmesh_client::User`] facade.

use clap::Parser;
use postmesh_client::config::parse_properties_file;
use postmesh_client::{CiManager, ClientConfig, FileProfileStore, User};
use std::io::Write as _;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "postmesh-client", about = "postmesh client shell")]
struct Cli {
    /// Create a new profile instead of loading an existing one.
    #[arg(short = 'c', long, conflicts_with = "load")]
    create: Option<String>,

    /// Load an existing profile.
    #[arg(short = 'l', long, conflicts_with = "create")]
    load: Option<String>,

    /// Default broker's address.
    broker_ip: Option<Ipv4Addr>,
    /// Default broker's port.
    broker_port: Option<u16>,

    /// Read the default broker's `ip`/`port` from a properties file.
    #[arg(short = 'f', long = "file", conflicts_with_all = ["broker_ip", "broker_port"])]
    properties_file: Option<PathBuf>,

    /// Root directory holding this client's profile(s).
    user_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let (ip, port) = if let Some(path) = &cli.properties_file {
        let contents = std::fs::read_to_string(path)?;
        parse_properties_file(&contents)?
    } else if let (Some(ip), Some(port)) = (cli.broker_ip, cli.broker_port) {
        (ip, port)
    } else {
        anyhow::bail!("must supply either <ip> <port> or -f <properties file>");
    };

    let profile_name = cli
        .create
        .clone()
        .or_else(|| cli.load.clone())
        .ok_or_else(|| anyhow::anyhow!("must supply -c <name> or -l <name>"))?;

    std::fs::create_dir_all(&cli.user_dir)?;
    let config = ClientConfig::new(SocketAddr::from((ip, port)), cli.user_dir.clone());
    let ci_manager = Arc::new(CiManager::new(config.default_broker));
    let profile = Arc::new(FileProfileStore::new(&cli.user_dir));
    let user = User::new(config, ci_manager, profile);

    let mut events = user.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("{:?} {} success={}", event.tag, event.topic, event.success);
        }
    });

    user.switch_profile(profile_name, cli.create.is_some());

    run_shell(&user).await
}

/// Minimal line-oriented REPL: `post|create|delete|listen|stop|pull <topic> [...]`.
async fn run_shell(user: &Arc<User>) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let mut parts = line.trim().splitn(3, ' ');
        match parts.next() {
            Some("create") => {
                if let Some(topic) = parts.next() {
                    user.create_topic(topic);
                }
            }
            Some("delete") => {
                if let Some(topic) = parts.next() {
                    user.delete_topic(topic);
                }
            }
            Some("listen") => {
                if let Some(topic) = parts.next() {
                    user.listen_for_new_topic(topic);
                }
            }
            Some("stop") => {
                if let Some(topic) = parts.next() {
                    user.stop_listening_for_topic(topic);
                }
            }
            Some("post") => {
                if let (Some(topic), Some(rest)) = (parts.next(), parts.next()) {
                    user.post(topic, "cli", "txt", rest.as_bytes().to_vec());
                }
            }
            Some("pull") => {
                if let Some(topic) = parts.next() {
                    match user.pull(topic).await {
                        Ok(posts) => {
                            for post in posts {
                                println!("{}: {}", post.info.id, String::from_utf8_lossy(&post.data));
                            }
                        }
                        Err(e) => eprintln!("pull failed: {e}"),
                    }
                }
            }
            Some("quit") | Some("exit") => break,
            Some("") | None => {}
            Some(other) => eprintln!("unknown command: {other}"),
        }
    }
    Ok(())
}
