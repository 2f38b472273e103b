//! Huddle binary: run the rendezvous directory, or create/join/list
//! meetings as a client.
//!
//! The client subcommands talk to the directory once, then run the
//! matching overlay node until interrupted. There is no interactive
//! shell; everything observable goes through the log.

use anyhow::Context;
use clap::{Parser, Subcommand};
use huddle_directory::{Directory, DirectoryClient, DirectoryServer};
use huddle_overlay::{mesh, star, Moderation, OverlayNode};
use huddle_session::ListenerConfig;
use huddle_wire::Topology;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::HuddleConfig;
use logging::HuddleLogFormatter;

/// Meeting rendezvous directory and P2P overlay node
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about = "Meeting rendezvous directory and P2P overlay node")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "huddle.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory address, e.g. 127.0.0.1:2000 (overrides the config file)
    #[arg(long)]
    directory: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rendezvous directory service
    Directory {
        /// Bind address; defaults to 0.0.0.0 on the configured port
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Close idle client connections after this long, e.g. 10m
        #[arg(long)]
        client_keep_alive: Option<humantime::Duration>,
    },
    /// List ongoing meetings
    List,
    /// Create a meeting and host its overlay until interrupted
    Create {
        /// Meeting topology: star or mesh
        #[arg(long, default_value = "star")]
        topology: String,
    },
    /// Join a meeting and stay connected until interrupted
    Join {
        /// ID of the meeting to join
        #[arg(long)]
        meeting: u64,

        /// Display name to claim in the meeting
        #[arg(long)]
        username: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("huddle={}", args.log_level).parse()?)
        .add_directive(format!("huddle_wire={}", args.log_level).parse()?)
        .add_directive(format!("huddle_session={}", args.log_level).parse()?)
        .add_directive(format!("huddle_directory={}", args.log_level).parse()?)
        .add_directive(format!("huddle_overlay={}", args.log_level).parse()?);

    let formatter = HuddleLogFormatter::new("huddle".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting huddle v{}", env!("CARGO_PKG_VERSION"));

    let cfg = HuddleConfig::load_from_file(&args.config)?;

    match args.command {
        Command::Directory {
            bind,
            client_keep_alive,
        } => {
            let bind = bind.unwrap_or(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                cfg.directory_port,
            ));
            let listener_config = ListenerConfig {
                keep_alive: client_keep_alive.map(Duration::from),
            };

            let directory = Arc::new(Directory::new(cfg.base_p2p_port));
            let server = DirectoryServer::bind_with(bind, directory, listener_config).await?;
            component_info!("directory", "Ready on {}", server.local_addr());

            tokio::signal::ctrl_c().await?;
            info!("Interrupted; shutting down");
            server.shutdown().await;
        }

        Command::List => {
            let mut client = DirectoryClient::connect(directory_addr(&args.directory, &cfg)?).await?;
            let listing = client.list().await?;
            if listing.is_empty() {
                info!("No ongoing meetings");
            }
            for (meeting_id, topology) in listing {
                info!("meeting {} ({})", meeting_id, topology);
            }
        }

        Command::Create { topology } => {
            let topology: Topology = topology
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;

            // the control connection must outlive the meeting: the
            // directory probes it to decide the room is still alive
            let mut client = DirectoryClient::connect(directory_addr(&args.directory, &cfg)?).await?;
            let grant = client.create(topology).await?;
            component_info!(
                "overlay",
                "Created {} meeting {} on port {}",
                grant.meeting_type,
                grant.meeting_id,
                grant.listen_port
            );

            let node = match topology {
                Topology::Star => {
                    let moderation = Moderation {
                        banned_words: cfg.banned_words.clone(),
                        max_warnings: cfg.max_warnings,
                    };
                    star::spawn_host(grant.meeting_id, grant.listen_port, moderation).await?
                }
                Topology::Mesh => mesh::create(grant.meeting_id, grant.listen_port).await?,
            };

            wait_and_shutdown(&node).await?;
        }

        Command::Join { meeting, username } => {
            let mut client = DirectoryClient::connect(directory_addr(&args.directory, &cfg)?).await?;
            let grant = client.join(meeting, &username).await?;
            component_info!(
                "overlay",
                "Joining {} meeting {} as '{}'",
                grant.meeting_type,
                meeting,
                grant.username
            );

            match grant.meeting_type {
                Topology::Star => {
                    let audience = star::StarAudience::join(&grant.username, grant.host).await?;
                    tokio::signal::ctrl_c().await?;
                    info!("Interrupted; leaving meeting");
                    audience.shutdown().await;
                }
                Topology::Mesh => {
                    let listen_port = grant
                        .listen_port
                        .context("directory did not assign a listen port for the mesh")?;
                    let node = mesh::join(&grant.username, grant.host, listen_port).await?;
                    wait_and_shutdown(&node).await?;
                }
            }
        }
    }

    Ok(())
}

fn directory_addr(flag: &Option<SocketAddr>, cfg: &HuddleConfig) -> anyhow::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    if let Some(addr) = flag {
        return Ok(*addr);
    }
    let target = format!("{}:{}", cfg.directory_host, cfg.directory_port);
    target
        .to_socket_addrs()?
        .next()
        .with_context(|| format!("could not resolve directory address '{target}'"))
}

async fn wait_and_shutdown(node: &Arc<OverlayNode>) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupted; leaving meeting");
    node.shutdown().await;
    Ok(())
}
