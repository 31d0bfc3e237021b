//! VeilMesh Node Daemon
//!
//! Runs one anonymous overlay node: joins the DHT through the given
//! seeds, relays onion envelopes, and prints payloads that exit their
//! circuit here.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use veilmesh_overlay::{
    ChannelSink, MeshConfig, MeshRole, OverlayConfig, OverlayEvent, OverlayNode,
};

/// VeilMesh - anonymous peer-to-peer overlay node
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// UDP and TCP bind port
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// DHT seed endpoints (comma-separated host:port)
    #[arg(short, long)]
    bootstrap: Option<String>,

    /// Number of relay hops per circuit
    #[arg(long, default_value = "3")]
    hops: usize,

    /// Disable cover traffic
    #[arg(long)]
    no_cover_traffic: bool,

    /// Run as a structured-mesh supernode
    #[arg(long)]
    supernode: bool,

    /// Supernodes to attach to as a leaf (comma-separated host:port)
    #[arg(long)]
    supernodes: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_endpoints(list: &str) -> Result<Vec<SocketAddr>> {
    list.split(',')
        .map(|s| {
            s.trim()
                .parse()
                .with_context(|| format!("invalid endpoint: {s}"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mesh = if args.supernode {
        MeshConfig::Structured {
            role: MeshRole::Supernode,
            supernode_list: vec![],
        }
    } else if let Some(list) = &args.supernodes {
        MeshConfig::Structured {
            role: MeshRole::Leaf,
            supernode_list: parse_endpoints(list)?,
        }
    } else {
        OverlayConfig::default().mesh
    };

    let config = OverlayConfig {
        port: args.port,
        circuit_length: args.hops,
        cover_traffic_enabled: !args.no_cover_traffic,
        mesh,
        ..Default::default()
    };

    let (sink, mut events) = ChannelSink::new();
    let node = OverlayNode::start(config, sink).await?;

    info!("node id: {}", node.node_id());
    info!("pseudonym: {}", node.identity().pseudonym());

    if let Some(list) = &args.bootstrap {
        let seeds = parse_endpoints(list)?;
        let reached = node.dht().bootstrap(&seeds).await;
        info!("joined DHT through {}/{} seeds", reached, seeds.len());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                node.shutdown();
                break;
            }
            event = events.recv() => {
                match event {
                    Some(OverlayEvent::AnonymousMessage(payload)) => {
                        info!("anonymous message: {}", payload);
                    }
                    Some(OverlayEvent::PeerConnected(peer_id)) => {
                        info!("peer connected: {}", peer_id);
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}
