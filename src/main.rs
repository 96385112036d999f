// vote-node - Run one node of the voting network

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use votechain::node::{init_logging, router, LogFormat, NodeConfig, VoteNode};
use votechain::sync::HttpPeerClient;

#[derive(Parser)]
#[command(name = "vote-node", about = "Proof-of-work vote ledger node")]
struct Args {
    /// TOML config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the HTTP API binds to
    #[arg(long, env = "VOTE_NODE_LISTEN")]
    listen: Option<String>,

    /// URL other nodes use to reach this one
    #[arg(long, env = "VOTE_NODE_PUBLIC_URL")]
    public_url: Option<String>,

    /// Directory for the persistent chain store (in-memory when omitted)
    #[arg(long, env = "VOTE_NODE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Peer to register at startup (repeatable, or comma-separated)
    #[arg(long = "peer", value_delimiter = ',')]
    peers: Vec<String>,

    /// Per-peer request timeout in seconds
    #[arg(long)]
    peer_timeout: Option<u64>,

    /// Abort a mining run after this many seconds
    #[arg(long)]
    mining_timeout: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(listen) = self.listen {
            config = config.with_listen_addr(listen);
        }
        if let Some(url) = self.public_url {
            config = config.with_public_url(url);
        }
        if let Some(dir) = self.data_dir {
            config = config.with_data_dir(dir);
        }
        for peer in self.peers {
            config = config.with_bootstrap_peer(peer);
        }
        if let Some(secs) = self.peer_timeout {
            config = config.with_peer_timeout(secs);
        }
        if let Some(secs) = self.mining_timeout {
            config = config.with_mining_timeout(secs);
        }
        if let Some(level) = self.log_level {
            config = config.with_log_level(level);
        }
        if self.json_logs {
            config = config.with_json_logs(true);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    init_logging(LogFormat::from_json_flag(config.json_logs), &config.log_level);

    let client = HttpPeerClient::new(config.peer_timeout())?;
    let node = Arc::new(VoteNode::new(config.clone(), Arc::new(client))?);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        addr = %config.listen_addr,
        url = %config.advertised_url(),
        peers = node.peers().len(),
        "vote node listening"
    );

    let app = router(Arc::clone(&node));
    let signal_node = Arc::clone(&node);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
            tracing::info!("received SIGINT, shutting down");
            signal_node.shutdown();
        })
        .await?;

    Ok(())
}
