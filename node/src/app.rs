use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use eyre::Result;
use futures::pin_mut;
use p2p::{Client, P2pConfig};
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::key::{node_key, ConsensusKey};

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

#[derive(Parser)]
#[command(author, about = "LATTICE", long_about = None)]
pub struct App {
    /// Chain namespace this node participates in
    #[arg(long = "chain", value_name = "CHAIN_ID", default_value = "lattice-dev")]
    pub chain_id: String,

    /// Path to the consensus engine's node key file
    #[arg(long = "node-key")]
    pub node_key_path: Option<PathBuf>,

    #[arg(long, default_value_t = 7676)]
    pub p2p_port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    pub p2p_listen_addr: String,

    /// Comma-separated seed node multiaddrs
    #[arg(long, env = "LATTICE_SEEDS", default_value = "")]
    pub seeds: String,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(self.execute())?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = Level::from_str(
            std::env::var("RUST_LOG")
                .unwrap_or("info".to_string())
                .as_str(),
        )
        .unwrap();

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("node={rust_log_level},p2p={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer().with_target(true);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    async fn execute(self) -> Result<()> {
        let consensus_key = match &self.node_key_path {
            Some(path) => ConsensusKey::load(path)?,
            None => {
                warn!("no node key configured, generating an ephemeral identity");
                ConsensusKey::generate()
            }
        };
        let local_key = node_key(Some(&consensus_key))?;

        let conf = P2pConfig {
            listen_address: format!("/ip4/{}/tcp/{}", self.p2p_listen_addr, self.p2p_port),
            seeds: self.seeds.clone(),
            ..P2pConfig::default()
        };

        let mut client = Client::new(conf, local_key, self.chain_id.clone())?;
        client.set_tx_handler(|tx| {
            info!(size = tx.data.len(), source = ?tx.source, "received tx");
        });
        client.start().await?;
        info!(peer_id = %client.local_peer_id(), chain = %self.chain_id, "node started");

        wait_for_shutdown_signal().await?;

        client.close().await?;
        Ok(())
    }
}

// async code taken from reth, when we add more complexity we should adopt
// the task manager logic to handle thread spawning and graceful shutdown
pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn wait_for_shutdown_signal() -> Result<(), std::io::Error> {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
    }

    Ok(())
}
