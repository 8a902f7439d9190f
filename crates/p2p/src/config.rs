//! P2P client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport configuration handed to [`crate::Client::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Multiaddr the host listens on.
    pub listen_address: String,
    /// Comma-separated seed node multiaddrs, each embedding a `/p2p/` peer id.
    pub seeds: String,
    /// How often the DHT view of reachable peers is refreshed.
    pub discovery_interval: Duration,
    pub dht_query_timeout: Duration,
    pub gossip_heartbeat: Duration,
    pub max_message_size: usize,
    pub idle_connection_timeout: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_address: "/ip4/0.0.0.0/tcp/7676".to_string(),
            seeds: String::new(),
            discovery_interval: Duration::from_secs(60),
            dht_query_timeout: Duration::from_secs(60),
            gossip_heartbeat: Duration::from_secs(1),
            max_message_size: 1024 * 1024,
            idle_connection_timeout: Duration::from_secs(180),
        }
    }
}
