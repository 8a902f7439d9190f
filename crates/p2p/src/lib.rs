//! Chain-scoped peer-to-peer transport for lattice nodes.
//!
//! The [`Client`] owns the libp2p host and its identity, keeps the node
//! discoverable through the Kademlia DHT, and broadcasts opaque transaction
//! payloads over a gossipsub topic derived from the chain id. Nodes of other
//! chains may share overlay connections with us; the topic name is the only
//! delivery boundary.

mod backend;
mod behaviour;
mod client;
mod config;
mod error;
mod seeds;

pub use client::{Client, Tx};
pub use config::P2pConfig;
pub use error::Error;
pub use seeds::{parse_seeds, ParsedSeeds, SeedParseError, SeedPeer};
