//! Seed node address parsing.

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use thiserror::Error;

/// A remote node reachable for bootstrap: transport address plus peer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPeer {
    pub peer_id: PeerId,
    /// Transport part of the address, without the `/p2p/` suffix.
    pub addr: Multiaddr,
}

impl SeedPeer {
    /// Full dialable multiaddr, `/p2p/` suffix included.
    pub fn dial_addr(&self) -> Multiaddr {
        self.addr.clone().with(Protocol::P2p(self.peer_id))
    }
}

#[derive(Error, Debug)]
pub enum SeedParseError {
    #[error("empty seed entry")]
    EmptyEntry,
    #[error("malformed seed multiaddr {raw:?}: {source}")]
    InvalidMultiaddr {
        raw: String,
        source: libp2p::multiaddr::Error,
    },
    #[error("seed multiaddr {addr} does not embed a peer id")]
    MissingPeerId { addr: Multiaddr },
}

/// Outcome of parsing an operator-supplied seed list. Every entry that could
/// not be turned into a connectable [`SeedPeer`] is accounted for in `errors`.
#[derive(Debug, Default)]
pub struct ParsedSeeds {
    pub peers: Vec<SeedPeer>,
    pub errors: Vec<SeedParseError>,
}

/// Splits `raw` on commas and resolves each entry independently; a bad entry
/// never drops the remaining ones. Valid peers keep their input order and are
/// not deduplicated.
pub fn parse_seeds(raw: &str) -> ParsedSeeds {
    let mut parsed = ParsedSeeds::default();
    if raw.is_empty() {
        return parsed;
    }
    for entry in raw.split(',') {
        if entry.is_empty() {
            parsed.errors.push(SeedParseError::EmptyEntry);
            continue;
        }
        let addr: Multiaddr = match entry.parse() {
            Ok(addr) => addr,
            Err(source) => {
                parsed.errors.push(SeedParseError::InvalidMultiaddr {
                    raw: entry.to_string(),
                    source,
                });
                continue;
            }
        };
        match split_peer_id(&addr) {
            Some((peer_id, addr)) => parsed.peers.push(SeedPeer { peer_id, addr }),
            None => parsed.errors.push(SeedParseError::MissingPeerId { addr }),
        }
    }
    parsed
}

/// Extracts the peer id from a multiaddr, returning it next to the remaining
/// transport address.
fn split_peer_id(addr: &Multiaddr) -> Option<(PeerId, Multiaddr)> {
    let mut transport = Multiaddr::empty();
    let mut peer_id = None;
    for protocol in addr.iter() {
        match protocol {
            Protocol::P2p(id) => peer_id = Some(id),
            other => transport.push(other),
        }
    }
    peer_id.map(|id| (id, transport))
}
