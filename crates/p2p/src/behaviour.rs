//! libp2p behaviour composition for the transport client: gossipsub for
//! chain-scoped broadcast, Kademlia for discovery, identify and ping as
//! supporting protocols.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;

use libp2p::identity::Keypair;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{gossipsub, identify, kad, ping};

use crate::config::P2pConfig;

const IDENTIFY_PROTOCOL: &str = "/lattice/id/1.0.0";

/// Gossip topic for transaction payloads. Two nodes exchange payloads iff
/// their chain ids are equal strings; any peer that knows the chain id can
/// join, there is no cryptographic separation.
pub(crate) fn tx_topic(chain_id: &str) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("{chain_id}.tx"))
}

/// DHT rendezvous key nodes of one chain advertise and look each other up
/// under. Routing-table connectivity itself stays chain-agnostic.
pub(crate) fn rendezvous_key(chain_id: &str) -> kad::RecordKey {
    kad::RecordKey::new(&format!("/lattice/{chain_id}"))
}

#[derive(NetworkBehaviour)]
pub(crate) struct Behaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Content-addressed message id, so two messages with the same payload are
/// propagated only once.
fn message_id_fn(message: &gossipsub::Message) -> gossipsub::MessageId {
    let mut s = DefaultHasher::new();
    message.data.hash(&mut s);
    gossipsub::MessageId::from(s.finish().to_string())
}

impl Behaviour {
    pub(crate) fn new(
        key: &Keypair,
        conf: &P2pConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(conf.gossip_heartbeat)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .max_transmit_size(conf.max_message_size)
            .message_id_fn(message_id_fn)
            .build()
            .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))?; // Temporary hack because `build` does not return a proper `std::error::Error`.

        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(key.clone()),
            gossipsub_config,
        )
        .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))?;

        let local_peer_id = key.public().to_peer_id();
        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kad_config = kad::Config::default();
        kad_config.set_query_timeout(conf.dht_query_timeout);
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        // auto mode keeps the DHT client-only until an external address is
        // confirmed, which never happens on a private network
        kademlia.set_mode(Some(kad::Mode::Server));

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            key.public(),
        ));

        let ping = ping::Behaviour::new(ping::Config::new());

        Ok(Self {
            gossipsub,
            kademlia,
            identify,
            ping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::PeerId;

    #[test]
    fn behaviour_creation() {
        let key = Keypair::generate_ed25519();
        let behaviour = Behaviour::new(&key, &P2pConfig::default());
        assert!(behaviour.is_ok());
    }

    #[test]
    fn topics_are_chain_scoped() {
        assert_eq!(tx_topic("gm").hash(), tx_topic("gm").hash());
        assert_ne!(tx_topic("gm").hash(), tx_topic("gm2").hash());
        assert_ne!(rendezvous_key("gm"), rendezvous_key("gm2"));
    }

    #[test]
    fn message_id_is_content_derived() {
        let message = |source| gossipsub::Message {
            source,
            data: b"test message".to_vec(),
            sequence_number: Some(123),
            topic: gossipsub::TopicHash::from_raw("test_topic"),
        };

        // same payload, different envelope: same id
        let id1 = message_id_fn(&message(Some(PeerId::random())));
        let id2 = message_id_fn(&message(None));
        assert_eq!(id1, id2);
    }
}
