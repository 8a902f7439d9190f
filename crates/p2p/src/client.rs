//! Node-facing transport client.
//!
//! A [`Client`] is built without touching the network, started once (which
//! brings the host up, bootstraps discovery and joins the chain gossip
//! topic), and closed once. All network activity runs on a single backend
//! task; the client talks to it over a command channel.

use std::sync::{Arc, RwLock};

use libp2p::identity::Keypair;
use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::*;

use crate::backend::{Backend, Command};
use crate::behaviour::{rendezvous_key, tx_topic, Behaviour};
use crate::config::P2pConfig;
use crate::error::Error;
use crate::seeds::parse_seeds;

/// Opaque transaction payload delivered over the chain-scoped gossip topic.
#[derive(Debug, Clone)]
pub struct Tx {
    pub data: Vec<u8>,
    /// Mesh peer the payload propagated from, when the mesh exposes it.
    pub source: Option<PeerId>,
}

pub(crate) type TxHandler = Arc<dyn Fn(Tx) + Send + Sync>;
pub(crate) type HandlerSlot = Arc<RwLock<Option<TxHandler>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Closed,
}

pub struct Client {
    conf: P2pConfig,
    chain_id: String,
    local_key: Keypair,
    local_peer_id: PeerId,
    listen_addr: Multiaddr,
    state: State,
    handler: HandlerSlot,
    cmd_tx: Option<mpsc::Sender<Command>>,
    backend: Option<JoinHandle<()>>,
}

impl Client {
    /// Creates a client bound to `chain_id`. No network resources are
    /// allocated here; this fails only on configuration problems detectable
    /// eagerly, such as an unparseable listen address.
    pub fn new(conf: P2pConfig, local_key: Keypair, chain_id: String) -> Result<Self, Error> {
        let listen_addr: Multiaddr = conf.listen_address.parse()?;
        let local_peer_id = local_key.public().to_peer_id();
        Ok(Self {
            conf,
            chain_id,
            local_key,
            local_peer_id,
            listen_addr,
            state: State::Created,
            handler: Arc::new(RwLock::new(None)),
            cmd_tx: None,
            backend: None,
        })
    }

    /// Brings the host up, seeds the DHT, joins the chain topic and spawns
    /// the backend task. Returns once local initialization succeeded, without
    /// waiting for any seed to answer; unreachable seeds are logged and
    /// skipped.
    pub async fn start(&mut self) -> Result<(), Error> {
        match self.state {
            State::Created => {}
            State::Started => return Err(Error::AlreadyStarted),
            State::Closed => return Err(Error::Closed),
        }

        info!(chain_id = %self.chain_id, peer_id = %self.local_peer_id, "starting p2p client");

        let mut swarm = self.create_swarm()?;

        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&tx_topic(&self.chain_id))?;

        swarm.listen_on(self.listen_addr.clone())?;

        let seeds = parse_seeds(&self.conf.seeds);
        for err in &seeds.errors {
            error!(error = %err, "error while parsing seed node address");
        }
        for seed in &seeds.peers {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&seed.peer_id, seed.addr.clone());
            // best effort: an unreachable seed must not fail startup
            if let Err(err) = swarm.dial(seed.dial_addr()) {
                error!(peer = %seed.peer_id, error = %err, "error while dialing seed node");
            }
        }

        if let Err(err) = swarm
            .behaviour_mut()
            .kademlia
            .start_providing(rendezvous_key(&self.chain_id))
        {
            error!(error = %err, "error while advertising chain namespace");
        }
        if let Err(err) = swarm.behaviour_mut().kademlia.bootstrap() {
            // without seeds the table is empty; the periodic refresh retries
            debug!(error = %err, "dht bootstrap deferred");
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let backend = Backend::new(
            swarm,
            cmd_rx,
            tx_topic(&self.chain_id),
            rendezvous_key(&self.chain_id),
            self.handler.clone(),
            self.conf.discovery_interval,
        );
        self.backend = Some(tokio::spawn(backend.run()));
        self.cmd_tx = Some(cmd_tx);
        self.state = State::Started;
        Ok(())
    }

    /// Stops all background activity and releases the host and subsystem
    /// resources. Once this returns, no handler will be invoked anymore.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.state != State::Started {
            return Err(Error::NotStarted);
        }
        let (sender, receiver) = oneshot::channel();
        self.send(Command::Shutdown(sender)).await?;
        // acked only after the backend dropped the swarm
        receiver.await?;
        if let Some(handle) = self.backend.take() {
            handle.await?;
        }
        self.cmd_tx = None;
        self.state = State::Closed;
        info!(peer_id = %self.local_peer_id, "p2p client closed");
        Ok(())
    }

    /// Publishes `data` on the chain-scoped topic. Returns once the mesh has
    /// accepted the payload locally; delivery to remote peers is
    /// asynchronous and not confirmed. Publishing with zero connected topic
    /// peers fails with [`Error::Libp2pPublish`].
    pub async fn gossip_tx(&self, data: Vec<u8>) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::Publish(data, sender)).await?;
        let _message_id = receiver.await??;
        Ok(())
    }

    /// Registers the callback invoked once per payload received on the chain
    /// topic, replacing any previous handler for subsequent deliveries. With
    /// no handler registered, received payloads are dropped.
    pub fn set_tx_handler<F>(&self, handler: F)
    where
        F: Fn(Tx) + Send + Sync + 'static,
    {
        let mut slot = self
            .handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(handler));
    }

    /// Currently connected peers, across all chains.
    pub async fn peers(&self) -> Result<Vec<PeerId>, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::Peers(sender)).await?;
        receiver.await.map_err(Into::into)
    }

    /// Addresses the host is listening on. Empty until the listener is bound.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::ListenAddrs(sender)).await?;
        receiver.await.map_err(Into::into)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn send(&self, cmd: Command) -> Result<(), Error> {
        match (self.state, &self.cmd_tx) {
            (State::Started, Some(cmd_tx)) => {
                cmd_tx.send(cmd).await.map_err(|_| Error::ChannelSend)
            }
            _ => Err(Error::NotStarted),
        }
    }

    fn create_swarm(&self) -> Result<Swarm<Behaviour>, Error> {
        let conf = &self.conf;
        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.local_key.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_quic()
            .with_behaviour(|key| Behaviour::new(key, conf))
            .map_err(|_| Error::Behaviour)?
            .with_swarm_config(|c| {
                c.with_idle_connection_timeout(conf.idle_connection_timeout)
            })
            .build();
        Ok(swarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(chain_id: &str) -> Client {
        let conf = P2pConfig {
            listen_address: "/ip4/127.0.0.1/tcp/0".to_string(),
            ..P2pConfig::default()
        };
        Client::new(conf, Keypair::generate_ed25519(), chain_id.to_string())
            .expect("valid configuration")
    }

    #[tokio::test]
    async fn client_startup() {
        let mut client = test_client("test-chain");
        client.start().await.expect("start succeeds");
        client.close().await.expect("close succeeds");
    }

    #[test]
    fn invalid_listen_address_is_rejected_eagerly() {
        let conf = P2pConfig {
            listen_address: "127.0.0.1:7676".to_string(),
            ..P2pConfig::default()
        };
        let result = Client::new(conf, Keypair::generate_ed25519(), "test-chain".to_string());
        assert!(matches!(result, Err(Error::Multiaddr(_))));
    }

    #[tokio::test]
    async fn starting_twice_fails_fast() {
        let mut client = test_client("test-chain");
        client.start().await.expect("first start succeeds");
        assert!(matches!(client.start().await, Err(Error::AlreadyStarted)));
        client.close().await.expect("close succeeds");
    }

    #[tokio::test]
    async fn operations_before_start_fail_fast() {
        let mut client = test_client("test-chain");
        assert!(matches!(
            client.gossip_tx(b"tx".to_vec()).await,
            Err(Error::NotStarted)
        ));
        assert!(matches!(client.peers().await, Err(Error::NotStarted)));
        assert!(matches!(client.close().await, Err(Error::NotStarted)));
    }

    #[tokio::test]
    async fn operations_after_close_fail_fast() {
        let mut client = test_client("test-chain");
        client.start().await.expect("start succeeds");
        client.close().await.expect("close succeeds");
        assert!(matches!(
            client.gossip_tx(b"tx".to_vec()).await,
            Err(Error::NotStarted)
        ));
        assert!(matches!(client.start().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn publish_without_topic_peers_fails() {
        let mut client = test_client("lonely-chain");
        client.start().await.expect("start succeeds");
        // no peer ever subscribed to this chain's topic
        let result = client.gossip_tx(b"tx".to_vec()).await;
        assert!(matches!(result, Err(Error::Libp2pPublish(_))));
        client.close().await.expect("close succeeds");
    }

    #[tokio::test]
    async fn handler_can_be_registered_before_start() {
        let client = test_client("test-chain");
        client.set_tx_handler(|_tx| {});
        client.set_tx_handler(|_tx| {});
    }
}
