//! Swarm event loop backing a started [`crate::Client`]: drives connection
//! acceptance, gossip dispatch, DHT refresh and command handling until the
//! client is closed.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::SwarmEvent;
use libp2p::{gossipsub, identify, kad, Multiaddr, PeerId, Swarm};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::*;

use crate::behaviour::{Behaviour, BehaviourEvent};
use crate::client::{HandlerSlot, Tx};

pub(crate) enum Command {
    Publish(
        Vec<u8>,
        oneshot::Sender<Result<gossipsub::MessageId, gossipsub::PublishError>>,
    ),
    Peers(oneshot::Sender<Vec<PeerId>>),
    ListenAddrs(oneshot::Sender<Vec<Multiaddr>>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct Backend {
    swarm: Swarm<Behaviour>,
    cmd_rx: mpsc::Receiver<Command>,
    topic: gossipsub::IdentTopic,
    rendezvous: kad::RecordKey,
    handler: HandlerSlot,
    discovery_interval: Duration,
    peers: HashSet<PeerId>,
    listen_addrs: Vec<Multiaddr>,
}

impl Backend {
    pub(crate) fn new(
        swarm: Swarm<Behaviour>,
        cmd_rx: mpsc::Receiver<Command>,
        topic: gossipsub::IdentTopic,
        rendezvous: kad::RecordKey,
        handler: HandlerSlot,
        discovery_interval: Duration,
    ) -> Self {
        Self {
            swarm,
            cmd_rx,
            topic,
            rendezvous,
            handler,
            discovery_interval,
            peers: HashSet::new(),
            listen_addrs: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.discovery_interval);
        let mut shutdown_ack = None;

        loop {
            select! {
                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    Some(Command::Publish(data, response)) => {
                        let result = self
                            .swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(self.topic.clone(), data);
                        // if sending the response fails, there is nothing we can do, so ignore
                        let _ = response.send(result);
                    }
                    Some(Command::Peers(response)) => {
                        let _ = response.send(self.peers.iter().copied().collect());
                    }
                    Some(Command::ListenAddrs(response)) => {
                        let _ = response.send(self.listen_addrs.clone());
                    }
                    Some(Command::Shutdown(response)) => {
                        shutdown_ack = Some(response);
                        break;
                    }
                    None => {
                        // client was dropped without close, stop anyway
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                _ = refresh.tick() => self.refresh_discovery(),
            }
        }

        // release the host and subsystems before acknowledging, so a returned
        // close() means no background task can touch them anymore
        drop(self.swarm);
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message_id,
                message,
            })) => {
                trace!(peer = %propagation_source, id = %message_id, "gossip message received");
                self.dispatch_tx(Tx {
                    data: message.data,
                    source: message.source,
                });
            }
            SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) => {
                debug!(peer = %peer_id, %topic, "peer subscribed");
            }
            SwarmEvent::Behaviour(BehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                // the routing table only learns dialable addresses through identify
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            SwarmEvent::Behaviour(BehaviourEvent::Kademlia(event)) => {
                self.handle_kademlia_event(event)
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "connection established");
                self.peers.insert(peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(peer = %peer_id, ?cause, "connection closed");
                if num_established == 0 {
                    self.peers.remove(&peer_id);
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(%address, "local node is listening");
                self.listen_addrs.push(address);
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                error!(peer = ?peer_id, %error, "outgoing connection failed");
            }
            event => {
                trace!(?event, "unhandled swarm event");
            }
        }
    }

    fn handle_kademlia_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                result:
                    kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                        providers,
                        ..
                    })),
                ..
            } => {
                for peer in providers {
                    if peer == *self.swarm.local_peer_id() || self.peers.contains(&peer) {
                        continue;
                    }
                    debug!(%peer, "discovered chain peer, dialing");
                    if let Err(err) = self.swarm.dial(DialOpts::peer_id(peer).build()) {
                        debug!(%peer, error = %err, "error while dialing discovered peer");
                    }
                }
            }
            kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(result),
                ..
            } => {
                trace!(?result, "dht bootstrap step");
            }
            kad::Event::RoutingUpdated { peer, .. } => {
                trace!(%peer, "dht routing table updated");
            }
            event => {
                trace!(?event, "dht event");
            }
        }
    }

    /// Re-runs the DHT bootstrap and looks up peers advertising this chain.
    /// There is no completion signal; convergence is observed through
    /// [`Command::Peers`].
    fn refresh_discovery(&mut self) {
        if let Err(err) = self.swarm.behaviour_mut().kademlia.bootstrap() {
            debug!(error = %err, "dht bootstrap skipped");
        }
        self.swarm
            .behaviour_mut()
            .kademlia
            .get_providers(self.rendezvous.clone());
    }

    fn dispatch_tx(&self, tx: Tx) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(tx),
            // payloads received with no handler registered are dropped, not queued
            None => debug!("no tx handler registered, dropping payload"),
        }
    }
}
