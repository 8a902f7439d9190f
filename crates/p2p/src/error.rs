use thiserror::Error;

use libp2p::gossipsub::{PublishError, SubscriptionError};
use libp2p::noise::Error as Libp2pNoiseError;
use libp2p::swarm::DialError;
use libp2p::TransportError;
pub(crate) use tokio::sync::oneshot::error::RecvError as OneshotRecvError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("client is not started")]
    NotStarted,
    #[error("client is already started")]
    AlreadyStarted,
    #[error("client is closed")]
    Closed,
    #[error("Failed to send command over channel")]
    ChannelSend,
    #[error("Failed to read from one-shot channel")]
    OneshotRecv(#[from] OneshotRecvError),
    #[error("Noise error")]
    Libp2pNoise(#[from] Libp2pNoiseError),
    #[error("Libp2p subscription error")]
    Libp2pSubscription(#[from] SubscriptionError),
    #[error("Failed to build behaviour")]
    Behaviour, // actual error is not exposed: https://github.com/libp2p/rust-libp2p/issues/4829
    #[error("multiaddr error")]
    Multiaddr(#[from] libp2p::multiaddr::Error),
    #[error("Libp2p transport error")]
    Libp2pTransport(#[from] TransportError<std::io::Error>),
    #[error("Libp2p dial error")]
    Libp2pDial(#[from] DialError),
    #[error("Libp2p publish error")]
    Libp2pPublish(#[from] PublishError),
    #[error("Network backend task failed to stop cleanly")]
    Join(#[from] tokio::task::JoinError),
}
