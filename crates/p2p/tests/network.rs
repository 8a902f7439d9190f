//! Multi-node scenarios: routing-table bootstrap, chain-agnostic discovery
//! and chain-scoped gossip isolation, all over real sockets on localhost.

use std::time::Duration;

use libp2p::identity::Keypair;
use libp2p::Multiaddr;
use p2p::{Client, P2pConfig};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const CONVERGENCE_DEADLINE: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Topology entry for one node: indices of already-started nodes to seed
/// from, and the chain the node joins.
struct NodeSpec {
    seeds: &'static [usize],
    chain_id: &'static str,
}

fn node(seeds: &'static [usize], chain_id: &'static str) -> NodeSpec {
    NodeSpec { seeds, chain_id }
}

fn test_config(seeds: String) -> P2pConfig {
    P2pConfig {
        listen_address: "/ip4/127.0.0.1/tcp/0".to_string(),
        seeds,
        discovery_interval: Duration::from_secs(1),
        ..P2pConfig::default()
    }
}

/// Waits for the OS-assigned listener address of a started client.
async fn listen_addr(client: &Client) -> Multiaddr {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut addrs = client.listen_addrs().await.expect("client is started");
        if let Some(addr) = addrs.pop() {
            return addr;
        }
        assert!(Instant::now() < deadline, "node never started listening");
        sleep(POLL_INTERVAL).await;
    }
}

/// Starts nodes one by one, wiring each node's seed string from the listen
/// addresses of the already-started nodes it should bootstrap from.
async fn start_network(specs: &[NodeSpec]) -> Vec<Client> {
    let mut clients: Vec<Client> = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut seed_entries = Vec::new();
        for &i in spec.seeds {
            let addr = listen_addr(&clients[i]).await;
            seed_entries.push(format!("{}/p2p/{}", addr, clients[i].local_peer_id()));
        }
        let conf = test_config(seed_entries.join(","));
        let mut client = Client::new(
            conf,
            Keypair::generate_ed25519(),
            spec.chain_id.to_string(),
        )
        .expect("valid configuration");
        client.start().await.expect("client starts");
        clients.push(client);
    }
    clients
}

/// Polls until every client is connected to at least `expected` peers.
async fn wait_for_mesh(clients: &[Client], expected: usize) {
    let deadline = Instant::now() + CONVERGENCE_DEADLINE;
    'poll: loop {
        for client in clients {
            let peers = client.peers().await.expect("client is started");
            if peers.len() < expected {
                assert!(
                    Instant::now() < deadline,
                    "routing tables never converged: {} has {} of {} peers",
                    client.local_peer_id(),
                    peers.len(),
                    expected,
                );
                sleep(POLL_INTERVAL).await;
                continue 'poll;
            }
        }
        return;
    }
}

async fn close_all(clients: Vec<Client>) {
    for mut client in clients {
        client.close().await.expect("clean close");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrapping() {
    let clients = start_network(&[
        node(&[], "bootstrap-net"),
        node(&[0], "bootstrap-net"),
        node(&[0, 1], "bootstrap-net"),
        node(&[0], "bootstrap-net"),
    ])
    .await;

    // wait for clients to finish refreshing routing tables
    wait_for_mesh(&clients, 3).await;

    for client in &clients {
        assert_eq!(client.peers().await.expect("client is started").len(), 3);
    }

    close_all(clients).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_crosses_chain_boundaries() {
    // the two "beta" nodes only seed through "alpha" nodes, yet still find
    // and connect to each other; overlay connectivity is chain-agnostic
    let clients = start_network(&[
        node(&[], "alpha"),
        node(&[0], "alpha"),
        node(&[0], "alpha"),
        node(&[1], "beta"),
        node(&[2], "beta"),
    ])
    .await;

    let deadline = Instant::now() + CONVERGENCE_DEADLINE;
    loop {
        let peers3 = clients[3].peers().await.expect("client is started");
        let peers4 = clients[4].peers().await.expect("client is started");
        if peers3.contains(&clients[4].local_peer_id())
            && peers4.contains(&clients[3].local_peer_id())
        {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "beta nodes never discovered each other"
        );
        sleep(POLL_INTERVAL).await;
    }

    close_all(clients).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn gossip_stays_within_chain() {
    // connection topology: 3<->1<->0<->2<->4, with chain "one" nodes
    // bridging the chain "two" nodes
    let clients = start_network(&[
        node(&[], "two"),
        node(&[0], "one"),
        node(&[0], "one"),
        node(&[1], "two"),
        node(&[2], "two"),
    ])
    .await;

    // wait for clients to finish refreshing routing tables
    wait_for_mesh(&clients, 4).await;

    let payload = b"foobar".to_vec();

    // chain "two" nodes other than the publisher must receive the payload
    let (got_tx, mut got_rx) = mpsc::unbounded_channel();
    for i in [0, 3] {
        let got_tx = got_tx.clone();
        clients[i].set_tx_handler(move |tx| {
            let _ = got_tx.send(tx.data);
        });
    }

    // chain "one" nodes and the publisher itself must not
    let (leak_tx, mut leak_rx) = mpsc::unbounded_channel();
    for i in [1, 2, 4] {
        let leak_tx = leak_tx.clone();
        clients[i].set_tx_handler(move |tx| {
            let _ = leak_tx.send(tx.data);
        });
    }

    // subscription information propagates with the mesh heartbeat
    sleep(Duration::from_secs(2)).await;

    clients[4]
        .gossip_tx(payload.clone())
        .await
        .expect("publish accepted");

    for _ in 0..2 {
        let received = timeout(Duration::from_secs(10), got_rx.recv())
            .await
            .expect("tx delivered within deadline")
            .expect("handler channel open");
        assert_eq!(received, payload);
    }

    // no duplicate same-chain delivery, no cross-chain delivery
    sleep(Duration::from_secs(1)).await;
    assert!(got_rx.try_recv().is_err());
    assert!(leak_rx.try_recv().is_err());

    close_all(clients).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn close_stops_dispatch() {
    let clients = start_network(&[node(&[], "quiet"), node(&[0], "quiet")]).await;
    wait_for_mesh(&clients, 1).await;

    let (got_tx, mut got_rx) = mpsc::unbounded_channel();
    clients[1].set_tx_handler(move |tx| {
        let _ = got_tx.send(tx.data);
    });

    sleep(Duration::from_secs(2)).await;

    clients[0]
        .gossip_tx(b"before close".to_vec())
        .await
        .expect("publish accepted");
    timeout(Duration::from_secs(10), got_rx.recv())
        .await
        .expect("tx delivered within deadline")
        .expect("handler channel open");

    let mut clients = clients;
    let mut receiver = clients.remove(1);
    receiver.close().await.expect("clean close");

    // the mesh may or may not still accept the publish locally; either way
    // the closed client must not dispatch anything anymore
    let _ = clients[0].gossip_tx(b"after close".to_vec()).await;
    sleep(Duration::from_secs(2)).await;
    assert!(got_rx.try_recv().is_err());

    close_all(clients).await;
}
