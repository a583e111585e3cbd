use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use wasp_common::Address;
use wasp_peering::{MessageRouter, PeerMessage, PeerNetwork, PeeringConfig, PeeringManager};

fn allocate_port() -> Option<u16> {
    let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(err) => panic!("bind: {err}"),
    };
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    Some(addr.port())
}

struct ChannelRouter(mpsc::UnboundedSender<(String, PeerMessage)>);

impl MessageRouter for ChannelRouter {
    fn route(&self, from: &str, message: PeerMessage) {
        let _ = self.0.send((from.to_string(), message));
    }
}

fn config(port: u16) -> PeeringConfig {
    PeeringConfig {
        listen_addr: format!("127.0.0.1:{port}"),
        my_location: format!("127.0.0.1:{port}"),
        heartbeat_interval: Duration::from_millis(100),
        dead_after: Duration::from_secs(2),
        connect_retry: Duration::from_millis(100),
        ..PeeringConfig::default()
    }
}

async fn wait_alive(manager: &PeeringManager, location: &str) -> bool {
    timeout(Duration::from_secs(5), async {
        while !manager.is_alive(location) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_two_nodes_exchange_committee_messages() {
    let Some(port_a) = allocate_port() else {
        eprintln!("skipping test: tcp bind not permitted in this environment");
        return;
    };
    let Some(port_b) = allocate_port() else {
        eprintln!("skipping test: tcp bind not permitted in this environment");
        return;
    };

    let a = PeeringManager::new(config(port_a));
    let b = PeeringManager::new(config(port_b));
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    a.set_router(Arc::new(ChannelRouter(tx_a)));
    b.set_router(Arc::new(ChannelRouter(tx_b)));

    a.start().await.expect("start a");
    b.start().await.expect("start b");

    let loc_a = a.my_location().to_string();
    let loc_b = b.my_location().to_string();
    a.use_peer(&loc_b);
    b.use_peer(&loc_a);

    assert!(wait_alive(&a, &loc_b).await, "a never saw b");
    assert!(wait_alive(&b, &loc_a).await, "b never saw a");
    assert_eq!(a.connected_count(), 1);

    let contract = Address::from_key_material(b"sc");
    let msg = PeerMessage::committee(contract, 0x11, 2, b"payload".to_vec());
    a.send(&loc_b, &msg).expect("send a->b");

    let (from, received) = timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(from, loc_a);
    assert_eq!(received, msg);

    let reply = PeerMessage::committee(contract, 0x12, 0, vec![]);
    b.send(&loc_a, &reply).expect("send b->a");
    let (from, received) = timeout(Duration::from_secs(5), rx_a.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(from, loc_b);
    assert_eq!(received.msg_type, 0x12);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_unused_peer_is_never_alive() {
    let Some(port_a) = allocate_port() else {
        eprintln!("skipping test: tcp bind not permitted in this environment");
        return;
    };
    let Some(port_b) = allocate_port() else {
        eprintln!("skipping test: tcp bind not permitted in this environment");
        return;
    };

    let a = PeeringManager::new(config(port_a));
    a.start().await.expect("start a");
    let loc_b = format!("127.0.0.1:{port_b}");
    a.use_peer(&loc_b);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!a.is_alive(&loc_b));
    assert!(a.send(&loc_b, &PeerMessage::heartbeat()).is_err());
    a.shutdown().await;
}
