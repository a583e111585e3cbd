//! PeeringManager: the node-wide connection pool.
//!
//! Handles:
//! - Accepting incoming connections
//! - Dialing pooled peers whose location sorts above ours
//! - Heartbeats and liveness
//! - Routing committee messages to the [`MessageRouter`]

use crate::message::{read_frame, write_frame, PeerMessage, MSG_HANDSHAKE, MSG_HEARTBEAT};
use crate::network::{MessageRouter, PeerNetwork};
use crate::peer::{ConnectionDirection, Peer, PeerInfo, PeerState};
use crate::{PeeringError, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Peering settings.
#[derive(Debug, Clone)]
pub struct PeeringConfig {
    /// Socket address to listen on.
    pub listen_addr: String,
    /// `host:port` other nodes know this node by.
    pub my_location: String,
    pub heartbeat_interval: Duration,
    /// A peer not heard from for this long counts as dead.
    pub dead_after: Duration,
    pub connect_retry: Duration,
    pub handshake_timeout: Duration,
    /// Outgoing messages buffered per connection before sends fail.
    pub send_queue_size: usize,
    pub max_frame_size: usize,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4000".to_string(),
            my_location: "127.0.0.1:4000".to_string(),
            heartbeat_interval: Duration::from_secs(1),
            dead_after: Duration::from_secs(5),
            connect_retry: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            send_queue_size: 1024,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

struct Shared {
    config: PeeringConfig,
    peers: DashMap<String, Arc<Peer>>,
    router: RwLock<Option<Arc<dyn MessageRouter>>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Manager for all peer connections.
pub struct PeeringManager {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PeeringManager {
    pub fn new(config: PeeringConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                config,
                peers: DashMap::new(),
                router: RwLock::new(None),
                running: AtomicBool::new(false),
                shutdown_tx,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PeeringConfig {
        &self.shared.config
    }

    /// Where inbound committee messages go.
    pub fn set_router(&self, router: Arc<dyn MessageRouter>) {
        *self.shared.router.write() = Some(router);
    }

    pub async fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(PeeringError::AlreadyStarted);
        }
        let listener = TcpListener::bind(&self.shared.config.listen_addr).await?;
        info!(
            listen = %self.shared.config.listen_addr,
            location = %self.shared.config.my_location,
            "Peering started"
        );

        let mut handles = self.handles.lock();
        handles.push(Self::start_listener(self.shared.clone(), listener));
        handles.push(Self::start_connector(self.shared.clone()));
        handles.push(Self::start_heartbeat(self.shared.clone()));
        Ok(())
    }

    fn start_listener(shared: Arc<Shared>, listener: TcpListener) -> JoinHandle<()> {
        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote)) => {
                                trace!(%remote, "Accepted connection");
                                let shared = shared.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = run_connection(shared, stream, ConnectionDirection::Inbound, None).await {
                                        debug!(%remote, error = %e, "Inbound connection ended");
                                    }
                                });
                            }
                            Err(e) => {
                                error!(error = %e, "Accept error");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Listener shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn start_connector(shared: Arc<Shared>) -> JoinHandle<()> {
        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.connect_retry);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Connector shutting down");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                let my_location = shared.config.my_location.as_str();
                let to_dial: Vec<Arc<Peer>> = shared
                    .peers
                    .iter()
                    .filter(|e| my_location < e.key().as_str())
                    .filter(|e| e.value().state() == PeerState::Disconnected)
                    .map(|e| e.value().clone())
                    .collect();

                for peer in to_dial {
                    peer.set_handshaking();
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        let location = peer.location().to_string();
                        if let Err(e) = dial(shared, &location).await {
                            debug!(peer = %location, error = %e, "Dial failed");
                            peer.connect_failed();
                        }
                    });
                }
            }
        })
    }

    fn start_heartbeat(shared: Arc<Shared>) -> JoinHandle<()> {
        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {}
                }
                let Ok(frame) = PeerMessage::heartbeat().encode() else {
                    continue;
                };
                for entry in shared.peers.iter() {
                    if entry.value().state().is_ready() {
                        // A full queue already means the peer is behind; skipping one beat is fine.
                        let _ = entry.value().send_bytes(frame.clone());
                    }
                }
            }
        })
    }

    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        let dead_after = self.shared.config.dead_after;
        let mut infos: Vec<PeerInfo> = self
            .shared
            .peers
            .iter()
            .map(|e| e.value().info(dead_after))
            .collect();
        infos.sort_by(|a, b| a.location.cmp(&b.location));
        infos
    }

    pub fn connected_count(&self) -> usize {
        self.shared
            .peers
            .iter()
            .filter(|e| e.value().state().is_ready())
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub async fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down peering");
        let _ = self.shared.shutdown_tx.send(());
        for entry in self.shared.peers.iter() {
            entry.value().close();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("Peering shutdown complete");
    }
}

impl Drop for PeeringManager {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.shared.shutdown_tx.send(());
    }
}

impl PeerNetwork for PeeringManager {
    fn my_location(&self) -> &str {
        &self.shared.config.my_location
    }

    fn send(&self, location: &str, message: &PeerMessage) -> Result<()> {
        if location == self.shared.config.my_location {
            return Err(PeeringError::SendToSelf);
        }
        let peer = self
            .shared
            .peers
            .get(location)
            .map(|e| e.value().clone())
            .ok_or_else(|| PeeringError::UnknownPeer(location.to_string()))?;
        peer.send_bytes(message.encode()?)
    }

    fn is_alive(&self, location: &str) -> bool {
        self.shared
            .peers
            .get(location)
            .is_some_and(|e| e.value().is_alive(self.shared.config.dead_after))
    }

    fn use_peer(&self, location: &str) {
        if location == self.shared.config.my_location {
            return;
        }
        let usage = self
            .shared
            .peers
            .entry(location.to_string())
            .or_insert_with(|| Arc::new(Peer::new(location)))
            .acquire();
        debug!(peer = %location, usage, "Using peer");
    }

    fn stop_using_peer(&self, location: &str) {
        let Some(peer) = self.shared.peers.get(location).map(|e| e.value().clone()) else {
            return;
        };
        if peer.release() == 0 {
            self.shared
                .peers
                .remove_if(location, |_, p| p.usage() == 0);
            peer.close();
            debug!(peer = %location, "Peer dropped from pool");
        }
    }
}

async fn dial(shared: Arc<Shared>, location: &str) -> Result<()> {
    let stream = tokio::time::timeout(shared.config.handshake_timeout, TcpStream::connect(location))
        .await
        .map_err(|_| PeeringError::Handshake(format!("connect to {location} timed out")))??;
    run_connection(shared, stream, ConnectionDirection::Outbound, Some(location)).await
}

/// Handshake, then pump frames until either side closes.
async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    direction: ConnectionDirection,
    expected: Option<&str>,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let max_frame = shared.config.max_frame_size;

    write_frame(&mut writer, &PeerMessage::handshake(&shared.config.my_location).encode()?).await?;
    let first = tokio::time::timeout(shared.config.handshake_timeout, read_frame(&mut reader, max_frame))
        .await
        .map_err(|_| PeeringError::Handshake("timed out waiting for handshake".into()))??
        .ok_or_else(|| PeeringError::Handshake("closed before handshake".into()))?;
    let hello = PeerMessage::decode(&first)?;
    if hello.msg_type != MSG_HANDSHAKE {
        return Err(PeeringError::Handshake(format!(
            "expected handshake, got type {}",
            hello.msg_type
        )));
    }
    let location = String::from_utf8(hello.data)
        .map_err(|_| PeeringError::Handshake("location is not utf-8".into()))?;
    if let Some(expected) = expected {
        if expected != location {
            return Err(PeeringError::Handshake(format!(
                "dialed {expected} but peer says {location}"
            )));
        }
    }

    let Some(peer) = shared.peers.get(&location).map(|e| e.value().clone()) else {
        debug!(peer = %location, "Handshake from peer not in pool, closing");
        return Ok(());
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(shared.config.send_queue_size);
    let Some(link_id) = peer.attach(tx, direction) else {
        debug!(peer = %location, "Already connected, dropping duplicate connection");
        return Ok(());
    };
    info!(peer = %location, ?direction, "Peer handshake complete");

    let writer_peer = location.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(peer = %writer_peer, error = %e, "Write failed");
                break;
            }
        }
    });

    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let result = loop {
        let frame = tokio::select! {
            r = read_frame(&mut reader, max_frame) => r,
            _ = shutdown_rx.recv() => break Ok(()),
        };
        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        peer.record_received(bytes.len());
        let message = match PeerMessage::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(peer = %location, error = %e, "Dropping malformed message");
                continue;
            }
        };
        match message.msg_type {
            MSG_HEARTBEAT => trace!(peer = %location, "Heartbeat"),
            MSG_HANDSHAKE => debug!(peer = %location, "Ignoring repeated handshake"),
            _ if message.is_committee() => {
                let router = shared.router.read().clone();
                match router {
                    Some(router) => router.route(&location, message),
                    None => trace!(peer = %location, "No router, dropping message"),
                }
            }
            other => debug!(peer = %location, msg_type = other, "Unknown transport message"),
        }
    };

    peer.detach(link_id);
    result
}
