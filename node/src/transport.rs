// Transport adapter
// TCP edges feeding the request queue and draining responses. The consensus
// core never touches sockets; everything below the codec lives here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tessera_consensus::NodeState;
use tessera_core::{random_dejavu, CodecError, Frame, MessageType, HEADER_SIZE};
use tessera_network::{DejavuFilter, FrameQueue, Outbound, PeerBook, PeerId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Live connections and their outbound channels. Routing happens from both
/// async tasks and plain worker threads; unbounded senders work from
/// either.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<PeerId, mpsc::UnboundedSender<Frame>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<Frame>) {
        let peer_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().insert(peer_id, sender);
        (peer_id, receiver)
    }

    fn unregister(&self, peer_id: PeerId) {
        self.connections.lock().unwrap().remove(&peer_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Deliver one outbound unit. Self-issued broadcasts (dejavu zero) get
    /// a fresh nonce so receivers gossip them onwards.
    pub fn route(&self, outbound: Outbound) {
        match outbound {
            Outbound::Broadcast(mut frame) => {
                if frame.header.dejavu == 0 {
                    frame.header.dejavu = random_dejavu();
                }
                let connections = self.connections.lock().unwrap();
                for sender in connections.values() {
                    let _ = sender.send(frame.clone());
                }
            }
            Outbound::Reply { peer, frame } => {
                let connections = self.connections.lock().unwrap();
                if let Some(sender) = connections.get(&peer) {
                    let _ = sender.send(frame);
                }
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        ConnectionRegistry::new()
    }
}

pub struct Transport {
    pub state: Arc<NodeState>,
    pub registry: Arc<ConnectionRegistry>,
    pub request_queue: Arc<FrameQueue>,
    pub dejavu: Arc<Mutex<DejavuFilter>>,
    pub peers: Arc<PeerBook>,
}

impl Transport {
    /// Accept loop plus outgoing dials to the bootstrap peers.
    pub async fn run(self: Arc<Self>, port: u16, bootstrap: Vec<[u8; 4]>) -> std::io::Result<()> {
        for address in bootstrap {
            self.peers.add(address);
            let transport = Arc::clone(&self);
            tokio::spawn(async move {
                let endpoint = format!("{}.{}.{}.{}:{port}", address[0], address[1], address[2], address[3]);
                match TcpStream::connect(&endpoint).await {
                    Ok(stream) => {
                        transport.peers.mark_verified(address);
                        transport.serve_connection(stream, Some(address)).await;
                    }
                    Err(error) => {
                        warn!(%endpoint, %error, "dial failed");
                        transport.peers.forget(address);
                    }
                }
            });
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening");
        loop {
            let (stream, remote) = listener.accept().await?;
            let address = match remote.ip() {
                std::net::IpAddr::V4(v4) => Some(v4.octets()),
                _ => None,
            };
            let transport = Arc::clone(&self);
            tokio::spawn(async move {
                transport.serve_connection(stream, address).await;
            });
        }
    }

    async fn serve_connection(&self, stream: TcpStream, address: Option<[u8; 4]>) {
        let (peer_id, mut outbound) = self.registry.register();
        debug!(peer_id, ?address, "peer connected");

        let (mut reader, mut writer) = stream.into_split();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if writer.write_all(&frame.encode()).await.is_err() {
                    break;
                }
            }
        });

        // Greet with our address book sample.
        self.registry.route(Outbound::Reply {
            peer: peer_id,
            frame: Frame::new(
                MessageType::ExchangePublicPeers,
                random_dejavu(),
                self.peers.sample().encode(),
            ),
        });

        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 65536];
        'receive: loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break 'receive,
                Ok(read) => read,
            };
            buffer.extend_from_slice(&chunk[..read]);

            loop {
                if buffer.len() < HEADER_SIZE {
                    break;
                }
                match Frame::decode(&buffer) {
                    Ok((frame, consumed)) => {
                        let fresh = self
                            .dejavu
                            .lock()
                            .unwrap()
                            .check_and_insert(&buffer[..consumed]);
                        buffer.drain(..consumed);
                        if fresh {
                            if !self.request_queue.push(peer_id, frame) {
                                self.state
                                    .stats
                                    .discarded_requests
                                    .fetch_add(1, Ordering::Relaxed);
                            }
                        } else {
                            self.state
                                .stats
                                .duplicate_requests
                                .fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(CodecError::Truncated { .. }) => break,
                    Err(_) => {
                        // Malformed framing: cut the peer loose and forget
                        // its address.
                        if let Some(address) = address {
                            self.peers.forget(address);
                        }
                        break 'receive;
                    }
                }
            }
        }

        self.registry.unregister(peer_id);
        writer_task.abort();
        debug!(peer_id, "peer disconnected");
    }
}
