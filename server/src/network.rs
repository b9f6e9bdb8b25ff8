//! Server network layer: UDP transport and event-loop coordination around
//! the authority logic.

use crate::authority::{Authority, Outbound, Target};
use crate::peer_manager::PeerManager;
use log::{debug, error, info, warn};
use shared::math::Vec3;
use shared::wire::{decode, encode, Packet};
use shared::{ObjectId, PeerId, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Peers silent longer than this are dropped.
const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    PeerTimeout {
        peer_id: PeerId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum NetMessage {
    Send {
        packet: Packet,
        addr: SocketAddr,
    },
    SendTo {
        packet: Packet,
        peer_id: PeerId,
    },
    Broadcast {
        packet: Packet,
        exclude: HashSet<PeerId>,
    },
}

/// Main server coordinating networking and authority state
pub struct Server {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerManager>>,
    authority: Authority,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    net_tx: mpsc::UnboundedSender<NetMessage>,
    net_rx: mpsc::UnboundedReceiver<NetMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_peers: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Authority listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            peers: Arc::new(RwLock::new(PeerManager::new(max_peers, PEER_TIMEOUT))),
            authority: Authority::new()?,
            tick_duration,
            server_tx,
            server_rx,
            net_tx,
            net_rx,
        })
    }

    /// Spawns a token into the authoritative world. Peers connecting later
    /// receive it in their snapshot; connected peers get the broadcast.
    pub fn spawn_token(&mut self, position: Vec3) -> ObjectId {
        let (object_id, outbound) = self.authority.spawn_token(position);
        self.queue_outbound(vec![outbound]);
        object_id
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to decode packet from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let mut net_rx = std::mem::replace(&mut self.net_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = net_rx.recv().await {
                match message {
                    NetMessage::Send { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    NetMessage::SendTo { packet, peer_id } => {
                        let addr = {
                            let peers_guard = peers.read().await;
                            peers_guard.addr_of(peer_id)
                        };
                        if let Some(addr) = addr {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to peer {}: {}", peer_id, e);
                            }
                        }
                    }
                    NetMessage::Broadcast { packet, exclude } => {
                        let peer_addrs = {
                            let peers_guard = peers.read().await;
                            peers_guard.peer_addrs()
                        };

                        for (peer_id, addr) in peer_addrs {
                            if exclude.contains(&peer_id) {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to peer {}: {}", peer_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that watches for silent peers
    fn spawn_timeout_checker(&self) {
        let peers = Arc::clone(&self.peers);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut peers_guard = peers.write().await;
                    peers_guard.check_timeouts()
                };

                for peer_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::PeerTimeout { peer_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_to_addr(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.net_tx.send(NetMessage::Send { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Translates authority routing decisions into sender-task messages.
    fn queue_outbound(&self, outbound: Vec<Outbound>) {
        for message in outbound {
            let net_message = match message.target {
                Target::All => NetMessage::Broadcast {
                    packet: message.packet,
                    exclude: HashSet::new(),
                },
                Target::AllExcept(exclude) => NetMessage::Broadcast {
                    packet: message.packet,
                    exclude,
                },
                Target::One(peer_id) => NetMessage::SendTo {
                    packet: message.packet,
                    peer_id,
                },
            };
            if let Err(e) = self.net_tx.send(net_message) {
                error!("Failed to queue outbound packet: {}", e);
            }
        }
    }

    /// Processes one incoming packet on the main loop.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Peer connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.send_to_addr(response, addr);
                    return;
                }

                // Remove any existing connection from this address
                let existing = {
                    let peers = self.peers.read().await;
                    peers.find_by_addr(addr)
                };
                if let Some(existing_id) = existing {
                    info!("Removing existing peer {} from {}", existing_id, addr);
                    {
                        let mut peers = self.peers.write().await;
                        peers.remove_peer(existing_id);
                    }
                    let released = self.authority.handle_disconnect(existing_id);
                    self.queue_outbound(released);
                }

                let peer_id = {
                    let mut peers = self.peers.write().await;
                    peers.add_peer(addr)
                };

                match peer_id {
                    Some(peer_id) => {
                        let response = Packet::Connected {
                            peer_id,
                            snapshot: self.authority.connect_snapshot(),
                        };
                        self.send_to_addr(response, addr);
                    }
                    None => {
                        let response = Packet::Disconnected {
                            reason: "Server full".to_string(),
                        };
                        self.send_to_addr(response, addr);
                    }
                }
            }

            Packet::Disconnect => {
                let peer_id = {
                    let peers = self.peers.read().await;
                    peers.find_by_addr(addr)
                };

                if let Some(peer_id) = peer_id {
                    {
                        let mut peers = self.peers.write().await;
                        peers.remove_peer(peer_id);
                    }
                    let released = self.authority.handle_disconnect(peer_id);
                    self.queue_outbound(released);
                }
            }

            other => {
                let peer_id = {
                    let peers = self.peers.read().await;
                    peers.find_by_addr(addr)
                };

                match peer_id {
                    Some(peer_id) => {
                        {
                            let mut peers = self.peers.write().await;
                            peers.touch(peer_id);
                        }
                        let outbound = self.authority.handle_packet(peer_id, other);
                        self.queue_outbound(outbound);
                    }
                    None => {
                        warn!("Packet from unconnected address {}", addr);
                    }
                }
            }
        }
    }

    async fn handle_timeout(&mut self, peer_id: PeerId) {
        warn!("Peer {} timed out", peer_id);
        {
            let mut peers = self.peers.write().await;
            peers.remove_peer(peer_id);
        }
        let released = self.authority.handle_disconnect(peer_id);
        self.queue_outbound(released);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();
        let mut tick: u64 = 0;

        info!("Authority started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::PeerTimeout { peer_id }) => {
                            self.handle_timeout(peer_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Authority shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    tick += 1;

                    self.authority.tick(dt);

                    if tick % 60 == 0 {
                        let peer_count = {
                            let peers = self.peers.read().await;
                            peers.len()
                        };
                        if peer_count > 0 {
                            debug!(
                                "Tick {}: {} peers, {} objects, {:.1}Hz",
                                tick,
                                peer_count,
                                self.authority.world().len(),
                                1.0 / dt
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_variants() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        let msg = ServerMessage::PacketReceived {
            packet: Packet::Connect {
                client_version: PROTOCOL_VERSION,
            },
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert!(matches!(packet, Packet::Connect { .. }));
            }
            _ => panic!("Unexpected message type"),
        }

        let msg = ServerMessage::PeerTimeout { peer_id: 42 };
        match msg {
            ServerMessage::PeerTimeout { peer_id } => assert_eq!(peer_id, 42),
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_broadcast_exclusion_set() {
        let exclude: HashSet<PeerId> = [2, 5].into_iter().collect();
        let msg = NetMessage::Broadcast {
            packet: Packet::Despawn { object_id: 1 },
            exclude,
        };

        match msg {
            NetMessage::Broadcast { exclude, .. } => {
                assert!(exclude.contains(&2));
                assert!(exclude.contains(&5));
                assert!(!exclude.contains(&1));
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        tx.send(ServerMessage::PacketReceived {
            packet: Packet::Disconnect,
            addr,
        })
        .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, .. } => {
                assert!(matches!(packet, Packet::Disconnect));
            }
            _ => panic!("Unexpected message type"),
        }
    }
}
