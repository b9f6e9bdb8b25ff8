//! Client network layer: UDP transport and the tick loop around the replica.

use crate::demo::DemoScript;
use crate::replica::{Replica, ReplicaEvent};
use log::{error, info, warn};
use shared::wire::{decode, encode, Packet};
use shared::MAX_DATAGRAM_SIZE;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Ticks per second for the local simulation loop.
const TICK_RATE: u32 = 60;

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    replica: Replica,
    connected: bool,
    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            replica: Replica::new()?,
            connected: false,
            fake_ping_ms,
        })
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn replica_mut(&mut self) -> &mut Replica {
        &mut self.replica
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = encode(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn flush_outbox(&mut self) {
        for packet in self.replica.drain_outbox() {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Failed to send packet: {}", e);
            }
        }
    }

    fn handle_events(&mut self) {
        for event in self.replica.drain_events() {
            match event {
                ReplicaEvent::Connected { peer_id } => {
                    info!("Connected! Peer ID: {}", peer_id);
                    self.connected = true;
                }
                ReplicaEvent::Disconnected { reason } => {
                    warn!("Disconnected: {}", reason);
                    self.connected = false;
                }
                ReplicaEvent::OwnerChanged { object_id, owner } => {
                    info!("Owner of {} is now {:?}", object_id, owner);
                }
                ReplicaEvent::OwnershipRequestTimedOut { object_id } => {
                    warn!("Ownership request for {} went unanswered", object_id);
                }
                ReplicaEvent::Spawned(object_id) => info!("Object {} spawned", object_id),
                ReplicaEvent::Despawned(object_id) => info!("Object {} despawned", object_id),
            }
        }
    }

    /// Main client loop: receive, tick, flush. The optional demo script is
    /// stepped once per tick as a stand-in for real input.
    pub async fn run(
        &mut self,
        mut demo: Option<DemoScript>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);
        self.replica.connect();
        self.flush_outbox().await;

        let mut tick_interval = interval(Duration::from_secs_f32(1.0 / TICK_RATE as f32));
        let mut last_tick = Instant::now();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, addr)) => {
                            if addr != self.server_addr {
                                warn!("Ignoring packet from unexpected address {}", addr);
                                continue;
                            }
                            match decode(&buffer[0..len]) {
                                Ok(packet) => self.replica.apply_packet(packet),
                                Err(e) => warn!("Failed to decode packet: {}", e),
                            }
                            self.handle_events();
                        }
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.replica.tick(dt);

                    if self.connected {
                        if let Some(script) = demo.as_mut() {
                            if script.step(&mut self.replica, dt) {
                                info!("Demo finished, disconnecting");
                                self.send_packet(&Packet::Disconnect).await.ok();
                                return Ok(());
                            }
                        }
                    }

                    self.handle_events();
                    self.flush_outbox().await;
                },
            }
        }
    }
}
