//! Authority-side protocol logic, free of any socket so it can be driven
//! directly in tests.
//!
//! Owns the canonical world, arbitrates ownership, executes commands,
//! re-broadcasts rpcs with the proper exclusion set, and applies
//! owner-originated waypoints to the canonical positions.

use log::{debug, warn};
use shared::dispatch::{forward_exclusions, Dispatcher, PeerContext, World};
use shared::math::Vec3;
use shared::ownership::{OwnershipArbiter, Transition};
use shared::position::{Waypoint, WaypointFollower};
use shared::registry::CallbackKind;
use shared::token::{register_callbacks, Token, TokenSnapshot};
use shared::wire::{Envelope, Packet};
use shared::{ObjectId, PeerId, DEFAULT_SNAP_THRESHOLD};
use std::collections::{HashMap, HashSet};

/// Where an outbound packet should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One(PeerId),
    All,
    AllExcept(HashSet<PeerId>),
}

/// A packet the network layer still has to deliver.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub packet: Packet,
}

impl Outbound {
    fn all(packet: Packet) -> Outbound {
        Outbound {
            target: Target::All,
            packet,
        }
    }

    fn all_except(exclude: HashSet<PeerId>, packet: Packet) -> Outbound {
        Outbound {
            target: Target::AllExcept(exclude),
            packet,
        }
    }
}

pub struct Authority {
    ctx: PeerContext,
    dispatcher: Dispatcher<Token>,
    world: World<Token>,
    arbiter: OwnershipArbiter,
    followers: HashMap<ObjectId, WaypointFollower>,
    /// Loopback connections when the authority also hosts a local player.
    /// Empty on a dedicated server, but the forwarding rule always treats
    /// the set explicitly.
    local_connections: HashSet<PeerId>,
    next_object_id: ObjectId,
}

impl Authority {
    pub fn new() -> Result<Authority, shared::error::ProtocolError> {
        let mut dispatcher = Dispatcher::new();
        register_callbacks(&mut dispatcher)?;

        Ok(Authority {
            ctx: PeerContext::authority(),
            dispatcher,
            world: World::new(),
            arbiter: OwnershipArbiter::new(),
            followers: HashMap::new(),
            local_connections: HashSet::new(),
            next_object_id: 1,
        })
    }

    pub fn context(&self) -> PeerContext {
        self.ctx
    }

    pub fn world(&self) -> &World<Token> {
        &self.world
    }

    pub fn arbiter(&self) -> &OwnershipArbiter {
        &self.arbiter
    }

    /// Registers a loopback connection (couch co-op hosting). Those
    /// connections are always excluded from rpc forwarding.
    pub fn add_local_connection(&mut self, peer_id: PeerId) {
        self.local_connections.insert(peer_id);
    }

    /// Creates a token, starts tracking its ownership, and returns the
    /// spawn broadcast.
    pub fn spawn_token(&mut self, position: Vec3) -> (ObjectId, Outbound) {
        let object_id = self.next_object_id;
        self.next_object_id += 1;

        let token = Token::new(object_id, position);
        let snapshot = token.snapshot(None);
        self.world.insert(object_id, token);
        self.arbiter.track(object_id);
        self.followers
            .insert(object_id, WaypointFollower::new(DEFAULT_SNAP_THRESHOLD));

        debug!("Spawned token {} at {:?}", object_id, position);
        (object_id, Outbound::all(Packet::Spawn { snapshot }))
    }

    /// Removes a token and returns the despawn broadcast, if it existed.
    pub fn despawn_token(&mut self, object_id: ObjectId) -> Option<Outbound> {
        self.world.remove(object_id)?;
        self.arbiter.forget(object_id);
        self.followers.remove(&object_id);
        debug!("Despawned token {}", object_id);
        Some(Outbound::all(Packet::Despawn { object_id }))
    }

    /// Full world state for a newly connected peer, in stable order.
    pub fn connect_snapshot(&self) -> Vec<TokenSnapshot> {
        let mut ids = self.world.ids();
        ids.sort_unstable();
        ids.iter()
            .filter_map(|&id| {
                self.world
                    .get(id)
                    .map(|token| token.snapshot(self.arbiter.owner(id)))
            })
            .collect()
    }

    /// Routes one packet received from a connected peer.
    pub fn handle_packet(&mut self, from: PeerId, packet: Packet) -> Vec<Outbound> {
        match packet {
            Packet::Invoke(envelope) => self.handle_invoke(from, envelope),
            Packet::RequestOwnership { subject, requester } => {
                match self.arbiter.request(subject, requester) {
                    Transition::Changed(record) => {
                        debug!("Ownership of {} granted to {}", subject, requester);
                        vec![Outbound::all(Packet::OwnershipChanged {
                            subject: record.object_id,
                            owner: record.owner,
                        })]
                    }
                    // denied or no-op: silent by design
                    Transition::Unchanged => Vec::new(),
                }
            }
            Packet::ReleaseOwnership { subject, requester } => {
                match self.arbiter.release(subject, requester) {
                    Transition::Changed(record) => {
                        debug!("Ownership of {} released by {}", subject, requester);
                        vec![Outbound::all(Packet::OwnershipChanged {
                            subject: record.object_id,
                            owner: record.owner,
                        })]
                    }
                    Transition::Unchanged => Vec::new(),
                }
            }
            Packet::Waypoint {
                object_id,
                target,
                velocity,
            } => self.handle_waypoint(from, object_id, target, velocity),
            other => {
                warn!("Unexpected packet from peer {}: {:?}", from, other);
                Vec::new()
            }
        }
    }

    /// Releases everything a departing peer still owns and broadcasts the
    /// resulting ownership records.
    pub fn handle_disconnect(&mut self, peer_id: PeerId) -> Vec<Outbound> {
        self.arbiter
            .release_all_for(peer_id)
            .into_iter()
            .map(|record| {
                debug!(
                    "Released ownership of {} from disconnected peer {}",
                    record.object_id, peer_id
                );
                Outbound::all(Packet::OwnershipChanged {
                    subject: record.object_id,
                    owner: record.owner,
                })
            })
            .collect()
    }

    /// Advances canonical positions and rotation lerps by one tick.
    pub fn tick(&mut self, dt: f32) {
        for (&object_id, token) in self.world.iter_mut() {
            token.tick(dt);
            if let Some(follower) = self.followers.get_mut(&object_id) {
                if !follower.is_idle() {
                    token.position = follower.advance(token.position, dt);
                }
            }
            for event in token.take_events() {
                debug!("Token {}: {:?}", object_id, event);
            }
        }
    }

    fn handle_invoke(&mut self, from: PeerId, envelope: Envelope) -> Vec<Outbound> {
        // Validate before forwarding so malformed envelopes stop here.
        let descriptor = match self.dispatcher.check_envelope(&envelope) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                warn!("Dropping envelope from peer {}: {}", from, error);
                return Vec::new();
            }
        };

        let mut outbound = Vec::new();

        if descriptor.kind == CallbackKind::Rpc {
            // Forward to everyone else. Never back to our own loopback
            // connections, and never back to the sender when prediction
            // already ran the effect there. A non-predicted sender gets the
            // echo, which is how it applies its own call.
            let exclude = forward_exclusions(&descriptor, from, &self.local_connections);
            outbound.push(Outbound::all_except(
                exclude,
                Packet::Invoke(envelope.clone()),
            ));
        }

        let skip_local = descriptor.predicted && self.local_connections.contains(&from);
        if !skip_local {
            if let Err(error) = self.dispatcher.dispatch(&mut self.world, &envelope) {
                let name = self
                    .dispatcher
                    .registry()
                    .name_of(envelope.callback_id)
                    .unwrap_or("?");
                warn!("Dispatch of {} from peer {} failed: {}", name, from, error);
            }
        }

        outbound
    }

    fn handle_waypoint(
        &mut self,
        from: PeerId,
        object_id: ObjectId,
        target: Vec3,
        velocity: f32,
    ) -> Vec<Outbound> {
        // Position updates are gated on ownership.
        if !self.arbiter.is_owner(object_id, from) {
            warn!(
                "Dropping waypoint for {} from non-owner peer {}",
                object_id, from
            );
            return Vec::new();
        }
        if !self.world.contains(object_id) {
            warn!("Dropping waypoint for unknown object {}", object_id);
            return Vec::new();
        }

        if let Some(follower) = self.followers.get_mut(&object_id) {
            follower.enqueue(Waypoint {
                object_id,
                target,
                velocity,
            });
        }

        vec![Outbound::all_except(
            [from].into_iter().collect(),
            Packet::Waypoint {
                object_id,
                target,
                velocity,
            },
        )]
    }
}
