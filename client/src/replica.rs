//! Client-side replica of the object world.
//!
//! Applies authoritative packets, runs client-side prediction for predicted
//! callbacks, keeps an optimistic ownership view, interpolates non-owned
//! objects along received waypoints, and samples owned objects for the
//! periodic position broadcast. Pure logic: the network layer feeds packets
//! in and drains the outbox, so tests drive a replica directly.

use log::{debug, info, warn};
use shared::dispatch::{Dispatcher, PeerContext, World};
use shared::error::ProtocolError;
use shared::math::Vec3;
use shared::ownership::OwnershipView;
use shared::position::{PositionBroadcaster, Waypoint, WaypointFollower};
use shared::timer::TimerQueue;
use shared::token::{register_callbacks, Token, TokenSnapshot, TOKEN_TYPE};
use shared::wire::{Envelope, Packet, Value};
use shared::{
    ObjectId, PeerId, DEFAULT_SEND_RATE, DEFAULT_SNAP_THRESHOLD, OWNERSHIP_REQUEST_TIMEOUT,
    PROTOCOL_VERSION,
};
use std::collections::HashMap;

/// Notifications surfaced to the integrator (UI, demo driver, logs).
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    Connected {
        peer_id: PeerId,
    },
    Disconnected {
        reason: String,
    },
    OwnerChanged {
        object_id: ObjectId,
        owner: Option<PeerId>,
    },
    /// An ownership request went unanswered; the optimistic claim was
    /// dropped. Unanswered means denied or lost; the protocol does not say
    /// which.
    OwnershipRequestTimedOut {
        object_id: ObjectId,
    },
    Spawned(ObjectId),
    Despawned(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerEvent {
    OwnershipPending(ObjectId),
}

pub struct Replica {
    ctx: Option<PeerContext>,
    dispatcher: Dispatcher<Token>,
    world: World<Token>,
    ownership: HashMap<ObjectId, OwnershipView>,
    followers: HashMap<ObjectId, WaypointFollower>,
    broadcasters: HashMap<ObjectId, PositionBroadcaster>,
    timers: TimerQueue<TimerEvent>,
    clock: f32,
    outbox: Vec<Packet>,
    events: Vec<ReplicaEvent>,
}

impl Replica {
    pub fn new() -> Result<Replica, ProtocolError> {
        let mut dispatcher = Dispatcher::new();
        register_callbacks(&mut dispatcher)?;

        Ok(Replica {
            ctx: None,
            dispatcher,
            world: World::new(),
            ownership: HashMap::new(),
            followers: HashMap::new(),
            broadcasters: HashMap::new(),
            timers: TimerQueue::new(),
            clock: 0.0,
            outbox: Vec::new(),
            events: Vec::new(),
        })
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.ctx.map(|ctx| ctx.peer_id)
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn token(&self, object_id: ObjectId) -> Option<&Token> {
        self.world.get(object_id)
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids = self.world.ids();
        ids.sort_unstable();
        ids
    }

    pub fn owner_of(&self, object_id: ObjectId) -> Option<PeerId> {
        self.ownership
            .get(&object_id)
            .and_then(|view| view.owner())
    }

    pub fn is_owned_by_local(&self, object_id: ObjectId) -> bool {
        match self.ctx {
            Some(ctx) => self
                .ownership
                .get(&object_id)
                .map(|view| view.is_owned_by(ctx.peer_id))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Queues the connection handshake.
    pub fn connect(&mut self) {
        self.outbox.push(Packet::Connect {
            client_version: PROTOCOL_VERSION,
        });
    }

    /// Invokes a token callback by name: runs it locally first when it is
    /// marked predicted, and queues the envelope for the authority.
    pub fn invoke(
        &mut self,
        object_id: ObjectId,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<(), ProtocolError> {
        let (envelope, descriptor) =
            self.dispatcher
                .prepare_invoke(&mut self.world, object_id, TOKEN_TYPE, method_name, args)?;
        debug!(
            "Invoking {}.{} on {} (predicted: {})",
            TOKEN_TYPE, method_name, object_id, descriptor.predicted
        );
        self.outbox.push(Packet::Invoke(envelope));
        Ok(())
    }

    /// Requests exclusive write access, optimistically assuming it is
    /// granted until the authority says otherwise or the request times out.
    pub fn request_ownership(&mut self, object_id: ObjectId) {
        let Some(ctx) = self.ctx else {
            warn!("Cannot request ownership before connecting");
            return;
        };
        if !self.world.contains(object_id) {
            warn!("Cannot request ownership of unknown object {}", object_id);
            return;
        }

        let view = self.ownership.entry(object_id).or_default();
        view.predict(Some(ctx.peer_id));

        // Assume the grant: start sampling for position broadcasts and stop
        // following stale waypoints.
        self.broadcasters
            .entry(object_id)
            .or_insert_with(|| PositionBroadcaster::new(object_id, DEFAULT_SEND_RATE));
        if let Some(follower) = self.followers.get_mut(&object_id) {
            follower.clear();
        }

        self.timers.schedule(
            self.clock,
            OWNERSHIP_REQUEST_TIMEOUT,
            TimerEvent::OwnershipPending(object_id),
        );
        self.outbox.push(Packet::RequestOwnership {
            subject: object_id,
            requester: ctx.peer_id,
        });
    }

    /// Releases ownership, broadcasting one final exact position first so
    /// the hand-off leaves no drift on the other peers.
    pub fn release_ownership(&mut self, object_id: ObjectId) {
        let Some(ctx) = self.ctx else {
            warn!("Cannot release ownership before connecting");
            return;
        };

        if self.is_owned_by_local(object_id) {
            if let (Some(broadcaster), Some(token)) = (
                self.broadcasters.get_mut(&object_id),
                self.world.get(object_id),
            ) {
                let waypoint = broadcaster.release(token.position);
                self.outbox.push(Packet::Waypoint {
                    object_id: waypoint.object_id,
                    target: waypoint.target,
                    velocity: waypoint.velocity,
                });
            }
            self.broadcasters.remove(&object_id);
        }

        if let Some(view) = self.ownership.get_mut(&object_id) {
            view.predict(None);
        }

        self.outbox.push(Packet::ReleaseOwnership {
            subject: object_id,
            requester: ctx.peer_id,
        });
    }

    /// Grab an object to drag it around.
    pub fn begin_movement(&mut self, object_id: ObjectId) {
        self.request_ownership(object_id);
    }

    /// Finish dragging: final exact position, then release.
    pub fn end_movement(&mut self, object_id: ObjectId) {
        self.release_ownership(object_id);
    }

    /// Moves an owned object. Ignored while some other peer owns it, so a
    /// denied ownership request cannot push positions around.
    pub fn set_position(&mut self, object_id: ObjectId, position: Vec3) {
        if !self.is_owned_by_local(object_id) {
            warn!(
                "Ignoring position write to {} while not owning it",
                object_id
            );
            return;
        }
        if let Some(token) = self.world.get_mut(object_id) {
            token.position = position;
        }
    }

    /// Applies one packet received from the authority.
    pub fn apply_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { peer_id, snapshot } => {
                info!("Connected as peer {}", peer_id);
                self.ctx = Some(PeerContext::client(peer_id));
                for item in &snapshot {
                    self.install_snapshot(item);
                }
                self.events.push(ReplicaEvent::Connected { peer_id });
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.ctx = None;
                self.events.push(ReplicaEvent::Disconnected { reason });
            }

            Packet::Invoke(envelope) => self.apply_envelope(envelope),

            Packet::OwnershipChanged { subject, owner } => {
                self.apply_ownership_change(subject, owner);
            }

            Packet::Waypoint {
                object_id,
                target,
                velocity,
            } => {
                // Our own waypoints are historical data by the time they
                // could come back; only non-owned objects follow.
                if self.is_owned_by_local(object_id) {
                    return;
                }
                if !self.world.contains(object_id) {
                    debug!("Waypoint for unknown object {}", object_id);
                    return;
                }
                self.followers
                    .entry(object_id)
                    .or_insert_with(|| WaypointFollower::new(DEFAULT_SNAP_THRESHOLD))
                    .enqueue(Waypoint {
                        object_id,
                        target,
                        velocity,
                    });
            }

            Packet::Spawn { snapshot } => {
                let object_id = snapshot.object_id;
                self.install_snapshot(&snapshot);
                self.events.push(ReplicaEvent::Spawned(object_id));
            }

            Packet::Despawn { object_id } => {
                self.world.remove(object_id);
                self.ownership.remove(&object_id);
                self.followers.remove(&object_id);
                self.broadcasters.remove(&object_id);
                self.events.push(ReplicaEvent::Despawned(object_id));
            }

            other => {
                warn!("Unexpected packet from authority: {:?}", other);
            }
        }
    }

    /// Advances the replica by one tick: timers, rotation lerps, waypoint
    /// interpolation for non-owned objects, and position sampling plus the
    /// periodic broadcast for owned ones.
    pub fn tick(&mut self, dt: f32) {
        self.clock += dt;

        for event in self.timers.pop_due(self.clock) {
            let TimerEvent::OwnershipPending(object_id) = event;
            self.expire_ownership_request(object_id);
        }

        let local_peer = self.peer_id();

        for object_id in self.world.ids() {
            let owned_by_local = match local_peer {
                Some(peer) => self
                    .ownership
                    .get(&object_id)
                    .map(|view| view.is_owned_by(peer))
                    .unwrap_or(false),
                None => false,
            };

            let Some(token) = self.world.get_mut(object_id) else {
                continue;
            };
            token.tick(dt);

            if owned_by_local {
                if let Some(broadcaster) = self.broadcasters.get_mut(&object_id) {
                    broadcaster.record(token.position, self.clock);
                    if let Some(waypoint) = broadcaster.poll(self.clock) {
                        self.outbox.push(Packet::Waypoint {
                            object_id: waypoint.object_id,
                            target: waypoint.target,
                            velocity: waypoint.velocity,
                        });
                    }
                }
            } else if let Some(follower) = self.followers.get_mut(&object_id) {
                if !follower.is_idle() {
                    token.position = follower.advance(token.position, dt);
                }
            }

            for event in token.take_events() {
                debug!("Token {}: {:?}", object_id, event);
            }
        }
    }

    /// Hands the queued outgoing packets to the network layer.
    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<ReplicaEvent> {
        std::mem::take(&mut self.events)
    }

    fn install_snapshot(&mut self, snapshot: &TokenSnapshot) {
        let object_id = snapshot.object_id;
        self.world.insert(object_id, Token::from_snapshot(snapshot));
        self.ownership
            .insert(object_id, OwnershipView::new(snapshot.owner));
        self.followers
            .insert(object_id, WaypointFollower::new(DEFAULT_SNAP_THRESHOLD));
    }

    fn apply_envelope(&mut self, envelope: Envelope) {
        if let Err(error) = self.dispatcher.dispatch(&mut self.world, &envelope) {
            let name = self
                .dispatcher
                .registry()
                .name_of(envelope.callback_id)
                .unwrap_or("?");
            warn!("Dropping envelope {}: {}", name, error);
        }
    }

    fn apply_ownership_change(&mut self, object_id: ObjectId, owner: Option<PeerId>) {
        let view = self.ownership.entry(object_id).or_default();
        view.apply_authoritative(owner);
        debug!("Owner of {} is now {:?}", object_id, owner);

        let owned_by_local = self
            .ctx
            .map(|ctx| owner == Some(ctx.peer_id))
            .unwrap_or(false);

        if owned_by_local {
            self.broadcasters
                .entry(object_id)
                .or_insert_with(|| PositionBroadcaster::new(object_id, DEFAULT_SEND_RATE));
            if let Some(follower) = self.followers.get_mut(&object_id) {
                follower.clear();
            }
        } else {
            self.broadcasters.remove(&object_id);
            self.followers
                .entry(object_id)
                .or_insert_with(|| WaypointFollower::new(DEFAULT_SNAP_THRESHOLD));
        }

        self.events
            .push(ReplicaEvent::OwnerChanged { object_id, owner });
    }

    fn expire_ownership_request(&mut self, object_id: ObjectId) {
        let Some(view) = self.ownership.get_mut(&object_id) else {
            return;
        };
        // A confirming broadcast clears the prediction; if one is still
        // here, the request was denied or lost.
        if !view.has_prediction() {
            return;
        }
        view.revert();
        self.broadcasters.remove(&object_id);
        warn!("Ownership request for {} timed out", object_id);
        self.events
            .push(ReplicaEvent::OwnershipRequestTimedOut { object_id });
    }
}
