//! Integration tests for the local-authority sync protocol.
//!
//! These wire a real authority and several client replicas together in one
//! process, routing packets by hand, so every cross-peer property (ownership
//! hand-off, prediction convergence, position sync) is exercised end to end
//! without sockets. One test at the bottom checks the real UDP path.

use client::replica::{Replica, ReplicaEvent};
use server::authority::{Authority, Outbound, Target};
use shared::math::Vec3;
use shared::wire::{decode, encode, Packet, Value};
use shared::{ObjectId, PeerId};
use std::collections::HashMap;

/// An authority plus N connected replicas with hand-routed packets.
struct Harness {
    authority: Authority,
    replicas: HashMap<PeerId, Replica>,
}

impl Harness {
    fn new(peers: &[PeerId], token_positions: &[Vec3]) -> (Harness, Vec<ObjectId>) {
        let mut authority = Authority::new().expect("authority construction");
        let mut objects = Vec::new();
        for &position in token_positions {
            let (object_id, _spawn) = authority.spawn_token(position);
            objects.push(object_id);
        }

        let mut replicas = HashMap::new();
        for &peer_id in peers {
            let mut replica = Replica::new().expect("replica construction");
            replica.apply_packet(Packet::Connected {
                peer_id,
                snapshot: authority.connect_snapshot(),
            });
            replica.drain_events();
            replicas.insert(peer_id, replica);
        }

        (
            Harness {
                authority,
                replicas,
            },
            objects,
        )
    }

    fn replica(&self, peer_id: PeerId) -> &Replica {
        &self.replicas[&peer_id]
    }

    fn replica_mut(&mut self, peer_id: PeerId) -> &mut Replica {
        self.replicas.get_mut(&peer_id).unwrap()
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.replicas.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn route(&mut self, outbound: Vec<Outbound>) {
        for message in outbound {
            match message.target {
                Target::One(peer_id) => {
                    if let Some(replica) = self.replicas.get_mut(&peer_id) {
                        replica.apply_packet(message.packet);
                    }
                }
                Target::All => {
                    for peer_id in self.peer_ids() {
                        self.replicas
                            .get_mut(&peer_id)
                            .unwrap()
                            .apply_packet(message.packet.clone());
                    }
                }
                Target::AllExcept(exclude) => {
                    for peer_id in self.peer_ids() {
                        if exclude.contains(&peer_id) {
                            continue;
                        }
                        self.replicas
                            .get_mut(&peer_id)
                            .unwrap()
                            .apply_packet(message.packet.clone());
                    }
                }
            }
        }
    }

    /// Drains every replica's outbox through the authority until the
    /// network is quiet.
    fn pump(&mut self) {
        loop {
            let mut delivered = false;
            for peer_id in self.peer_ids() {
                let packets = self.replicas.get_mut(&peer_id).unwrap().drain_outbox();
                for packet in packets {
                    delivered = true;
                    let outbound = self.authority.handle_packet(peer_id, packet);
                    self.route(outbound);
                }
            }
            if !delivered {
                break;
            }
        }
    }

    /// Owner sequence observed via authoritative broadcasts on one replica.
    fn observed_owners(&mut self, peer_id: PeerId, object_id: ObjectId) -> Vec<Option<PeerId>> {
        self.replicas
            .get_mut(&peer_id)
            .unwrap()
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ReplicaEvent::OwnerChanged {
                    object_id: changed,
                    owner,
                } if changed == object_id => Some(owner),
                _ => None,
            })
            .collect()
    }
}

/// OWNERSHIP TESTS
mod ownership_tests {
    use super::*;

    /// Peer A requests (granted), peer B requests (denied), A releases, B
    /// requests again (granted). Every peer observes
    /// Unowned -> Owned(A) -> Unowned -> Owned(B).
    #[test]
    fn contested_handoff_sequence() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness.replica_mut(1).request_ownership(object);
        harness.pump();
        harness.replica_mut(2).request_ownership(object);
        harness.pump();
        harness.replica_mut(1).release_ownership(object);
        harness.pump();
        harness.replica_mut(2).request_ownership(object);
        harness.pump();

        for peer in [1, 2] {
            let observed = harness.observed_owners(peer, object);
            assert_eq!(
                observed,
                vec![Some(1), None, Some(2)],
                "peer {} observed a different record sequence",
                peer
            );
        }
        assert_eq!(harness.authority.arbiter().owner(object), Some(2));
        assert!(harness.replica(2).is_owned_by_local(object));
        assert!(!harness.replica(1).is_owned_by_local(object));
    }

    #[test]
    fn denied_request_leaves_optimistic_claim_to_expire() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness.replica_mut(1).request_ownership(object);
        harness.pump();

        // B's request is denied: no broadcast, so B still believes its own
        // optimistic claim until the timeout clears it
        harness.replica_mut(2).request_ownership(object);
        harness.pump();
        assert!(harness.replica(2).is_owned_by_local(object));

        harness
            .replica_mut(2)
            .tick(shared::OWNERSHIP_REQUEST_TIMEOUT + 0.1);
        assert!(!harness.replica(2).is_owned_by_local(object));
        assert_eq!(harness.replica(2).owner_of(object), Some(1));
    }

    #[test]
    fn release_before_confirmation_is_safe() {
        let (mut harness, objects) = Harness::new(&[1], &[Vec3::default()]);
        let object = objects[0];

        // request and release before the request is even delivered
        harness.replica_mut(1).request_ownership(object);
        harness.replica_mut(1).release_ownership(object);
        harness.pump();

        // grant then release both applied in arrival order
        assert_eq!(harness.authority.arbiter().owner(object), None);
    }

    #[test]
    fn disconnect_releases_held_ownership() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness.replica_mut(1).request_ownership(object);
        harness.pump();
        assert_eq!(harness.authority.arbiter().owner(object), Some(1));

        let outbound = harness.authority.handle_disconnect(1);
        harness.route(outbound);

        assert_eq!(harness.authority.arbiter().owner(object), None);
        assert_eq!(harness.replica(2).owner_of(object), None);
    }
}

/// PREDICTION TESTS
mod prediction_tests {
    use super::*;

    /// A predicted callback applies exactly once everywhere: immediately on
    /// the caller, after the round trip on everyone else.
    #[test]
    fn predicted_rpc_converges_without_double_apply() {
        let (mut harness, objects) = Harness::new(&[1, 2, 3], &[Vec3::default()]);
        let object = objects[0];

        harness
            .replica_mut(1)
            .invoke(object, "ToggleColor", vec![])
            .unwrap();

        // the predictor sees the effect before any packet moves
        assert!(harness.replica(1).token(object).unwrap().is_toggled);
        assert!(!harness.replica(2).token(object).unwrap().is_toggled);

        harness.pump();

        for peer in [1, 2, 3] {
            assert!(
                harness.replica(peer).token(object).unwrap().is_toggled,
                "peer {} diverged",
                peer
            );
        }
        assert!(harness.authority.world().get(object).unwrap().is_toggled);
    }

    #[test]
    fn plain_rpc_converges_via_echo() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness
            .replica_mut(1)
            .invoke(object, "FlipOver", vec![])
            .unwrap();

        // not predicted: nothing happens locally until the echo
        assert!(harness.replica(1).token(object).unwrap().is_face_up);

        harness.pump();

        for peer in [1, 2] {
            assert!(
                !harness.replica(peer).token(object).unwrap().is_face_up,
                "peer {} diverged",
                peer
            );
        }
        assert!(!harness.authority.world().get(object).unwrap().is_face_up);
    }

    #[test]
    fn predicted_rpc_with_arguments_converges() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness
            .replica_mut(1)
            .invoke(object, "Rotate", vec![Value::F32(60.0)])
            .unwrap();
        harness
            .replica_mut(1)
            .invoke(object, "Scale", vec![Value::F32(0.1)])
            .unwrap();
        harness.pump();

        for peer in [1, 2] {
            let token = harness.replica(peer).token(object).unwrap();
            assert_eq!(token.target_angle(), 60.0, "peer {} diverged", peer);
            assert!((token.scale - 1.1).abs() < 1e-4, "peer {} diverged", peer);
        }
    }

    #[test]
    fn command_executes_on_the_authority_only() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness
            .replica_mut(1)
            .invoke(object, "SetDepth", vec![Value::I32(5)])
            .unwrap();
        harness.pump();

        assert_eq!(harness.authority.world().get(object).unwrap().depth, 5);
        // commands are not re-broadcast
        assert_eq!(harness.replica(2).token(object).unwrap().depth, 0);
    }
}

/// POSITION SYNC TESTS
mod position_tests {
    use super::*;

    #[test]
    fn owner_movement_replicates_to_non_owners() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness.replica_mut(1).begin_movement(object);
        harness.pump();

        // drag right for a while, pumping as the network would
        let dt = 1.0 / 60.0;
        let mut x = 0.0;
        for _ in 0..30 {
            x += 0.05;
            harness.replica_mut(1).set_position(object, Vec3::new(x, 0.0, 0.0));
            harness.replica_mut(1).tick(dt);
            harness.pump();
        }
        harness.replica_mut(1).end_movement(object);
        harness.pump();

        // give the follower time to walk the whole waypoint queue; the
        // final exact waypoint has zero velocity and applies directly
        for _ in 0..240 {
            harness.replica_mut(2).tick(dt);
        }
        let replicated = harness.replica(2).token(object).unwrap().position;
        assert_eq!(replicated, Vec3::new(x, 0.0, 0.0));

        // authority's canonical copy converges too
        for _ in 0..120 {
            harness.authority.tick(dt);
        }
        let canonical = harness.authority.world().get(object).unwrap().position;
        assert!(canonical.distance(&replicated) < 1e-3);
    }

    #[test]
    fn no_waypoint_broadcast_without_movement() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::new(1.0, 1.0, 0.0)]);
        let object = objects[0];

        harness.replica_mut(1).request_ownership(object);
        harness.pump();

        // a full second of ticks without a single position write
        for _ in 0..60 {
            harness.replica_mut(1).tick(1.0 / 60.0);
        }

        let packets = harness.replica_mut(1).drain_outbox();
        assert!(
            !packets.iter().any(|p| matches!(p, Packet::Waypoint { .. })),
            "an idle owner must not broadcast waypoints"
        );
    }

    #[test]
    fn non_owner_cannot_move_an_object() {
        let (mut harness, objects) = Harness::new(&[1, 2], &[Vec3::default()]);
        let object = objects[0];

        harness.replica_mut(1).request_ownership(object);
        harness.pump();

        // peer 2 forges a waypoint without owning the object
        let outbound = harness.authority.handle_packet(
            2,
            Packet::Waypoint {
                object_id: object,
                target: Vec3::new(50.0, 0.0, 0.0),
                velocity: 100.0,
            },
        );
        assert!(outbound.is_empty());
        assert_eq!(
            harness.authority.world().get(object).unwrap().position,
            Vec3::default()
        );
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[test]
    fn late_joiner_resumes_from_current_truth() {
        let (mut harness, objects) = Harness::new(&[1], &[Vec3::default()]);
        let object = objects[0];

        // mutate the world before peer 9 arrives: toggle it and drag it far
        // enough that waypoints actually flow
        harness.replica_mut(1).request_ownership(object);
        harness.pump();
        harness
            .replica_mut(1)
            .invoke(object, "ToggleColor", vec![])
            .unwrap();
        let mut x = 0.0;
        for _ in 0..12 {
            x += 0.25;
            harness.replica_mut(1).set_position(object, Vec3::new(x, 0.0, 0.0));
            harness.replica_mut(1).tick(0.1);
            harness.pump();
        }
        for _ in 0..240 {
            harness.authority.tick(1.0 / 60.0);
        }

        let canonical = harness.authority.world().get(object).unwrap().position;
        // the drag reached the canonical copy
        assert!(canonical.x > 0.0);

        let mut late = Replica::new().unwrap();
        late.apply_packet(Packet::Connected {
            peer_id: 9,
            snapshot: harness.authority.connect_snapshot(),
        });

        let token = late.token(object).unwrap();
        assert!(token.is_toggled);
        assert_eq!(late.owner_of(object), Some(1));
        // a joiner mid-drag starts from the canonical truth, not the spawn
        // point
        assert_eq!(token.position, canonical);
    }

    #[test]
    fn spawn_and_despawn_propagate() {
        let (mut harness, _objects) = Harness::new(&[1, 2], &[]);

        let (object, spawn) = harness.authority.spawn_token(Vec3::new(2.0, 0.0, 0.0));
        harness.route(vec![spawn]);

        for peer in [1, 2] {
            assert!(harness.replica(peer).token(object).is_some());
        }

        let despawn = harness.authority.despawn_token(object).unwrap();
        harness.route(vec![despawn]);

        for peer in [1, 2] {
            assert!(harness.replica(peer).token(object).is_none());
        }
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Tests real UDP socket communication with the wire codec
    #[tokio::test]
    async fn udp_socket_communication() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind server socket");
        let server_addr = server_socket.local_addr().unwrap();

        // Echo server
        let server_socket_clone = server_socket.try_clone().unwrap();
        thread::spawn(move || {
            let mut buf = [0; 2048];
            if let Ok((size, client_addr)) = server_socket_clone.recv_from(&mut buf) {
                let _ = server_socket_clone.send_to(&buf[..size], client_addr);
            }
        });

        sleep(Duration::from_millis(10)).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind client socket");
        client_socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let test_packet = Packet::RequestOwnership {
            subject: 7,
            requester: 1,
        };
        let serialized = encode(&test_packet).unwrap();

        client_socket.send_to(&serialized, server_addr).unwrap();

        let mut buf = [0; 2048];
        let (size, _) = client_socket.recv_from(&mut buf).unwrap();
        let received = decode(&buf[..size]).unwrap();

        match received {
            Packet::RequestOwnership { subject, requester } => {
                assert_eq!(subject, 7);
                assert_eq!(requester, 1);
            }
            _ => panic!("Wrong packet type received"),
        }
    }
}
