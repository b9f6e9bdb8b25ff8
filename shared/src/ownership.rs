//! Per-object distributed mutex, arbitrated at the authority.
//!
//! The arbiter is the single writer of ownership records. A denied request
//! or release is silent: the caller never receives a confirming broadcast,
//! and distinguishes "denied" from "lost packet" only by timeout.

use crate::{ObjectId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Replicated ownership state for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub object_id: ObjectId,
    pub owner: Option<PeerId>,
}

/// Result of applying a request or release at the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record changed; broadcast it to all peers.
    Changed(OwnershipRecord),
    /// Denied or no-op; nothing is broadcast.
    Unchanged,
}

/// Authority-side ownership state machine for every tracked object.
#[derive(Debug, Default)]
pub struct OwnershipArbiter {
    records: HashMap<ObjectId, Option<PeerId>>,
}

impl OwnershipArbiter {
    pub fn new() -> OwnershipArbiter {
        OwnershipArbiter::default()
    }

    /// Starts tracking an object as unowned. Called at spawn.
    pub fn track(&mut self, object_id: ObjectId) {
        self.records.entry(object_id).or_insert(None);
    }

    /// Stops tracking an object. Called at despawn.
    pub fn forget(&mut self, object_id: ObjectId) {
        self.records.remove(&object_id);
    }

    pub fn owner(&self, object_id: ObjectId) -> Option<PeerId> {
        self.records.get(&object_id).copied().flatten()
    }

    pub fn is_owner(&self, object_id: ObjectId, peer: PeerId) -> bool {
        self.owner(object_id) == Some(peer)
    }

    pub fn tracked(&self, object_id: ObjectId) -> bool {
        self.records.contains_key(&object_id)
    }

    /// `Unowned -> Owned(peer)`. Same-peer re-requests are no-ops; requests
    /// against another owner are denied. Never preempts.
    pub fn request(&mut self, object_id: ObjectId, peer: PeerId) -> Transition {
        match self.records.get_mut(&object_id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(peer);
                Transition::Changed(OwnershipRecord {
                    object_id,
                    owner: Some(peer),
                })
            }
            _ => Transition::Unchanged,
        }
    }

    /// `Owned(peer) -> Unowned`. A peer cannot release another's ownership.
    pub fn release(&mut self, object_id: ObjectId, peer: PeerId) -> Transition {
        match self.records.get_mut(&object_id) {
            Some(slot) if *slot == Some(peer) => {
                *slot = None;
                Transition::Changed(OwnershipRecord {
                    object_id,
                    owner: None,
                })
            }
            _ => Transition::Unchanged,
        }
    }

    /// Releases everything a disconnecting peer still holds, returning the
    /// records to broadcast.
    pub fn release_all_for(&mut self, peer: PeerId) -> Vec<OwnershipRecord> {
        let mut released = Vec::new();
        for (&object_id, slot) in self.records.iter_mut() {
            if *slot == Some(peer) {
                *slot = None;
                released.push(OwnershipRecord {
                    object_id,
                    owner: None,
                });
            }
        }
        released
    }
}

/// A client's view of one object's ownership: the last authoritative value,
/// plus an optimistic local override while a request is in flight.
///
/// The override is provisional. It is cleared by the next authoritative
/// broadcast, or reverted by the integrator's timeout policy when no
/// broadcast arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnershipView {
    authoritative: Option<PeerId>,
    predicted: Option<Option<PeerId>>,
}

impl OwnershipView {
    pub fn new(owner: Option<PeerId>) -> OwnershipView {
        OwnershipView {
            authoritative: owner,
            predicted: None,
        }
    }

    /// The owner as this peer currently believes it to be.
    pub fn owner(&self) -> Option<PeerId> {
        self.predicted.unwrap_or(self.authoritative)
    }

    pub fn is_owned_by(&self, peer: PeerId) -> bool {
        self.owner() == Some(peer)
    }

    pub fn is_unowned(&self) -> bool {
        self.owner().is_none()
    }

    /// Optimistically assume an owner the moment a request or release is
    /// sent, before the authority answers.
    pub fn predict(&mut self, owner: Option<PeerId>) {
        self.predicted = Some(owner);
    }

    pub fn has_prediction(&self) -> bool {
        self.predicted.is_some()
    }

    /// Applies an authoritative broadcast, discarding any local prediction.
    pub fn apply_authoritative(&mut self, owner: Option<PeerId>) {
        self.authoritative = owner;
        self.predicted = None;
    }

    /// Drops the optimistic override without new authoritative input, e.g.
    /// when a request timed out unanswered.
    pub fn revert(&mut self) {
        self.predicted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_grants_when_unowned() {
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);

        let transition = arbiter.request(7, 1);
        assert_eq!(
            transition,
            Transition::Changed(OwnershipRecord {
                object_id: 7,
                owner: Some(1)
            })
        );
        assert_eq!(arbiter.owner(7), Some(1));
    }

    #[test]
    fn test_request_same_peer_is_a_noop() {
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);
        arbiter.request(7, 1);

        assert_eq!(arbiter.request(7, 1), Transition::Unchanged);
        assert_eq!(arbiter.owner(7), Some(1));
    }

    #[test]
    fn test_request_never_preempts() {
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);
        arbiter.request(7, 1);

        assert_eq!(arbiter.request(7, 2), Transition::Unchanged);
        assert_eq!(arbiter.owner(7), Some(1));
    }

    #[test]
    fn test_release_requires_matching_owner() {
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);
        arbiter.request(7, 1);

        assert_eq!(arbiter.release(7, 2), Transition::Unchanged);
        assert_eq!(arbiter.owner(7), Some(1));

        assert_eq!(
            arbiter.release(7, 1),
            Transition::Changed(OwnershipRecord {
                object_id: 7,
                owner: None
            })
        );
        assert_eq!(arbiter.owner(7), None);
    }

    #[test]
    fn test_release_when_unowned_is_denied() {
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);
        assert_eq!(arbiter.release(7, 1), Transition::Unchanged);
    }

    #[test]
    fn test_request_untracked_object_is_denied() {
        let mut arbiter = OwnershipArbiter::new();
        assert_eq!(arbiter.request(99, 1), Transition::Unchanged);
        assert!(!arbiter.tracked(99));
    }

    #[test]
    fn test_contested_sequence() {
        // A requests (granted), B requests (denied), A releases, B requests
        // (granted): Unowned -> Owned(A) -> Unowned -> Owned(B).
        let mut arbiter = OwnershipArbiter::new();
        arbiter.track(7);

        assert!(matches!(arbiter.request(7, 1), Transition::Changed(_)));
        assert_eq!(arbiter.request(7, 2), Transition::Unchanged);
        assert!(matches!(arbiter.release(7, 1), Transition::Changed(_)));
        assert!(matches!(arbiter.request(7, 2), Transition::Changed(_)));
        assert_eq!(arbiter.owner(7), Some(2));
    }

    #[test]
    fn test_release_all_for_disconnecting_peer() {
        let mut arbiter = OwnershipArbiter::new();
        for id in [1, 2, 3] {
            arbiter.track(id);
        }
        arbiter.request(1, 5);
        arbiter.request(3, 5);
        arbiter.request(2, 6);

        let mut released = arbiter.release_all_for(5);
        released.sort_by_key(|record| record.object_id);

        assert_eq!(released.len(), 2);
        assert_eq!(released[0].object_id, 1);
        assert_eq!(released[1].object_id, 3);
        assert_eq!(arbiter.owner(1), None);
        assert_eq!(arbiter.owner(2), Some(6));
        assert_eq!(arbiter.owner(3), None);
    }

    #[test]
    fn test_view_prediction_and_correction() {
        let mut view = OwnershipView::new(None);
        assert!(view.is_unowned());

        // optimistic lock on send
        view.predict(Some(3));
        assert!(view.is_owned_by(3));

        // authority disagrees: correction wins
        view.apply_authoritative(Some(8));
        assert!(view.is_owned_by(8));
        assert!(!view.has_prediction());
    }

    #[test]
    fn test_view_revert_on_timeout() {
        let mut view = OwnershipView::new(Some(2));
        view.predict(Some(3));
        view.revert();
        assert!(view.is_owned_by(2));
    }
}
