//! Position synchronization: coarse periodic waypoints plus velocity
//! estimation, instead of raw position spam at every tick.
//!
//! The owner samples its own motion into a rolling buffer and condenses it
//! to one `Waypoint{target, velocity}` per send interval, recomputed from
//! the motion that actually happened. Non-owners walk a FIFO of waypoints,
//! snapping across large jumps and otherwise moving at the given velocity.
//! A late joiner simply resumes from the latest waypoint.

use crate::math::Vec3;
use crate::{ObjectId, WAYPOINT_EPSILON};
use std::collections::VecDeque;

/// One observation of the owner's own position. Ephemeral; retained only
/// long enough to compute an outgoing velocity estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub position: Vec3,
    pub timestamp: f32,
}

/// A replicated motion intent: reach `target` moving at `velocity`.
///
/// A velocity of zero means "set directly": the follower applies the target
/// without interpolating. Used for the exact-position broadcast at
/// ownership hand-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub object_id: ObjectId,
    pub target: Vec3,
    pub velocity: f32,
}

/// Owner-side sampling and broadcast pacing for one object.
#[derive(Debug)]
pub struct PositionBroadcaster {
    object_id: ObjectId,
    samples: Vec<PositionSample>,
    send_interval: f32,
    last_broadcast: f32,
}

impl PositionBroadcaster {
    pub fn new(object_id: ObjectId, send_rate: u32) -> PositionBroadcaster {
        PositionBroadcaster {
            object_id,
            samples: Vec::new(),
            send_interval: 1.0 / send_rate.max(1) as f32,
            last_broadcast: f32::NEG_INFINITY,
        }
    }

    /// Records the owner's current position. Call once per tick.
    pub fn record(&mut self, position: Vec3, now: f32) {
        self.samples.push(PositionSample {
            position,
            timestamp: now,
        });
    }

    /// Condenses the buffer into a waypoint once per send interval.
    ///
    /// Returns `None` between intervals and when there was no net movement
    /// since the last broadcast. Either way the buffer is cleared when the
    /// interval elapses.
    pub fn poll(&mut self, now: f32) -> Option<Waypoint> {
        if now - self.last_broadcast < self.send_interval {
            return None;
        }
        self.last_broadcast = now;

        let samples = std::mem::take(&mut self.samples);
        let start = *samples.first()?;
        let end = *samples.last()?;

        // The earliest sample already at the final position marks the moment
        // the object stopped moving; anything after it is idle tail.
        let arrival = samples
            .iter()
            .find(|sample| sample.position == end.position)
            .copied()
            .unwrap_or(end);

        if start.position == end.position {
            // No net movement since the last broadcast.
            return None;
        }

        let mut elapsed = arrival.timestamp - start.timestamp;
        if elapsed <= 0.0 {
            elapsed = self.send_interval;
        }

        Some(Waypoint {
            object_id: self.object_id,
            target: end.position,
            velocity: start.position.distance(&end.position) / elapsed,
        })
    }

    /// The forced final broadcast at ownership release: the exact released
    /// position, applied directly on every other peer to avoid drift at
    /// hand-off.
    pub fn release(&mut self, position: Vec3) -> Waypoint {
        self.samples.clear();
        Waypoint {
            object_id: self.object_id,
            target: position,
            velocity: 0.0,
        }
    }

    #[cfg(test)]
    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Non-owner side: walks the received waypoints in order.
#[derive(Debug)]
pub struct WaypointFollower {
    queue: VecDeque<Waypoint>,
    snap_threshold: f32,
}

impl WaypointFollower {
    pub fn new(snap_threshold: f32) -> WaypointFollower {
        WaypointFollower {
            queue: VecDeque::new(),
            snap_threshold,
        }
    }

    pub fn enqueue(&mut self, waypoint: Waypoint) {
        self.queue.push_back(waypoint);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Advances `position` through the queue by `dt` seconds and returns the
    /// new position.
    ///
    /// A waypoint further away than the snap threshold (or carrying zero
    /// velocity) is applied directly; otherwise the position moves at the
    /// waypoint's velocity and the waypoint is dequeued on arrival, with any
    /// leftover time spent on the next one.
    pub fn advance(&mut self, position: Vec3, dt: f32) -> Vec3 {
        let mut position = position;
        let mut remaining = dt;

        while let Some(waypoint) = self.queue.front().copied() {
            let dist = position.distance(&waypoint.target);

            if dist <= WAYPOINT_EPSILON {
                position = waypoint.target;
                self.queue.pop_front();
                continue;
            }

            if waypoint.velocity <= 0.0 || dist > self.snap_threshold {
                position = waypoint.target;
                self.queue.pop_front();
                continue;
            }

            if remaining <= 0.0 {
                break;
            }

            let reachable = waypoint.velocity * remaining;
            if reachable + WAYPOINT_EPSILON >= dist {
                position = waypoint.target;
                remaining -= dist / waypoint.velocity;
                self.queue.pop_front();
            } else {
                position = position.move_toward(&waypoint.target, reachable);
                remaining = 0.0;
            }
        }

        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn wp(x: f32, velocity: f32) -> Waypoint {
        Waypoint {
            object_id: 1,
            target: Vec3::new(x, 0.0, 0.0),
            velocity,
        }
    }

    #[test]
    fn test_broadcaster_paces_to_send_interval() {
        let mut broadcaster = PositionBroadcaster::new(1, 10);
        broadcaster.record(Vec3::new(0.0, 0.0, 0.0), 0.0);
        broadcaster.record(Vec3::new(1.0, 0.0, 0.0), 0.05);
        assert!(broadcaster.poll(0.05).is_some());

        // interval is 0.1s; too soon after the previous broadcast
        broadcaster.record(Vec3::new(2.0, 0.0, 0.0), 0.08);
        assert!(broadcaster.poll(0.08).is_none());
        assert!(broadcaster.sample_count() > 0);

        broadcaster.record(Vec3::new(3.0, 0.0, 0.0), 0.16);
        assert!(broadcaster.poll(0.16).is_some());
    }

    #[test]
    fn test_broadcaster_emits_waypoint_with_velocity() {
        let mut broadcaster = PositionBroadcaster::new(1, 9);
        // moving 6 units over 0.6 seconds
        for step in 0..=6 {
            let t = step as f32 * 0.1;
            broadcaster.record(Vec3::new(step as f32, 0.0, 0.0), t);
        }

        let waypoint = broadcaster.poll(0.6).expect("movement should broadcast");
        assert_eq!(waypoint.target, Vec3::new(6.0, 0.0, 0.0));
        assert_approx_eq!(waypoint.velocity, 10.0, 0.01);
        assert_eq!(broadcaster.sample_count(), 0);
    }

    #[test]
    fn test_broadcaster_excludes_idle_tail_from_velocity() {
        let mut broadcaster = PositionBroadcaster::new(1, 9);
        // moves 5 units in 0.5s, then sits still for another 0.5s
        for step in 0..=5 {
            broadcaster.record(Vec3::new(step as f32, 0.0, 0.0), step as f32 * 0.1);
        }
        for step in 6..=10 {
            broadcaster.record(Vec3::new(5.0, 0.0, 0.0), step as f32 * 0.1);
        }

        let waypoint = broadcaster.poll(1.0).expect("movement should broadcast");
        assert_eq!(waypoint.target, Vec3::new(5.0, 0.0, 0.0));
        // velocity measured over the motion window, not the full interval
        assert_approx_eq!(waypoint.velocity, 10.0, 0.01);
    }

    #[test]
    fn test_broadcaster_suppresses_when_not_moving() {
        let mut broadcaster = PositionBroadcaster::new(1, 9);
        let position = Vec3::new(2.0, 2.0, 0.0);
        for step in 0..10 {
            broadcaster.record(position, step as f32 * 0.05);
        }

        assert!(broadcaster.poll(0.5).is_none());
        // the buffer is still cleared for the next interval
        assert_eq!(broadcaster.sample_count(), 0);
    }

    #[test]
    fn test_broadcaster_release_is_exact_and_direct() {
        let mut broadcaster = PositionBroadcaster::new(1, 9);
        broadcaster.record(Vec3::new(1.0, 0.0, 0.0), 0.0);

        let waypoint = broadcaster.release(Vec3::new(1.5, 0.0, 0.0));
        assert_eq!(waypoint.target, Vec3::new(1.5, 0.0, 0.0));
        assert_eq!(waypoint.velocity, 0.0);
        assert_eq!(broadcaster.sample_count(), 0);
    }

    #[test]
    fn test_follower_snaps_across_large_jumps() {
        let mut follower = WaypointFollower::new(5.0);
        follower.enqueue(wp(10.0, 1.0));

        let position = follower.advance(Vec3::default(), 0.01);
        assert_eq!(position, Vec3::new(10.0, 0.0, 0.0));
        assert!(follower.is_idle());
    }

    #[test]
    fn test_follower_interpolates_small_moves_without_overshoot() {
        let mut follower = WaypointFollower::new(5.0);
        follower.enqueue(wp(2.0, 1.0));

        let mut position = Vec3::default();
        // 1 unit/s toward a target 2 units away: not there after one second
        position = follower.advance(position, 1.0);
        assert_approx_eq!(position.x, 1.0, 1e-4);
        assert_eq!(follower.pending(), 1);

        // arrives during the second second, never past the target
        position = follower.advance(position, 1.5);
        assert_eq!(position, Vec3::new(2.0, 0.0, 0.0));
        assert!(follower.is_idle());
    }

    #[test]
    fn test_follower_carries_leftover_time_into_next_waypoint() {
        let mut follower = WaypointFollower::new(5.0);
        follower.enqueue(wp(1.0, 1.0));
        follower.enqueue(wp(3.0, 1.0));

        // 2.5 seconds at 1 unit/s: finish the first waypoint and get half
        // way through the second
        let position = follower.advance(Vec3::default(), 2.5);
        assert_approx_eq!(position.x, 2.5, 1e-3);
        assert_eq!(follower.pending(), 1);
    }

    #[test]
    fn test_follower_applies_zero_velocity_directly() {
        let mut follower = WaypointFollower::new(5.0);
        follower.enqueue(wp(1.5, 0.0));

        let position = follower.advance(Vec3::default(), 0.0);
        assert_eq!(position, Vec3::new(1.5, 0.0, 0.0));
        assert!(follower.is_idle());
    }
}
