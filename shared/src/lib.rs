//! Protocol core shared by the authority server and client peers.
//!
//! Everything peers must agree on lives here: the wire codec, the callback
//! registry and dispatcher, the ownership state machine, the position
//! synchronization algorithm, and the `Token` piece that exercises them.

pub mod dispatch;
pub mod error;
pub mod math;
pub mod ownership;
pub mod position;
pub mod registry;
pub mod timer;
pub mod token;
pub mod wire;

/// Process-unique identifier for a replicated entity, assigned by the
/// authority at spawn and never reused while any peer references it.
pub type ObjectId = u32;

/// Identifier for a connected peer, assigned by the authority at connect.
pub type PeerId = u32;

/// Stable numeric id for a registered callback.
pub type CallbackId = u16;

pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single encoded datagram.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Position broadcasts per second while owning an object.
pub const DEFAULT_SEND_RATE: u32 = 9;

/// Movement updates further away than this snap instead of interpolating.
pub const DEFAULT_SNAP_THRESHOLD: f32 = 5.0;

/// Distance at which a waypoint counts as reached.
pub const WAYPOINT_EPSILON: f32 = 1e-3;

/// Rotation lerp speed for tokens, in degrees per second.
pub const TOKEN_ROTATE_SPEED: f32 = 120.0;

/// Seconds a peer waits for an ownership confirmation before dropping its
/// optimistic local claim.
pub const OWNERSHIP_REQUEST_TIMEOUT: f32 = 3.0;
