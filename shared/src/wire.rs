//! Wire codec: the envelope carried by every command/rpc, the tagged
//! argument values it holds, and the datagram-level packet framing.

use crate::error::ProtocolError;
use crate::math::{Vec2, Vec3};
use crate::token::TokenSnapshot;
use crate::{CallbackId, ObjectId, PeerId};
use serde::{Deserialize, Serialize};

/// Type of a single callback argument, as declared in a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    I32,
    F32,
    Bool,
    Str,
    Vec2,
    Vec3,
    ObjectId,
}

/// A single tagged argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    Vec2(Vec2),
    Vec3(Vec3),
    ObjectId(ObjectId),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::I32(_) => TypeTag::I32,
            Value::F32(_) => TypeTag::F32,
            Value::Bool(_) => TypeTag::Bool,
            Value::Str(_) => TypeTag::Str,
            Value::Vec2(_) => TypeTag::Vec2,
            Value::Vec3(_) => TypeTag::Vec3,
            Value::ObjectId(_) => TypeTag::ObjectId,
        }
    }
}

/// The serialized unit carrying one callback invocation across the wire.
///
/// `args` must match the registered descriptor for `callback_id` exactly;
/// the receiver validates the shape before invoking anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub object_id: ObjectId,
    pub callback_id: CallbackId,
    pub args: Vec<Value>,
}

/// Everything that can travel between peers in one datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Connected {
        peer_id: PeerId,
        snapshot: Vec<TokenSnapshot>,
    },
    Disconnect,
    Disconnected {
        reason: String,
    },

    /// A command or rpc envelope, client -> authority or authority -> clients.
    Invoke(Envelope),

    RequestOwnership {
        subject: ObjectId,
        requester: PeerId,
    },
    ReleaseOwnership {
        subject: ObjectId,
        requester: PeerId,
    },
    /// Authoritative ownership record update, broadcast to all peers.
    OwnershipChanged {
        subject: ObjectId,
        owner: Option<PeerId>,
    },

    /// Replicated motion intent for one object.
    Waypoint {
        object_id: ObjectId,
        target: Vec3,
        velocity: f32,
    },

    Spawn {
        snapshot: TokenSnapshot,
    },
    Despawn {
        object_id: ObjectId,
    },
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(packet).map_err(ProtocolError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    bincode::deserialize(bytes).map_err(ProtocolError::Decode)
}
