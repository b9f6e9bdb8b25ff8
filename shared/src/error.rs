//! Error taxonomy for the protocol core.
//!
//! None of these are process-fatal: every malformed-input path degrades to
//! "drop the envelope and log" so one misbehaving peer cannot crash another.

use crate::wire::TypeTag;
use crate::{CallbackId, ObjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The received callback id has no registered descriptor.
    #[error("unknown callback id {0}")]
    UnknownCallback(CallbackId),

    /// No callback registered under this (type, method) name.
    #[error("no callback registered for {type_name}.{method_name}")]
    UnknownMethod {
        type_name: String,
        method_name: String,
    },

    /// Deserialized argument count or types disagree with the descriptor.
    #[error("argument shape mismatch: expected {expected:?}, got {got:?}")]
    ArgumentShapeMismatch {
        expected: Vec<TypeTag>,
        got: Vec<TypeTag>,
    },

    /// The object id does not resolve to a live local instance. Expected
    /// transiently during spawn-order races.
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    /// Two distinct (type, method) pairs hashed to the same callback id.
    #[error("callback id {id} collides: already registered by {existing}, now requested by {incoming}")]
    IdCollision {
        id: CallbackId,
        existing: String,
        incoming: String,
    },

    /// A (type, method) pair was re-registered with a different signature.
    #[error("{name} re-registered with a different signature")]
    SignatureMismatch { name: String },

    #[error("packet encode failed: {0}")]
    Encode(#[source] bincode::Error),

    #[error("packet decode failed: {0}")]
    Decode(#[source] bincode::Error),

    /// Send or receive failure at the channel layer. Surfaced to the caller
    /// of invoke; the core does not retry.
    #[error("transport failure")]
    Transport,
}

impl ProtocolError {
    /// Builds an [`ProtocolError::ArgumentShapeMismatch`] from the expected
    /// signature and the actual argument list.
    pub fn shape_mismatch(expected: &[TypeTag], args: &[crate::wire::Value]) -> ProtocolError {
        ProtocolError::ArgumentShapeMismatch {
            expected: expected.to_vec(),
            got: args.iter().map(|v| v.tag()).collect(),
        }
    }
}
