//! Dispatcher: routes envelopes to handlers bound at startup.
//!
//! Handlers are plain function pointers registered per concrete object type,
//! so the whole callback surface is known at startup and a collision is a
//! registration error rather than a runtime surprise. No reflection, no
//! inheritance chains.

use crate::error::ProtocolError;
use crate::registry::{CallbackDescriptor, CallbackKind, CallbackRegistry};
use crate::wire::{Envelope, TypeTag, Value};
use crate::{CallbackId, ObjectId, PeerId};
use std::collections::{HashMap, HashSet};

/// Identity of the local peer, threaded through dispatch instead of a
/// global singleton so multiple simulated peers can coexist in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerContext {
    pub peer_id: PeerId,
    pub is_authority: bool,
}

impl PeerContext {
    pub fn authority() -> PeerContext {
        PeerContext {
            peer_id: 0,
            is_authority: true,
        }
    }

    pub fn client(peer_id: PeerId) -> PeerContext {
        PeerContext {
            peer_id,
            is_authority: false,
        }
    }
}

/// A bound callback implementation for object type `T`.
///
/// The argument shape has already been validated against the descriptor when
/// a handler runs; handlers still match the slice to destructure it.
pub type Handler<T> = fn(&mut T, &[Value]) -> Result<(), ProtocolError>;

/// The live object instances addressable on this peer.
#[derive(Debug, Default)]
pub struct World<T> {
    objects: HashMap<ObjectId, T>,
}

impl<T> World<T> {
    pub fn new() -> World<T> {
        World {
            objects: HashMap::new(),
        }
    }

    pub fn insert(&mut self, object_id: ObjectId, object: T) {
        self.objects.insert(object_id, object);
    }

    pub fn remove(&mut self, object_id: ObjectId) -> Option<T> {
        self.objects.remove(&object_id)
    }

    pub fn get(&self, object_id: ObjectId) -> Option<&T> {
        self.objects.get(&object_id)
    }

    pub fn get_mut(&mut self, object_id: ObjectId) -> Option<&mut T> {
        self.objects.get_mut(&object_id)
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &T)> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ObjectId, &mut T)> {
        self.objects.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Routes envelopes between the registry and the bound handlers for one
/// object type.
pub struct Dispatcher<T> {
    registry: CallbackRegistry,
    handlers: HashMap<CallbackId, Handler<T>>,
}

impl<T> Dispatcher<T> {
    pub fn new() -> Dispatcher<T> {
        Dispatcher {
            registry: CallbackRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Registers a callback and binds its handler in one step.
    pub fn register(
        &mut self,
        type_name: &str,
        method_name: &str,
        param_types: Vec<TypeTag>,
        kind: CallbackKind,
        predicted: bool,
        handler: Handler<T>,
    ) -> Result<CallbackDescriptor, ProtocolError> {
        let descriptor = self
            .registry
            .register(type_name, method_name, param_types, kind, predicted)?;
        self.handlers.insert(descriptor.id, handler);
        Ok(descriptor)
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Caller side: resolves a method by name, validates the arguments, runs
    /// the local prediction when the callback is marked predicted, and
    /// returns the envelope ready for the transport.
    pub fn prepare_invoke(
        &self,
        world: &mut World<T>,
        object_id: ObjectId,
        type_name: &str,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<(Envelope, CallbackDescriptor), ProtocolError> {
        let descriptor = self
            .registry
            .resolve_name(type_name, method_name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownMethod {
                type_name: type_name.to_string(),
                method_name: method_name.to_string(),
            })?;
        descriptor.check_args(&args)?;

        let envelope = Envelope {
            object_id,
            callback_id: descriptor.id,
            args,
        };

        self.run_if_predicted(world, &envelope)?;

        Ok((envelope, descriptor))
    }

    /// Prediction executor: runs the callback immediately on this peer if
    /// its descriptor is marked predicted. Returns whether it ran.
    pub fn run_if_predicted(
        &self,
        world: &mut World<T>,
        envelope: &Envelope,
    ) -> Result<bool, ProtocolError> {
        let descriptor = self
            .registry
            .resolve(envelope.callback_id)
            .ok_or(ProtocolError::UnknownCallback(envelope.callback_id))?;
        if !descriptor.predicted {
            return Ok(false);
        }
        self.invoke_handler(world, envelope)?;
        Ok(true)
    }

    /// Receiver side: resolves the descriptor, validates the argument shape,
    /// finds the addressed instance, and invokes the bound handler.
    ///
    /// Returns the descriptor so the authority can decide forwarding.
    pub fn dispatch(
        &self,
        world: &mut World<T>,
        envelope: &Envelope,
    ) -> Result<CallbackDescriptor, ProtocolError> {
        let descriptor = self.check_envelope(envelope)?;
        self.invoke_handler(world, envelope)?;
        Ok(descriptor)
    }

    /// Validates an envelope without invoking anything. The authority uses
    /// this before forwarding so malformed envelopes are never propagated.
    pub fn check_envelope(&self, envelope: &Envelope) -> Result<CallbackDescriptor, ProtocolError> {
        let descriptor = self
            .registry
            .resolve(envelope.callback_id)
            .ok_or(ProtocolError::UnknownCallback(envelope.callback_id))?;
        descriptor.check_args(&envelope.args)?;
        Ok(descriptor.clone())
    }

    fn invoke_handler(&self, world: &mut World<T>, envelope: &Envelope) -> Result<(), ProtocolError> {
        let handler = self
            .handlers
            .get(&envelope.callback_id)
            .ok_or(ProtocolError::UnknownCallback(envelope.callback_id))?;
        let object = world
            .get_mut(envelope.object_id)
            .ok_or(ProtocolError::ObjectNotFound(envelope.object_id))?;
        handler(object, &envelope.args)
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Dispatcher<T> {
        Dispatcher::new()
    }
}

/// The connections the authority must NOT forward a client-originated rpc
/// back to: its own loopback connections, plus the original sender when the
/// callback already ran there under prediction.
pub fn forward_exclusions(
    descriptor: &CallbackDescriptor,
    sender: PeerId,
    local_connections: &HashSet<PeerId>,
) -> HashSet<PeerId> {
    let mut exclusions = local_connections.clone();
    if descriptor.predicted {
        exclusions.insert(sender);
    }
    exclusions
}
