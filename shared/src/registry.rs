//! Callback registry: maps a (type, method) pair to a stable numeric id,
//! its parameter signature, and its dispatch flavor.
//!
//! Ids are a deterministic hash of `"TypeName.MethodName"`, so peers built
//! from the same source compute identical ids without negotiation. The
//! registry rejects hash collisions at registration time instead of letting
//! two unrelated methods silently share an id.

use crate::error::ProtocolError;
use crate::wire::{TypeTag, Value};
use crate::CallbackId;
use std::collections::HashMap;

/// Whether a callback runs only on the authority or on every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Executes on the authority only.
    Command,
    /// Executes on every peer; the authority re-broadcasts client calls.
    Rpc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackDescriptor {
    pub id: CallbackId,
    pub kind: CallbackKind,
    /// When set, the invoking peer runs the callback immediately, before
    /// the network round trip, and the authority excludes it from the
    /// re-broadcast.
    pub predicted: bool,
    pub param_types: Vec<TypeTag>,
}

impl CallbackDescriptor {
    /// Validates an argument list against this descriptor's signature.
    pub fn check_args(&self, args: &[Value]) -> Result<(), ProtocolError> {
        if args.len() != self.param_types.len()
            || args
                .iter()
                .zip(self.param_types.iter())
                .any(|(value, tag)| value.tag() != *tag)
        {
            return Err(ProtocolError::shape_mismatch(&self.param_types, args));
        }
        Ok(())
    }
}

/// Computes the stable callback id for a (type, method) pair.
///
/// FNV-1a over `"TypeName.MethodName"`, folded to 16 bits.
pub fn callback_id(type_name: &str, method_name: &str) -> CallbackId {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in type_name
        .bytes()
        .chain(std::iter::once(b'.'))
        .chain(method_name.bytes())
    {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    ((hash >> 16) ^ (hash & 0xffff)) as CallbackId
}

fn qualified(type_name: &str, method_name: &str) -> String {
    format!("{}.{}", type_name, method_name)
}

#[derive(Debug, Default)]
pub struct CallbackRegistry {
    by_id: HashMap<CallbackId, CallbackDescriptor>,
    by_name: HashMap<String, CallbackId>,
    names: HashMap<CallbackId, String>,
}

impl CallbackRegistry {
    pub fn new() -> CallbackRegistry {
        CallbackRegistry::default()
    }

    /// Registers a callback and returns its descriptor.
    ///
    /// Idempotent per (type, method): re-registering with the same signature
    /// returns the existing descriptor. Registering a different signature
    /// under an existing name, or colliding with another name's id, is an
    /// error.
    pub fn register(
        &mut self,
        type_name: &str,
        method_name: &str,
        param_types: Vec<TypeTag>,
        kind: CallbackKind,
        predicted: bool,
    ) -> Result<CallbackDescriptor, ProtocolError> {
        let name = qualified(type_name, method_name);

        if let Some(&existing_id) = self.by_name.get(&name) {
            let existing = &self.by_id[&existing_id];
            if existing.param_types != param_types
                || existing.kind != kind
                || existing.predicted != predicted
            {
                return Err(ProtocolError::SignatureMismatch { name });
            }
            return Ok(existing.clone());
        }

        let id = callback_id(type_name, method_name);
        if let Some(existing_name) = self.names.get(&id) {
            return Err(ProtocolError::IdCollision {
                id,
                existing: existing_name.clone(),
                incoming: name,
            });
        }

        let descriptor = CallbackDescriptor {
            id,
            kind,
            predicted,
            param_types,
        };
        self.by_id.insert(id, descriptor.clone());
        self.by_name.insert(name.clone(), id);
        self.names.insert(id, name);
        Ok(descriptor)
    }

    pub fn resolve(&self, id: CallbackId) -> Option<&CallbackDescriptor> {
        self.by_id.get(&id)
    }

    pub fn resolve_name(&self, type_name: &str, method_name: &str) -> Option<&CallbackDescriptor> {
        self.by_name
            .get(&qualified(type_name, method_name))
            .and_then(|id| self.by_id.get(id))
    }

    /// The qualified name registered under an id, for log messages.
    pub fn name_of(&self, id: CallbackId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_id_is_deterministic() {
        let a = callback_id("Token", "ToggleColor");
        let b = callback_id("Token", "ToggleColor");
        assert_eq!(a, b);
        assert_ne!(a, callback_id("Token", "Rotate"));
        assert_ne!(a, callback_id("Card", "ToggleColor"));
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = CallbackRegistry::new();
        let descriptor = registry
            .register(
                "Token",
                "Rotate",
                vec![TypeTag::F32],
                CallbackKind::Rpc,
                true,
            )
            .unwrap();

        assert_eq!(descriptor.id, callback_id("Token", "Rotate"));
        assert_eq!(registry.resolve(descriptor.id), Some(&descriptor));
        assert_eq!(registry.resolve_name("Token", "Rotate"), Some(&descriptor));
        assert_eq!(registry.name_of(descriptor.id), Some("Token.Rotate"));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = CallbackRegistry::new();
        let first = registry
            .register("Token", "FlipOver", vec![], CallbackKind::Rpc, false)
            .unwrap();
        let second = registry
            .register("Token", "FlipOver", vec![], CallbackKind::Rpc, false)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_signature_change_is_rejected() {
        let mut registry = CallbackRegistry::new();
        registry
            .register("Token", "Scale", vec![TypeTag::F32], CallbackKind::Rpc, true)
            .unwrap();
        let result = registry.register(
            "Token",
            "Scale",
            vec![TypeTag::I32],
            CallbackKind::Rpc,
            true,
        );
        assert!(matches!(
            result,
            Err(ProtocolError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_resolving_unknown_id_is_none() {
        let registry = CallbackRegistry::new();
        assert!(registry.resolve(0xbeef).is_none());
    }

    #[test]
    fn test_check_args_accepts_matching_shape() {
        let descriptor = CallbackDescriptor {
            id: 1,
            kind: CallbackKind::Rpc,
            predicted: false,
            param_types: vec![TypeTag::F32, TypeTag::Bool],
        };
        assert!(descriptor
            .check_args(&[Value::F32(1.0), Value::Bool(true)])
            .is_ok());
    }

    #[test]
    fn test_check_args_rejects_wrong_count_and_type() {
        let descriptor = CallbackDescriptor {
            id: 1,
            kind: CallbackKind::Rpc,
            predicted: false,
            param_types: vec![TypeTag::F32],
        };
        assert!(descriptor.check_args(&[]).is_err());
        assert!(descriptor.check_args(&[Value::I32(1)]).is_err());
        assert!(descriptor
            .check_args(&[Value::F32(1.0), Value::F32(2.0)])
            .is_err());
    }
}
