//! The example replicated piece: a tabletop token.
//!
//! Tokens exist to exercise every dispatch flavor: predicted rpcs
//! (toggle, rotate, scale), a plain rpc bound through a trait capability
//! (flip), and an authority-only command (depth). Rendering is someone
//! else's problem; the model only tracks replicated state.

use crate::dispatch::Dispatcher;
use crate::error::ProtocolError;
use crate::math::{move_toward_f32, Vec3};
use crate::registry::CallbackKind;
use crate::wire::{TypeTag, Value};
use crate::{ObjectId, PeerId, TOKEN_ROTATE_SPEED};
use serde::{Deserialize, Serialize};

pub const TOKEN_TYPE: &str = "Token";

/// Anything that can be turned face-down/face-up over the network.
///
/// The registry binds the concrete implementation; there is no virtual
/// dispatch chain behind a networked method.
pub trait Flippable {
    fn flip_over(&mut self);
}

/// State-change notification published by a token mutation, for observers
/// (views, logs) to react to. Mutating methods push these instead of
/// hiding side effects in setters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenEvent {
    Toggled(bool),
    RotationTargetChanged(f32),
    Scaled(f32),
    Flipped(bool),
    DepthChanged(i32),
}

/// Full per-object state, sent at spawn and to late joiners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub object_id: ObjectId,
    pub position: Vec3,
    pub angle: f32,
    pub scale: f32,
    pub is_toggled: bool,
    pub is_face_up: bool,
    pub depth: i32,
    pub owner: Option<PeerId>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub object_id: ObjectId,
    pub position: Vec3,
    current_angle: f32,
    target_angle: f32,
    pub rotate_speed: f32,
    pub scale: f32,
    pub is_toggled: bool,
    pub is_face_up: bool,
    pub depth: i32,
    events: Vec<TokenEvent>,
}

impl Token {
    pub fn new(object_id: ObjectId, position: Vec3) -> Token {
        Token {
            object_id,
            position,
            current_angle: 0.0,
            target_angle: 0.0,
            rotate_speed: TOKEN_ROTATE_SPEED,
            scale: 1.0,
            is_toggled: false,
            is_face_up: true,
            depth: 0,
            events: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: &TokenSnapshot) -> Token {
        Token {
            object_id: snapshot.object_id,
            position: snapshot.position,
            // show the correct rotation without lerping to it
            current_angle: snapshot.angle,
            target_angle: snapshot.angle,
            rotate_speed: TOKEN_ROTATE_SPEED,
            scale: snapshot.scale,
            is_toggled: snapshot.is_toggled,
            is_face_up: snapshot.is_face_up,
            depth: snapshot.depth,
            events: Vec::new(),
        }
    }

    /// Snapshot without ownership; the caller fills `owner` from the
    /// arbiter, which is the only component allowed to know it.
    pub fn snapshot(&self, owner: Option<PeerId>) -> TokenSnapshot {
        TokenSnapshot {
            object_id: self.object_id,
            position: self.position,
            angle: self.target_angle,
            scale: self.scale,
            is_toggled: self.is_toggled,
            is_face_up: self.is_face_up,
            depth: self.depth,
            owner,
        }
    }

    pub fn toggle_color(&mut self) {
        self.is_toggled = !self.is_toggled;
        self.events.push(TokenEvent::Toggled(self.is_toggled));
    }

    /// Starts a smooth rotation by `degrees` from the current target.
    pub fn rotate_by(&mut self, degrees: f32) {
        self.target_angle += degrees;
        self.events
            .push(TokenEvent::RotationTargetChanged(self.target_angle));
    }

    pub fn scale_by(&mut self, percent: f32) {
        self.scale *= 1.0 + percent;
        self.events.push(TokenEvent::Scaled(self.scale));
    }

    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
        self.events.push(TokenEvent::DepthChanged(depth));
    }

    pub fn angle(&self) -> f32 {
        self.current_angle
    }

    pub fn target_angle(&self) -> f32 {
        self.target_angle
    }

    pub fn is_rotating(&self) -> bool {
        self.current_angle != self.target_angle
    }

    /// Advances the rotation lerp by `dt` seconds at a fixed speed.
    pub fn tick(&mut self, dt: f32) {
        if self.is_rotating() {
            self.current_angle =
                move_toward_f32(self.current_angle, self.target_angle, self.rotate_speed * dt);
        }
    }

    /// Drains pending change notifications for observers.
    pub fn take_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Flippable for Token {
    fn flip_over(&mut self) {
        self.is_face_up = !self.is_face_up;
        self.events.push(TokenEvent::Flipped(self.is_face_up));
    }
}

mod handlers {
    use super::*;

    pub fn toggle_color(token: &mut Token, args: &[Value]) -> Result<(), ProtocolError> {
        match args {
            [] => {
                token.toggle_color();
                Ok(())
            }
            _ => Err(ProtocolError::shape_mismatch(&[], args)),
        }
    }

    pub fn rotate(token: &mut Token, args: &[Value]) -> Result<(), ProtocolError> {
        match args {
            [Value::F32(degrees)] => {
                token.rotate_by(*degrees);
                Ok(())
            }
            _ => Err(ProtocolError::shape_mismatch(&[TypeTag::F32], args)),
        }
    }

    pub fn scale(token: &mut Token, args: &[Value]) -> Result<(), ProtocolError> {
        match args {
            [Value::F32(percent)] => {
                token.scale_by(*percent);
                Ok(())
            }
            _ => Err(ProtocolError::shape_mismatch(&[TypeTag::F32], args)),
        }
    }

    pub fn flip_over(token: &mut Token, args: &[Value]) -> Result<(), ProtocolError> {
        match args {
            [] => {
                Flippable::flip_over(token);
                Ok(())
            }
            _ => Err(ProtocolError::shape_mismatch(&[], args)),
        }
    }

    pub fn set_depth(token: &mut Token, args: &[Value]) -> Result<(), ProtocolError> {
        match args {
            [Value::I32(depth)] => {
                token.set_depth(*depth);
                Ok(())
            }
            _ => Err(ProtocolError::shape_mismatch(&[TypeTag::I32], args)),
        }
    }
}

/// Builds the full descriptor table for tokens. Every peer calls this at
/// startup, so all peers hold identical id -> signature mappings with no
/// runtime negotiation.
pub fn register_callbacks(dispatcher: &mut Dispatcher<Token>) -> Result<(), ProtocolError> {
    dispatcher.register(
        TOKEN_TYPE,
        "ToggleColor",
        vec![],
        CallbackKind::Rpc,
        true,
        handlers::toggle_color,
    )?;
    dispatcher.register(
        TOKEN_TYPE,
        "Rotate",
        vec![TypeTag::F32],
        CallbackKind::Rpc,
        true,
        handlers::rotate,
    )?;
    dispatcher.register(
        TOKEN_TYPE,
        "Scale",
        vec![TypeTag::F32],
        CallbackKind::Rpc,
        true,
        handlers::scale,
    )?;
    dispatcher.register(
        TOKEN_TYPE,
        "FlipOver",
        vec![],
        CallbackKind::Rpc,
        false,
        handlers::flip_over,
    )?;
    dispatcher.register(
        TOKEN_TYPE,
        "SetDepth",
        vec![TypeTag::I32],
        CallbackKind::Command,
        false,
        handlers::set_depth,
    )?;
    Ok(())
}
