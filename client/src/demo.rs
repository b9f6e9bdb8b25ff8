//! Scripted stand-in for player input: grabs a token, drags it along an
//! arc, releases it, then pokes the rpc callbacks once each.

use crate::replica::Replica;
use log::info;
use shared::math::Vec3;
use shared::wire::Value;
use shared::ObjectId;

const DRAG_SECONDS: f32 = 1.5;
const DRAG_SPEED: f32 = 2.0;

#[derive(Debug)]
enum Stage {
    PickTarget,
    Grab { object_id: ObjectId },
    Drag { object_id: ObjectId, elapsed: f32 },
    Poke { object_id: ObjectId },
    Done,
}

pub struct DemoScript {
    stage: Stage,
}

impl DemoScript {
    pub fn new() -> DemoScript {
        DemoScript {
            stage: Stage::PickTarget,
        }
    }

    /// Advances the script by one tick. Returns true once finished.
    pub fn step(&mut self, replica: &mut Replica, dt: f32) -> bool {
        match &mut self.stage {
            Stage::PickTarget => {
                if let Some(&object_id) = replica.object_ids().first() {
                    info!("Demo: picking token {}", object_id);
                    self.stage = Stage::Grab { object_id };
                }
            }
            Stage::Grab { object_id } => {
                let object_id = *object_id;
                replica.begin_movement(object_id);
                self.stage = Stage::Drag {
                    object_id,
                    elapsed: 0.0,
                };
            }
            Stage::Drag { object_id, elapsed } => {
                let object_id = *object_id;
                *elapsed += dt;
                let t = *elapsed;

                if !replica.is_owned_by_local(object_id) {
                    info!("Demo: lost the grab on {}, stopping", object_id);
                    self.stage = Stage::Done;
                } else if t >= DRAG_SECONDS {
                    replica.end_movement(object_id);
                    self.stage = Stage::Poke { object_id };
                } else if let Some(token) = replica.token(object_id) {
                    let position = token.position.add(&Vec3::new(
                        DRAG_SPEED * dt,
                        (t * 4.0).sin() * DRAG_SPEED * dt,
                        0.0,
                    ));
                    replica.set_position(object_id, position);
                }
            }
            Stage::Poke { object_id } => {
                let object_id = *object_id;
                info!("Demo: poking callbacks on {}", object_id);
                replica.invoke(object_id, "ToggleColor", vec![]).ok();
                replica.invoke(object_id, "Rotate", vec![Value::F32(60.0)]).ok();
                replica.invoke(object_id, "Scale", vec![Value::F32(0.1)]).ok();
                replica.invoke(object_id, "FlipOver", vec![]).ok();
                replica.invoke(object_id, "SetDepth", vec![Value::I32(1)]).ok();
                self.stage = Stage::Done;
            }
            Stage::Done => return true,
        }
        false
    }
}

impl Default for DemoScript {
    fn default() -> DemoScript {
        DemoScript::new()
    }
}
