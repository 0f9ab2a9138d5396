// CONTROLLER: Input, movement, and the per-frame update
pub mod input;
pub mod physics;
pub mod camera_controller;
pub mod frame_loop;

pub use input::{Action, InputEvent, InputState, KeyBindings};
pub use physics::{MovementSystem, NoCollision, Raycaster, StepOutcome};
pub use camera_controller::LookController;
pub use frame_loop::{FrameLoopContext, CameraUniform, LightingUniform};
