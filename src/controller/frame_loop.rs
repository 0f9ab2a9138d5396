use glam::{Vec2, Vec3};
use tracing::{debug, trace};

use crate::config::WalkConfig;
use crate::controller::camera_controller::LookController;
use crate::controller::input::{InputEvent, InputState, KeyBindings};
use crate::controller::physics::{MovementSystem, NoCollision, Raycaster, StepOutcome};
use crate::model::{Camera, Scene};

/// Per-frame state shared by the web and native drivers: camera, input and
/// the loaded scene. Platform callbacks only queue `InputEvent`s; `update`
/// drains them in order, then moves the camera once.
pub struct FrameLoopContext {
    pub cam: Camera,
    pub input_state: InputState,
    pub look_controller: LookController,
    pub movement_system: MovementSystem,
    pub scene: Option<Scene>,
    pub collision_enabled: bool,
    pub last_outcome: StepOutcome,
    pub frame_count: u64,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightingUniform {
    pub sun_dir: [f32; 3],
    pub sun_intensity: f32,
    pub ambient_color: [f32; 3],
    pub ambient_intensity: f32,
}

impl LightingUniform {
    /// White directional light from (500, 500, 500) plus a dim grey ambient term
    pub fn for_config(config: &WalkConfig) -> Self {
        let sun_dir = Vec3::new(500.0, 500.0, 500.0).normalize();
        let grey = 0x33 as f32 / 255.0;
        Self {
            sun_dir: sun_dir.to_array(),
            sun_intensity: 1.0,
            ambient_color: [grey; 3],
            ambient_intensity: config.ambient_intensity(),
        }
    }
}

impl FrameLoopContext {
    pub fn new(config: &WalkConfig, width: u32, height: u32) -> Self {
        let mut cam = Camera::new(width, height);
        cam.eye = config.spawn.position();
        cam.fov_y = config.fov_y_deg.to_radians();

        Self {
            cam,
            input_state: InputState::with_bindings(KeyBindings::default(), config.surface_drag),
            look_controller: LookController::with_sensitivity(config.look_sensitivity),
            movement_system: MovementSystem::from_config(config),
            scene: None,
            collision_enabled: config.collision_enabled,
            last_outcome: StepOutcome::Idle,
            frame_count: 0,
        }
    }

    /// Make a loaded scene collidable from the next step on
    pub fn attach_scene(&mut self, scene: Scene) {
        debug!(objects = scene.objects.len(), "scene attached to frame loop");
        self.scene = Some(scene);
    }

    /// Apply queued input in arrival order, then run one movement step
    pub fn update<I>(&mut self, events: I) -> StepOutcome
    where
        I: IntoIterator<Item = InputEvent>,
    {
        self.frame_count += 1;

        for event in events {
            if let Some(delta) = self.input_state.process_event(&event) {
                self.look_controller.apply_delta(&mut self.cam, delta);
            }
        }

        let raycaster: &dyn Raycaster = match &self.scene {
            Some(scene) if self.collision_enabled => scene,
            _ => &NoCollision,
        };
        let outcome = self.movement_system.step(&mut self.cam, &self.input_state, raycaster);

        match outcome {
            StepOutcome::Moved { .. } => {
                let eye = self.cam.eye;
                trace!(x = eye.x, y = eye.y, z = eye.z, "camera moved");
            }
            StepOutcome::Blocked { distance } if !matches!(self.last_outcome, StepOutcome::Blocked { .. }) => {
                debug!(distance, "movement blocked");
            }
            _ => {}
        }
        self.last_outcome = outcome;
        outcome
    }

    /// Knob offset for drawing the on-screen joystick
    pub fn joystick_knob(&self) -> Vec2 {
        self.input_state.joystick.knob()
    }

    pub fn camera_uniform(&self) -> CameraUniform {
        CameraUniform {
            view_proj: self.cam.view_proj().to_cols_array_2d(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.cam.set_aspect(width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpawnPoint;
    use crate::utils::{Mesh, Vertex};

    fn key_down(code: &str) -> InputEvent {
        InputEvent::KeyDown(code.to_string())
    }

    fn wall_ahead(z: f32) -> Scene {
        let v = |x: f32, y: f32| Vertex { pos: [x, y, z], normal: [0.0, 0.0, 1.0], uv: [0.0; 2], color: [1.0; 4] };
        let mut scene = Scene::new();
        scene.push_object(
            Some("wall".into()),
            &Mesh {
                vertices: vec![v(-100.0, -10.0), v(100.0, -10.0), v(100.0, 10.0), v(-100.0, 10.0)],
                indices: vec![0, 1, 2, 0, 2, 3],
            },
            None,
        );
        scene
    }

    fn no_events() -> Vec<InputEvent> {
        Vec::new()
    }

    fn context_at_origin(config: &WalkConfig) -> FrameLoopContext {
        let mut ctx = FrameLoopContext::new(config, 800, 600);
        ctx.cam.eye = Vec3::ZERO;
        ctx
    }

    #[test]
    fn test_starts_at_spawn_point() {
        let config = WalkConfig { spawn: SpawnPoint::Alternate, ..WalkConfig::default() };
        let ctx = FrameLoopContext::new(&config, 800, 600);
        assert_eq!(ctx.cam.eye, SpawnPoint::Alternate.position());
        assert!((ctx.cam.fov_y - 75f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_forward_step_end_to_end() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        let old = ctx.cam.eye;
        ctx.update([key_down("KeyW")]);
        assert!(ctx.cam.eye.abs_diff_eq(old + Vec3::new(0.0, 0.0, -0.5), 1e-6), "eye was {:?}", ctx.cam.eye);

        // Key stays held across frames without new events
        ctx.update(no_events());
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
    }

    #[test]
    fn test_walks_until_wall_is_close() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        ctx.attach_scene(wall_ahead(-3.2));
        ctx.update([key_down("KeyW")]);
        for _ in 0..10 {
            ctx.update(no_events());
        }
        // Steps of 0.5 stop once the wall is nearer than 1.5
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), 1e-5), "eye was {:?}", ctx.cam.eye);
        assert!(matches!(ctx.last_outcome, StepOutcome::Blocked { .. }));
    }

    #[test]
    fn test_collision_can_be_disabled() {
        let config = WalkConfig { collision_enabled: false, ..WalkConfig::default() };
        let mut ctx = context_at_origin(&config);
        ctx.attach_scene(wall_ahead(-1.0));
        ctx.update([key_down("KeyW")]);
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-6));
    }

    #[test]
    fn test_events_apply_in_order_before_moving() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        ctx.update([
            key_down("KeyW"),
            InputEvent::KeyUp("KeyW".to_string()),
        ]);
        assert_eq!(ctx.cam.eye, Vec3::ZERO, "released within the same frame");

        ctx.update([
            InputEvent::KeyUp("KeyW".to_string()),
            key_down("KeyW"),
        ]);
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-6));
    }

    #[test]
    fn test_look_applies_per_event_with_clamp() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        ctx.update([
            InputEvent::PointerLockChanged { locked: true },
            // Far past straight up, then back down a little
            InputEvent::MouseMove { dx: 0.0, dy: -5000.0 },
            InputEvent::MouseMove { dx: 0.0, dy: 100.0 },
        ]);
        let expected = std::f32::consts::FRAC_PI_2 - 0.2;
        assert!((ctx.cam.pitch - expected).abs() < 1e-5, "pitch was {}", ctx.cam.pitch);
    }

    #[test]
    fn test_turning_changes_walk_direction() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        // Dragging left by pi/2 worth of pixels turns left to face -X
        let pixels = std::f32::consts::FRAC_PI_2 / 0.002;
        ctx.update([
            InputEvent::SurfaceTouchStart { x: 500.0, y: 300.0 },
            InputEvent::SurfaceTouchMove { x: 500.0 - pixels, y: 300.0, touches: 1 },
            InputEvent::SurfaceTouchEnd,
            key_down("KeyW"),
        ]);
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(-0.5, 0.0, 0.0), 1e-4), "eye was {:?}", ctx.cam.eye);
    }

    #[test]
    fn test_joystick_knob_exposed() {
        let mut ctx = context_at_origin(&WalkConfig::default());
        ctx.update([
            InputEvent::JoystickStart { x: 0.0, y: 0.0, radius: 40.0 },
            InputEvent::JoystickMove { x: 0.0, y: -100.0 },
        ]);
        assert_eq!(ctx.joystick_knob(), Vec2::new(0.0, -40.0));
        assert!(ctx.cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-6), "joystick up walks forward");
    }

    #[test]
    fn test_lighting_for_object() {
        let lighting = LightingUniform::for_config(&WalkConfig::default());
        assert_eq!(lighting.ambient_intensity, 5.0);
        assert!((Vec3::from(lighting.sun_dir).length() - 1.0).abs() < 1e-6);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 32);
    }
}
