use glam::Vec3;

use crate::config::WalkConfig;
use crate::controller::input::{Action, InputState};
use crate::model::Camera;

/// Anything that can answer "how far along this ray is the nearest surface?"
pub trait Raycaster {
    /// `dir` is normalized. `None` means nothing was hit.
    fn nearest_hit(&self, origin: Vec3, dir: Vec3) -> Option<f32>;
}

impl<F> Raycaster for F
where
    F: Fn(Vec3, Vec3) -> Option<f32>,
{
    fn nearest_hit(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        self(origin, dir)
    }
}

/// Raycaster for an unloaded scene or when collisions are switched off
pub struct NoCollision;

impl Raycaster for NoCollision {
    fn nearest_hit(&self, _origin: Vec3, _dir: Vec3) -> Option<f32> {
        None
    }
}

/// Result of one movement step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// No direction held, or held directions cancel out
    Idle,
    Moved { displacement: Vec3 },
    /// Something closer than the collision distance lies ahead
    Blocked { distance: f32 },
}

/// Per-frame walking with a single forward collision ray
pub struct MovementSystem {
    /// Units per frame
    pub move_speed: f32,
    pub sprint_speed: f32,
    pub collision_distance: f32,
}

impl MovementSystem {
    pub fn new() -> Self {
        Self {
            move_speed: 0.5,
            sprint_speed: 1.5,
            collision_distance: 1.5,
        }
    }

    pub fn from_config(config: &WalkConfig) -> Self {
        Self {
            move_speed: config.move_speed,
            sprint_speed: config.sprint_speed,
            collision_distance: config.collision_distance,
        }
    }

    /// Unnormalized sum of held directions. Strafing is relative to world up.
    pub fn move_vector(heading: Vec3, input: &InputState) -> Vec3 {
        let mut cam_move = Vec3::ZERO;
        if input.is_held(Action::Forward) {
            cam_move += heading;
        }
        if input.is_held(Action::Back) {
            cam_move -= heading;
        }
        if input.is_held(Action::Left) {
            cam_move += Vec3::Y.cross(heading);
        }
        if input.is_held(Action::Right) {
            cam_move += heading.cross(Vec3::Y);
        }
        cam_move
    }

    pub fn speed(&self, input: &InputState) -> f32 {
        if input.is_held(Action::Sprint) { self.sprint_speed } else { self.move_speed }
    }

    /// Displacement the camera would take this frame, before collision
    pub fn candidate_displacement(&self, camera: &Camera, input: &InputState) -> Option<Vec3> {
        let cam_move = Self::move_vector(camera.heading(), input);
        // Opposing keys cancel to (almost) zero; normalizing that would give NaN
        if cam_move.length_squared() < 1e-12 {
            return None;
        }
        Some(cam_move.normalize() * self.speed(input))
    }

    /// Move the camera for one frame unless the ray along the move direction hits something too close
    pub fn step<R: Raycaster + ?Sized>(
        &self,
        camera: &mut Camera,
        input: &InputState,
        raycaster: &R,
    ) -> StepOutcome {
        let Some(displacement) = self.candidate_displacement(camera, input) else {
            return StepOutcome::Idle;
        };

        let dir = displacement.normalize();
        if let Some(distance) = raycaster.nearest_hit(camera.eye, dir) {
            if distance < self.collision_distance {
                return StepOutcome::Blocked { distance };
            }
        }

        camera.eye += displacement;
        StepOutcome::Moved { displacement }
    }
}

impl Default for MovementSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::input::InputEvent;
    use std::cell::Cell;

    fn camera_at(eye: Vec3) -> Camera {
        let mut cam = Camera::new(800, 600);
        cam.eye = eye;
        cam
    }

    fn held(keys: &[&str]) -> InputState {
        let mut input = InputState::new();
        for key in keys {
            input.process_event(&InputEvent::KeyDown(key.to_string()));
        }
        input
    }

    #[test]
    fn test_forward_facing_negative_z() {
        let mut cam = camera_at(Vec3::new(1.0, 2.0, 3.0));
        let outcome = MovementSystem::new().step(&mut cam, &held(&["KeyW"]), &NoCollision);
        assert!(cam.eye.abs_diff_eq(Vec3::new(1.0, 2.0, 2.5), 1e-6), "eye was {:?}", cam.eye);
        assert!(matches!(outcome, StepOutcome::Moved { .. }));
    }

    #[test]
    fn test_opposing_keys_cancel_without_nan() {
        let system = MovementSystem::new();
        for keys in [&["KeyW", "KeyS"][..], &["KeyA", "KeyD"][..], &["KeyW", "KeyS", "KeyA", "KeyD", "ShiftLeft"][..]] {
            let input = held(keys);
            let mut cam = camera_at(Vec3::new(5.0, 1.0, -2.0));
            cam.yaw = 0.7;
            assert_eq!(MovementSystem::move_vector(cam.heading(), &input).length(), 0.0);
            assert_eq!(system.step(&mut cam, &input, &NoCollision), StepOutcome::Idle);
            assert_eq!(cam.eye, Vec3::new(5.0, 1.0, -2.0), "keys {keys:?} moved the camera");
        }
    }

    #[test]
    fn test_no_keys_is_idempotent() {
        let system = MovementSystem::new();
        let input = InputState::new();
        let mut cam = camera_at(Vec3::new(-28.0, 1.4, -44.0));
        for _ in 0..10 {
            assert_eq!(system.step(&mut cam, &input, &NoCollision), StepOutcome::Idle);
        }
        assert_eq!(cam.eye, Vec3::new(-28.0, 1.4, -44.0));
    }

    #[test]
    fn test_collision_closer_than_threshold_blocks() {
        let mut cam = camera_at(Vec3::ZERO);
        let wall = |_o: Vec3, _d: Vec3| -> Option<f32> { Some(1.0) };
        let outcome = MovementSystem::new().step(&mut cam, &held(&["KeyW"]), &wall);
        assert_eq!(outcome, StepOutcome::Blocked { distance: 1.0 });
        assert_eq!(cam.eye, Vec3::ZERO);
    }

    #[test]
    fn test_far_hit_or_miss_allows_move() {
        let system = MovementSystem::new();
        let input = held(&["KeyW"]);

        let mut cam = camera_at(Vec3::ZERO);
        let far_wall = |_o: Vec3, _d: Vec3| -> Option<f32> { Some(2.0) };
        system.step(&mut cam, &input, &far_wall);
        assert!(cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-6));

        let mut cam = camera_at(Vec3::ZERO);
        let nothing = |_o: Vec3, _d: Vec3| -> Option<f32> { None };
        system.step(&mut cam, &input, &nothing);
        assert!(cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-6));
    }

    #[test]
    fn test_ray_cast_from_eye_along_move_direction() {
        let seen = Cell::new(None);
        let recording = |o: Vec3, d: Vec3| -> Option<f32> {
            seen.set(Some((o, d)));
            None
        };
        let mut cam = camera_at(Vec3::new(3.0, 1.0, 0.0));
        let input = held(&["KeyW", "KeyD"]);
        MovementSystem::new().step(&mut cam, &input, &recording);

        let (origin, dir) = seen.get().expect("raycaster should be queried");
        assert_eq!(origin, Vec3::new(3.0, 1.0, 0.0));
        let expected = Vec3::new(1.0, 0.0, -1.0).normalize();
        assert!(dir.abs_diff_eq(expected, 1e-6), "dir was {dir:?}");
    }

    #[test]
    fn test_sprint_scales_step_length() {
        let system = MovementSystem::new();

        let mut cam = camera_at(Vec3::ZERO);
        let outcome = system.step(&mut cam, &held(&["KeyW", "ShiftLeft"]), &NoCollision);
        let StepOutcome::Moved { displacement } = outcome else { panic!("expected move, got {outcome:?}") };
        assert!((displacement.length() - 1.5).abs() < 1e-6);

        let mut cam = camera_at(Vec3::ZERO);
        let outcome = system.step(&mut cam, &held(&["KeyW"]), &NoCollision);
        let StepOutcome::Moved { displacement } = outcome else { panic!("expected move, got {outcome:?}") };
        assert!((displacement.length() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_diagonal_is_not_faster() {
        let mut cam = camera_at(Vec3::ZERO);
        cam.yaw = 1.1;
        let outcome = MovementSystem::new().step(&mut cam, &held(&["KeyW", "KeyA"]), &NoCollision);
        let StepOutcome::Moved { displacement } = outcome else { panic!("expected move") };
        assert!((displacement.length() - 0.5).abs() < 1e-6);
        assert_eq!(displacement.y, 0.0, "walking never changes height");
    }

    #[test]
    fn test_strafe_directions_relative_to_heading() {
        let input_left = held(&["KeyA"]);
        let input_right = held(&["KeyD"]);
        let heading = Vec3::NEG_Z;
        assert_eq!(MovementSystem::move_vector(heading, &input_left), Vec3::NEG_X);
        assert_eq!(MovementSystem::move_vector(heading, &input_right), Vec3::X);
    }

    #[test]
    fn test_looking_up_still_walks_horizontally() {
        let mut cam = camera_at(Vec3::ZERO);
        cam.pitch = 1.4;
        MovementSystem::new().step(&mut cam, &held(&["KeyW"]), &NoCollision);
        assert!(cam.eye.abs_diff_eq(Vec3::new(0.0, 0.0, -0.5), 1e-5), "eye was {:?}", cam.eye);
    }
}
