use std::f32::consts::FRAC_PI_2;

use glam::Vec2;
use crate::model::Camera;

/// Turns pointer and touch deltas into yaw/pitch
pub struct LookController {
    pub sensitivity: f32,
}

impl LookController {
    pub fn new() -> Self {
        Self {
            sensitivity: 0.002,
        }
    }

    pub fn with_sensitivity(sensitivity: f32) -> Self {
        Self { sensitivity }
    }

    /// Apply a look delta (pixels) to the camera. Moving right or down turns
    /// right or down; pitch stops at straight up/down, yaw wraps freely.
    pub fn apply(&self, camera: &mut Camera, dx: f32, dy: f32) {
        camera.yaw -= dx * self.sensitivity;
        camera.pitch = (camera.pitch - dy * self.sensitivity).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    pub fn apply_delta(&self, camera: &mut Camera, delta: Vec2) {
        self.apply(camera, delta.x, delta.y);
    }
}

impl Default for LookController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_stays_clamped() {
        let look = LookController::new();
        let mut cam = Camera::new(800, 600);
        let deltas = [-5000.0, 120.0, 9000.0, -3.0, 0.5, -100000.0, 42.0];
        for dy in deltas {
            look.apply(&mut cam, 0.0, dy);
            assert!((-FRAC_PI_2..=FRAC_PI_2).contains(&cam.pitch), "pitch {} escaped after dy {dy}", cam.pitch);
        }
    }

    #[test]
    fn test_yaw_unbounded_and_signed() {
        let look = LookController::new();
        let mut cam = Camera::new(800, 600);
        look.apply(&mut cam, 100.0, 0.0);
        assert!((cam.yaw + 0.2).abs() < 1e-6, "dragging right turns right (negative yaw)");
        for _ in 0..100 {
            look.apply(&mut cam, -1000.0, 0.0);
        }
        assert!(cam.yaw > std::f32::consts::TAU, "yaw is not wrapped");
    }

    #[test]
    fn test_drag_up_looks_up() {
        let look = LookController::new();
        let mut cam = Camera::new(800, 600);
        look.apply_delta(&mut cam, Vec2::new(0.0, -50.0));
        assert!((cam.pitch - 0.1).abs() < 1e-6);
        assert!(cam.forward().y > 0.0);
    }
}
