use glam::{Mat4, Vec3};

/// First-person camera. Yaw 0 looks down -Z, positive yaw turns left.
pub struct Camera {
    pub eye: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            eye: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            up: Vec3::Y,
            fov_y: 75f32.to_radians(),
            aspect: width.max(1) as f32 / height.max(1) as f32,
            z_near: 0.1,
            z_far: 1000.0,
        }
    }

    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(-sy * cp, sp, -cy * cp)
    }

    /// Forward direction flattened onto the ground plane.
    /// Looking straight up or down leaves no horizontal part, so fall back to yaw alone.
    pub fn heading(&self) -> Vec3 {
        let f = self.forward();
        let flat = Vec3::new(f.x, 0.0, f.z);
        if flat.length_squared() > 1e-6 {
            flat.normalize()
        } else {
            let (sy, cy) = self.yaw.sin_cos();
            Vec3::new(-sy, 0.0, -cy)
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        // Keep look_at away from the degenerate straight-up case
        let mut view_dir = self.forward();
        if view_dir.cross(self.up).length_squared() < 1e-8 {
            view_dir = (view_dir + self.heading() * 1e-3).normalize();
        }
        let view = Mat4::look_to_rh(self.eye, view_dir, self.up);
        let proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.z_near, self.z_far);
        proj * view
    }
}
