use glam::Vec3;

use crate::controller::physics::Raycaster;
use crate::utils::Mesh;

/// Axis-aligned bounding box in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// Slab test. Returns the distance at which the ray enters the box
    /// (0 when the origin is inside), or None if it misses.
    pub fn ray_entry(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let inv = dir.recip();
        let t1 = (self.min - origin) * inv;
        let t2 = (self.max - origin) * inv;
        // NaN appears for axis-parallel rays starting on a slab face; min/max drop it
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        if t_far < 0.0 || t_near > t_far {
            return None;
        }
        Some(t_near.max(0.0))
    }
}

/// How texture coordinates outside 0..1 are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// Decoded base colour image with the sampling its material asks for
#[derive(Clone, PartialEq)]
pub struct SceneTexture {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, sRGB encoded
    pub rgba: Vec<u8>,
    pub wrap_u: TextureWrap,
    pub wrap_v: TextureWrap,
    pub nearest: bool,
}

impl std::fmt::Debug for SceneTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("wrap_u", &self.wrap_u)
            .field("wrap_v", &self.wrap_v)
            .field("nearest", &self.nearest)
            .finish_non_exhaustive()
    }
}

/// One drawable piece of the imported model, stored as a range of the scene's index buffer.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: Option<String>,
    pub first_index: u32,
    pub index_count: u32,
    pub bounds: Aabb,
    /// Index into [`Scene::textures`]; untextured objects use vertex colour alone
    pub texture: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub object: usize,
}

/// Flattened world-space geometry of a loaded model
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub mesh: Mesh,
    pub objects: Vec<SceneObject>,
    pub textures: Vec<SceneTexture>,
}

const RAY_EPSILON: f32 = 1e-6;

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.mesh.triangle_count()
    }

    /// Add an object whose vertices are already in world space.
    /// Meshes without triangles are dropped.
    pub fn push_object(&mut self, name: Option<String>, mesh: &Mesh, texture: Option<usize>) {
        if mesh.triangle_count() == 0 {
            return;
        }
        let Some(bounds) = Aabb::from_points(mesh.vertices.iter().map(|v| Vec3::from(v.pos))) else {
            return;
        };
        let first_index = self.mesh.indices.len() as u32;
        self.mesh.append(mesh);
        self.objects.push(SceneObject {
            name,
            first_index,
            index_count: (mesh.indices.len() / 3 * 3) as u32,
            bounds,
            texture: texture.filter(|t| *t < self.textures.len()),
        });
    }

    /// Nearest intersection along a ray against every object. Triangles are hit from both sides.
    pub fn raycast(&self, origin: Vec3, dir: Vec3) -> Option<RayHit> {
        let dir = dir.try_normalize()?;
        let mut best: Option<RayHit> = None;

        for (object_idx, object) in self.objects.iter().enumerate() {
            let Some(entry) = object.bounds.ray_entry(origin, dir) else { continue };
            if best.is_some_and(|b| entry > b.distance) {
                continue;
            }

            let start = object.first_index as usize;
            let end = start + object.index_count as usize;
            for tri in self.mesh.indices[start..end].chunks_exact(3) {
                let a = Vec3::from(self.mesh.vertices[tri[0] as usize].pos);
                let b = Vec3::from(self.mesh.vertices[tri[1] as usize].pos);
                let c = Vec3::from(self.mesh.vertices[tri[2] as usize].pos);
                if let Some(t) = intersect_triangle(origin, dir, a, b, c) {
                    if best.map_or(true, |b| t < b.distance) {
                        best = Some(RayHit { distance: t, object: object_idx });
                    }
                }
            }
        }

        best
    }
}

impl Raycaster for Scene {
    fn nearest_hit(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        self.raycast(origin, dir).map(|hit| hit.distance)
    }
}

/// Möller–Trumbore ray/triangle test, returns distance along `dir`
fn intersect_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = dir.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < RAY_EPSILON {
        return None; // parallel or degenerate
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > RAY_EPSILON).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Vertex;

    fn vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex { pos: [x, y, z], normal: [0.0, 0.0, 1.0], uv: [0.0; 2], color: [1.0; 4] }
    }

    /// Square wall in the plane z = `z`, spanning x and y in [-size, size]
    fn wall(z: f32, size: f32) -> Mesh {
        Mesh {
            vertices: vec![
                vertex(-size, -size, z),
                vertex(size, -size, z),
                vertex(size, size, z),
                vertex(-size, size, z),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    #[test]
    fn test_raycast_hits_nearest_wall() {
        let mut scene = Scene::new();
        scene.push_object(Some("far".into()), &wall(-10.0, 5.0), None);
        scene.push_object(Some("near".into()), &wall(-3.0, 5.0), None);

        let hit = scene.raycast(Vec3::ZERO, Vec3::NEG_Z).expect("ray should hit");
        assert!((hit.distance - 3.0).abs() < 1e-5, "distance was {}", hit.distance);
        assert_eq!(scene.objects[hit.object].name.as_deref(), Some("near"));
    }

    #[test]
    fn test_raycast_ignores_geometry_behind_origin() {
        let mut scene = Scene::new();
        scene.push_object(None, &wall(4.0, 5.0), None);
        assert_eq!(scene.raycast(Vec3::ZERO, Vec3::NEG_Z), None);
        // Back faces count too
        let hit = scene.raycast(Vec3::ZERO, Vec3::Z).expect("wall is double sided");
        assert!((hit.distance - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_raycast_misses_beside_wall() {
        let mut scene = Scene::new();
        scene.push_object(None, &wall(-3.0, 1.0), None);
        assert_eq!(scene.raycast(Vec3::new(2.0, 0.0, 0.0), Vec3::NEG_Z), None);
    }

    #[test]
    fn test_empty_scene_reports_no_hit() {
        let scene = Scene::new();
        assert!(scene.is_empty());
        assert_eq!(scene.nearest_hit(Vec3::ZERO, Vec3::X), None);
        assert_eq!(scene.raycast(Vec3::ZERO, Vec3::ZERO), None, "zero direction must not panic");
    }

    #[test]
    fn test_push_object_tracks_index_ranges() {
        let mut scene = Scene::new();
        scene.push_object(None, &wall(0.0, 1.0), None);
        scene.push_object(None, &Mesh::empty(), None);
        scene.push_object(None, &wall(2.0, 1.0), None);
        assert_eq!(scene.objects.len(), 2);
        assert_eq!(scene.objects[1].first_index, 6);
        assert_eq!(scene.triangle_count(), 4);
        assert_eq!(scene.objects[1].bounds.min, Vec3::new(-1.0, -1.0, 2.0));
        assert_eq!(scene.objects[1].bounds.max, Vec3::new(1.0, 1.0, 2.0));
    }

    #[test]
    fn test_object_texture_must_exist() {
        let mut scene = Scene::new();
        scene.textures.push(SceneTexture {
            width: 1,
            height: 1,
            rgba: vec![255; 4],
            wrap_u: TextureWrap::Repeat,
            wrap_v: TextureWrap::Repeat,
            nearest: false,
        });
        scene.push_object(None, &wall(0.0, 1.0), Some(0));
        scene.push_object(None, &wall(1.0, 1.0), Some(3));
        assert_eq!(scene.objects[0].texture, Some(0));
        assert_eq!(scene.objects[1].texture, None, "dangling texture index is dropped");
    }

    #[test]
    fn test_aabb_entry_inside_is_zero() {
        let b = Aabb { min: Vec3::splat(-1.0), max: Vec3::splat(1.0) };
        assert_eq!(b.ray_entry(Vec3::ZERO, Vec3::X), Some(0.0));
        assert_eq!(b.ray_entry(Vec3::new(-5.0, 0.0, 0.0), Vec3::X), Some(4.0));
        assert_eq!(b.ray_entry(Vec3::new(-5.0, 3.0, 0.0), Vec3::X), None);
    }
}
