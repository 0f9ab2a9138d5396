// MODEL: Scene data and the camera
pub mod camera;
pub mod scene;
pub mod loader;

pub use camera::Camera;
pub use scene::{Aabb, RayHit, Scene, SceneObject, SceneTexture, TextureWrap};
pub use loader::{AssetLoader, Fetch, LoadError, LoadMessage, LoadProgress, LoadStatus};
