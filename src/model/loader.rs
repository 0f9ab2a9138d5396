//! Asynchronous glTF scene loading.
//!
//! The document is fetched first, then every external buffer it references,
//! then the base colour images its materials use. The node tree is flattened
//! into a world-space [`Scene`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashSet;

use glam::{Mat3, Mat4, Vec3, Vec4};
use gltf::buffer::Source;
use gltf::texture::{MagFilter, WrappingMode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{Scene, SceneTexture, TextureWrap};
use crate::utils::{Mesh, Vertex};

pub const MODELS_DIR: &str = "models";

/// Relative path of the scene description for an object id
pub fn model_path(object_id: &str) -> String {
    format!("{MODELS_DIR}/{object_id}/scene.gltf")
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("invalid glTF: {0}")]
    Parse(String),
    #[error("glTF buffer {index} has no data")]
    MissingBuffer { index: usize },
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

impl From<gltf::Error> for LoadError {
    fn from(e: gltf::Error) -> Self {
        LoadError::Parse(e.to_string())
    }
}

/// Bytes received so far out of the bytes the document declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl LoadProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.loaded as f64 / self.total as f64).min(1.0) as f32
        }
    }
}

/// Source of raw resource bytes, keyed by relative URL
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// Reads resources from disk relative to a root directory
#[cfg(not(target_arch = "wasm32"))]
pub struct FileFetch {
    pub root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileFetch {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Fetch for FileFetch {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        // Relative URIs in glTF are percent-encoded, file names are not
        let decoded = urlencoding::decode(url).map_err(|e| LoadError::Parse(format!("{url}: {e}")))?;
        let path = self.root.join(decoded.as_ref());
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound { url: url.to_string() },
            _ => LoadError::Network { url: url.to_string(), reason: e.to_string() },
        })
    }
}

/// Fetches resources with the browser's `fetch()`, relative to the page
#[cfg(target_arch = "wasm32")]
pub struct BrowserFetch;

#[cfg(target_arch = "wasm32")]
impl Fetch for BrowserFetch {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;

        let network = |reason: String| LoadError::Network { url: url.to_string(), reason };
        let window = web_sys::window().ok_or_else(|| network("no global `window`".into()))?;

        let response = JsFuture::from(window.fetch_with_str(url))
            .await
            .map_err(|e| network(format!("{e:?}")))?
            .dyn_into::<web_sys::Response>()
            .map_err(|_| network("fetch did not return a Response".into()))?;

        if response.status() == 404 {
            return Err(LoadError::NotFound { url: url.to_string() });
        }
        if !response.ok() {
            return Err(network(format!("HTTP {} {}", response.status(), response.status_text())));
        }

        let promise = response.array_buffer().map_err(|e| network(format!("{e:?}")))?;
        let buffer = JsFuture::from(promise).await.map_err(|e| network(format!("{e:?}")))?;
        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }
}

/// Loads `models/<object-id>/scene.gltf` and everything it references
pub struct AssetLoader<F> {
    fetcher: F,
}

impl<F: Fetch> AssetLoader<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub async fn load(
        &self,
        object_id: &str,
        on_progress: impl FnMut(LoadProgress),
    ) -> Result<Scene, LoadError> {
        self.load_url(&model_path(object_id), on_progress).await
    }

    pub async fn load_url(
        &self,
        url: &str,
        mut on_progress: impl FnMut(LoadProgress),
    ) -> Result<Scene, LoadError> {
        info!(url, "loading scene");
        let doc_bytes = self.fetcher.fetch(url).await?;
        let gltf = gltf::Gltf::from_slice(&doc_bytes)?;

        let external: u64 = gltf
            .buffers()
            .filter(|b| matches!(b.source(), Source::Uri(uri) if !uri.starts_with("data:")))
            .map(|b| b.length() as u64)
            .sum();
        let mut progress = LoadProgress {
            loaded: doc_bytes.len() as u64,
            total: doc_bytes.len() as u64 + external,
        };
        on_progress(progress);

        let base = url.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let mut buffers = Vec::with_capacity(gltf.buffers().len());
        for buffer in gltf.buffers() {
            let data = match buffer.source() {
                Source::Bin => gltf
                    .blob
                    .clone()
                    .ok_or(LoadError::MissingBuffer { index: buffer.index() })?,
                Source::Uri(uri) if uri.starts_with("data:") => decode_data_uri(uri)?,
                Source::Uri(uri) => {
                    let bytes = self.fetcher.fetch(&resolve(base, uri)).await?;
                    progress.loaded += buffer.length() as u64;
                    on_progress(progress);
                    bytes
                }
            };
            if data.len() < buffer.length() {
                return Err(LoadError::Parse(format!(
                    "buffer {} holds {} bytes, {} declared",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                )));
            }
            buffers.push(data);
        }

        let (textures, texture_slots) = self.load_textures(&gltf, &buffers, base).await;
        let mut scene = Scene::new();
        scene.textures = textures;
        flatten_document(&gltf, &buffers, &texture_slots, &mut scene);
        info!(
            objects = scene.objects.len(),
            triangles = scene.triangle_count(),
            textures = scene.textures.len(),
            "scene loaded"
        );
        Ok(scene)
    }

    /// Decode every texture a material uses for its base colour. Returns the
    /// decoded textures and, per glTF texture index, the slot it landed in.
    /// A texture that cannot be fetched or decoded is skipped with a warning,
    /// leaving its material with the colour factor alone.
    async fn load_textures(
        &self,
        document: &gltf::Document,
        buffers: &[Vec<u8>],
        base: &str,
    ) -> (Vec<SceneTexture>, Vec<Option<usize>>) {
        let mut textures = Vec::new();
        let mut slots = vec![None; document.textures().len()];
        let mut seen = HashSet::new();

        for material in document.materials() {
            let Some(info) = material.pbr_metallic_roughness().base_color_texture() else { continue };
            let texture = info.texture();
            if !seen.insert(texture.index()) {
                continue;
            }
            let decoded = self
                .image_bytes(&texture.source(), buffers, base)
                .await
                .and_then(|bytes| decode_texture(&bytes, &texture.sampler()));
            match decoded {
                Ok(decoded) => {
                    debug!(
                        texture = texture.index(),
                        width = decoded.width,
                        height = decoded.height,
                        "texture decoded"
                    );
                    if let Some(slot) = slots.get_mut(texture.index()) {
                        *slot = Some(textures.len());
                        textures.push(decoded);
                    }
                }
                Err(e) => warn!(texture = texture.index(), "skipping base colour texture: {e}"),
            }
        }

        (textures, slots)
    }

    async fn image_bytes(
        &self,
        image: &gltf::Image<'_>,
        buffers: &[Vec<u8>],
        base: &str,
    ) -> Result<Vec<u8>, LoadError> {
        match image.source() {
            gltf::image::Source::View { view, .. } => {
                let index = view.buffer().index();
                let data = buffers.get(index).ok_or(LoadError::MissingBuffer { index })?;
                data.get(view.offset()..view.offset() + view.length())
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| LoadError::Parse(format!("image {} lies outside its buffer", image.index())))
            }
            gltf::image::Source::Uri { uri, .. } if uri.starts_with("data:") => decode_data_uri(uri),
            gltf::image::Source::Uri { uri, .. } => self.fetcher.fetch(&resolve(base, uri)).await,
        }
    }
}

/// Resource URI relative to the directory of the document
fn resolve(base: &str, uri: &str) -> String {
    if base.is_empty() {
        uri.to_string()
    } else {
        format!("{base}/{uri}")
    }
}

fn decode_texture(bytes: &[u8], sampler: &gltf::texture::Sampler) -> Result<SceneTexture, LoadError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(SceneTexture {
        width,
        height,
        rgba: rgba.into_raw(),
        wrap_u: map_wrap(sampler.wrap_s()),
        wrap_v: map_wrap(sampler.wrap_t()),
        nearest: matches!(sampler.mag_filter(), Some(MagFilter::Nearest)),
    })
}

fn map_wrap(mode: WrappingMode) -> TextureWrap {
    match mode {
        WrappingMode::Repeat => TextureWrap::Repeat,
        WrappingMode::MirroredRepeat => TextureWrap::MirroredRepeat,
        WrappingMode::ClampToEdge => TextureWrap::ClampToEdge,
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, LoadError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| LoadError::Parse("malformed data URI".into()))?;
    if !header.ends_with(";base64") {
        return Err(LoadError::Parse("only base64 data URIs are supported".into()));
    }
    BASE64
        .decode(payload.as_bytes())
        .map_err(|e| LoadError::Parse(format!("data URI: {e}")))
}

/// Walk the default scene (or the first one) and bake node transforms into the geometry
fn flatten_document(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    texture_slots: &[Option<usize>],
    scene: &mut Scene,
) {
    let Some(root) = document.default_scene().or_else(|| document.scenes().next()) else {
        warn!("glTF document has no scenes");
        return;
    };
    for node in root.nodes() {
        visit_node(&node, Mat4::IDENTITY, buffers, texture_slots, scene);
    }
}

fn visit_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[Vec<u8>],
    texture_slots: &[Option<usize>],
    scene: &mut Scene,
) {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

    if let Some(mesh) = node.mesh() {
        let name = node.name().or(mesh.name()).map(str::to_string);
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                debug!(mode = ?primitive.mode(), "skipping non-triangle primitive");
                continue;
            }
            let texture = primitive
                .material()
                .pbr_metallic_roughness()
                .base_color_texture()
                .and_then(|info| texture_slots.get(info.texture().index()).copied().flatten());
            if let Some(baked) = bake_primitive(&primitive, world, buffers) {
                scene.push_object(name.clone(), &baked, texture);
            }
        }
    }

    for child in node.children() {
        visit_node(&child, world, buffers, texture_slots, scene);
    }
}

fn bake_primitive(primitive: &gltf::Primitive, world: Mat4, buffers: &[Vec<u8>]) -> Option<Mesh> {
    let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| d.as_slice()));
    let positions: Vec<Vec3> = reader
        .read_positions()?
        .map(|p| world.transform_point3(Vec3::from(p)))
        .collect();
    let vertex_count = positions.len() as u32;

    let mut indices: Vec<u32> = match reader.read_indices() {
        Some(read) => read.into_u32().collect(),
        None => (0..vertex_count).collect(),
    };
    indices.truncate(indices.len() / 3 * 3);
    let before = indices.len();
    let valid: Vec<u32> = indices
        .chunks_exact(3)
        .filter(|tri| tri.iter().all(|i| *i < vertex_count))
        .flatten()
        .copied()
        .collect();
    if valid.len() != before {
        warn!(dropped = (before - valid.len()) / 3, "triangles with out-of-range indices");
    }
    indices = valid;

    let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
    let normals: Vec<Vec3> = match reader.read_normals() {
        Some(it) => it.map(|n| (normal_matrix * Vec3::from(n)).normalize_or_zero()).collect(),
        None => face_normals(&positions, &indices),
    };

    let pbr = primitive.material().pbr_metallic_roughness();
    let base = Vec4::from(pbr.base_color_factor());
    let uv_set = pbr.base_color_texture().map_or(0, |info| info.tex_coord());
    let uvs: Option<Vec<[f32; 2]>> = reader.read_tex_coords(uv_set).map(|tc| tc.into_f32().collect());
    let colors: Option<Vec<Vec4>> = reader
        .read_colors(0)
        .map(|c| c.into_rgba_f32().map(|rgba| Vec4::from(rgba) * base).collect());

    let vertices = positions
        .iter()
        .enumerate()
        .map(|(i, pos)| Vertex {
            pos: pos.to_array(),
            normal: normals.get(i).copied().unwrap_or(Vec3::Y).to_array(),
            uv: uvs.as_ref().and_then(|uv| uv.get(i).copied()).unwrap_or([0.0; 2]),
            color: colors
                .as_ref()
                .and_then(|c| c.get(i).copied())
                .unwrap_or(base)
                .to_array(),
        })
        .collect();

    Some(Mesh { vertices, indices })
}

/// Smooth normals from adjacent faces, for primitives that ship without any
fn face_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

/// Where the startup load stands, as seen by the frame loop
#[derive(Debug)]
pub enum LoadStatus {
    Loading(LoadProgress),
    /// Loaded but not yet handed to the renderer
    Loaded(Scene),
    Attached { objects: usize, triangles: usize },
    Failed(String),
}

/// Messages from a background loader
#[derive(Debug)]
pub enum LoadMessage {
    Progress(LoadProgress),
    Finished(Result<Scene, LoadError>),
}

impl Default for LoadStatus {
    fn default() -> Self {
        LoadStatus::Loading(LoadProgress::default())
    }
}

impl LoadStatus {
    pub fn progress(&mut self, progress: LoadProgress) {
        info!("{:.0}% loaded", progress.fraction() * 100.0);
        if let LoadStatus::Loading(p) = self {
            *p = progress;
        }
    }

    /// Record the outcome. A failed load is terminal: it is logged and the scene stays empty.
    pub fn finish(&mut self, result: Result<Scene, LoadError>) {
        *self = match result {
            Ok(scene) => LoadStatus::Loaded(scene),
            Err(e) => {
                error!("scene load failed: {e}");
                LoadStatus::Failed(e.to_string())
            }
        };
    }

    pub fn apply(&mut self, message: LoadMessage) {
        match message {
            LoadMessage::Progress(p) => self.progress(p),
            LoadMessage::Finished(result) => self.finish(result),
        }
    }

    /// Take a freshly loaded scene, leaving `Attached` behind
    pub fn take_loaded(&mut self) -> Option<Scene> {
        if !matches!(self, LoadStatus::Loaded(_)) {
            return None;
        }
        let LoadStatus::Loaded(scene) = std::mem::take(self) else { return None };
        *self = LoadStatus::Attached {
            objects: scene.objects.len(),
            triangles: scene.triangle_count(),
        };
        Some(scene)
    }
}
