use std::ops::Range;

use wgpu::*;
use tracing::{debug, warn};

use crate::controller::{CameraUniform, LightingUniform};
use crate::model::{Scene, SceneTexture, TextureWrap};
use crate::utils::{upload_rgba8_texture, MeshBuffer, Vertex};

pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

// Shared graphics setup used by native and web
pub struct CameraResources {
    pub camera_buffer: wgpu::Buffer,
    pub lighting_buffer: wgpu::Buffer,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub camera_bind_group: wgpu::BindGroup,
}

pub fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());
    (depth_texture, depth_view)
}

pub fn create_camera_resources(device: &wgpu::Device) -> CameraResources {
    let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("camera_buffer"),
        size: std::mem::size_of::<CameraUniform>() as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let lighting_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("lighting_buffer"),
        size: std::mem::size_of::<LightingUniform>() as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("camera_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("camera_bind_group"),
        layout: &bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: lighting_buffer.as_entire_binding() },
        ],
    });

    CameraResources { camera_buffer, lighting_buffer, bind_group_layout, camera_bind_group }
}

/// Group 1: the base colour texture of one draw and its sampler
pub fn create_material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("material_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn address_mode(wrap: TextureWrap) -> AddressMode {
    match wrap {
        TextureWrap::Repeat => AddressMode::Repeat,
        TextureWrap::MirroredRepeat => AddressMode::MirrorRepeat,
        TextureWrap::ClampToEdge => AddressMode::ClampToEdge,
    }
}

fn create_material_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    view: &TextureView,
    wrap: (TextureWrap, TextureWrap),
    nearest: bool,
) -> BindGroup {
    let filter = if nearest { FilterMode::Nearest } else { FilterMode::Linear };
    let sampler = device.create_sampler(&SamplerDescriptor {
        label: Some("base_color_sampler"),
        address_mode_u: address_mode(wrap.0),
        address_mode_v: address_mode(wrap.1),
        address_mode_w: AddressMode::Repeat,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: FilterMode::Nearest,
        ..Default::default()
    });
    device.create_bind_group(&BindGroupDescriptor {
        label: Some("material_bind_group"),
        layout,
        entries: &[
            BindGroupEntry { binding: 0, resource: BindingResource::TextureView(view) },
            BindGroupEntry { binding: 1, resource: BindingResource::Sampler(&sampler) },
        ],
    })
}

/// Size that fits within `max_dim` on both axes, keeping the aspect ratio
pub fn fit_extent(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let largest = width.max(height);
    if largest <= max_dim || largest == 0 {
        return (width, height);
    }
    let scale = max_dim as f64 / largest as f64;
    let shrink = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_dim);
    (shrink(width), shrink(height))
}

/// Upload one decoded texture, shrinking it first if the device cannot hold it
fn upload_scene_texture(device: &Device, queue: &Queue, texture: &SceneTexture) -> Option<TextureView> {
    let max_dim = device.limits().max_texture_dimension_2d;
    let (width, height) = fit_extent(texture.width, texture.height, max_dim);
    if width == 0 || height == 0 || texture.rgba.len() != texture.width as usize * texture.height as usize * 4 {
        warn!(width = texture.width, height = texture.height, "skipping malformed texture");
        return None;
    }
    if (width, height) == (texture.width, texture.height) {
        return Some(upload_rgba8_texture(device, queue, width, height, &texture.rgba, "base_color_texture"));
    }

    debug!(from = ?(texture.width, texture.height), to = ?(width, height), "shrinking texture to device limit");
    let full = image::RgbaImage::from_raw(texture.width, texture.height, texture.rgba.clone())?;
    let resized = image::imageops::resize(&full, width, height, image::imageops::FilterType::Triangle);
    Some(upload_rgba8_texture(device, queue, width, height, resized.as_raw(), "base_color_texture"))
}

/// One indexed draw and the material bind group it samples
pub struct SceneDraw {
    pub indices: Range<u32>,
    pub material: Option<usize>,
}

pub fn create_scene_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    bind_group_layout: &wgpu::BindGroupLayout,
    material_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("scene_shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/scene.wgsl").into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("scene_pipeline_layout"),
        bind_group_layouts: &[bind_group_layout, material_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("scene_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[
                    wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                    wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                    wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x2 },
                    wgpu::VertexAttribute { offset: 32, shader_location: 3, format: wgpu::VertexFormat::Float32x4 },
                ],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState { format, blend: Some(wgpu::BlendState::ALPHA_BLENDING), write_mask: wgpu::ColorWrites::ALL })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // Imported scenes mix winding and are often open, so draw both sides
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
        multiview: None,
        cache: None,
    })
}

///////////////////////////////////////////////////////////////////////////////

/// Everything needed to draw one frame: the scene pass plus the egui overlay
pub struct RenderState {
    // wgpu resources
    pub format: TextureFormat,
    pub alpha_mode: CompositeAlphaMode,
    pub width: u32,
    pub height: u32,

    pub pipeline: RenderPipeline,
    pub camera: CameraResources,
    pub material_layout: BindGroupLayout,
    /// Plain white texture for draws without a base colour image
    pub untextured: BindGroup,
    pub depth_texture: Texture,
    pub depth_view: TextureView,

    // Scene geometry, empty until the model has loaded
    pub scene_mesh: Option<MeshBuffer>,
    pub scene_draws: Vec<SceneDraw>,
    pub scene_materials: Vec<BindGroup>,
    pub clear_color: Color,

    // UI
    pub egui_renderer: egui_wgpu::Renderer,
    pub egui_primitives: Option<Vec<egui::ClippedPrimitive>>,
    pub egui_textures: Option<egui::TexturesDelta>,
    pub egui_dpr: f32,
}

impl RenderState {
    pub fn new(
        device: &Device,
        queue: &Queue,
        format: TextureFormat,
        alpha_mode: CompositeAlphaMode,
        width: u32,
        height: u32,
    ) -> Self {
        let camera = create_camera_resources(device);
        let material_layout = create_material_layout(device);
        let pipeline = create_scene_pipeline(device, format, &camera.bind_group_layout, &material_layout);
        let white = upload_rgba8_texture(device, queue, 1, 1, &[255; 4], "white_texture");
        let untextured = create_material_bind_group(
            device,
            &material_layout,
            &white,
            (TextureWrap::Repeat, TextureWrap::Repeat),
            true,
        );
        let (depth_texture, depth_view) = create_depth_texture(device, width, height);
        let egui_renderer = egui_wgpu::Renderer::new(device, format, egui_wgpu::RendererOptions::default());

        Self {
            format,
            alpha_mode,
            width,
            height,
            pipeline,
            camera,
            material_layout,
            untextured,
            depth_texture,
            depth_view,
            scene_mesh: None,
            scene_draws: Vec::new(),
            scene_materials: Vec::new(),
            // Page background shows through where the surface is composited with alpha
            clear_color: Color::TRANSPARENT,
            egui_renderer,
            egui_primitives: None,
            egui_textures: None,
            egui_dpr: 1.0,
        }
    }

    /// Upload the flattened scene and its textures; one draw per object
    pub fn upload_scene(&mut self, device: &Device, queue: &Queue, scene: &Scene) {
        self.scene_draws.clear();
        self.scene_materials.clear();
        if scene.mesh.is_empty() {
            warn!("loaded scene has no triangles, nothing to draw");
            self.scene_mesh = None;
            return;
        }
        self.scene_mesh = Some(scene.mesh.upload(device));

        // Scene texture index -> material bind group index
        let mut slots = Vec::with_capacity(scene.textures.len());
        for texture in &scene.textures {
            let slot = upload_scene_texture(device, queue, texture).map(|view| {
                self.scene_materials.push(create_material_bind_group(
                    device,
                    &self.material_layout,
                    &view,
                    (texture.wrap_u, texture.wrap_v),
                    texture.nearest,
                ));
                self.scene_materials.len() - 1
            });
            slots.push(slot);
        }

        self.scene_draws = scene
            .objects
            .iter()
            .map(|o| SceneDraw {
                indices: o.first_index..o.first_index + o.index_count,
                material: o.texture.and_then(|t| slots.get(t).copied().flatten()),
            })
            .collect();
        debug!(
            vertices = scene.mesh.vertices.len(),
            draws = self.scene_draws.len(),
            textures = self.scene_materials.len(),
            "scene uploaded to GPU"
        );
    }

    pub fn write_uniforms(&self, queue: &Queue, camera: &CameraUniform, lighting: &LightingUniform) {
        queue.write_buffer(&self.camera.camera_buffer, 0, bytemuck::bytes_of(camera));
        queue.write_buffer(&self.camera.lighting_buffer, 0, bytemuck::bytes_of(lighting));
    }

    /// Recreate size-dependent targets. The surface itself is reconfigured by the caller.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        let (depth_texture, depth_view) = create_depth_texture(device, width, height);
        self.depth_texture = depth_texture;
        self.depth_view = depth_view;
    }

    /// Hand over this frame's tessellated egui output
    pub fn set_ui(&mut self, primitives: Vec<egui::ClippedPrimitive>, textures: egui::TexturesDelta, dpr: f32) {
        self.egui_primitives = Some(primitives);
        self.egui_textures = Some(textures);
        self.egui_dpr = dpr;
    }

    fn surface_config(&self) -> SurfaceConfiguration {
        SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: self.format,
            width: self.width,
            height: self.height,
            present_mode: PresentMode::Fifo,
            alpha_mode: self.alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        }
    }

    /// Draw the scene and the UI overlay. A lost or outdated surface is
    /// reconfigured and the frame skipped.
    pub fn draw_frame(&mut self, device: &Device, queue: &Queue, surface: &Surface) -> Result<(), SurfaceError> {
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                surface.configure(device, &self.surface_config());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let view = frame.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("encoder"),
        });

        {
            let mut rp = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(self.clear_color),
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(mesh) = &self.scene_mesh {
                rp.set_pipeline(&self.pipeline);
                rp.set_bind_group(0, &self.camera.camera_bind_group, &[]);
                rp.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                rp.set_index_buffer(mesh.index_buffer.slice(..), IndexFormat::Uint32);
                for draw in &self.scene_draws {
                    let material = draw
                        .material
                        .and_then(|m| self.scene_materials.get(m))
                        .unwrap_or(&self.untextured);
                    rp.set_bind_group(1, material, &[]);
                    rp.draw_indexed(draw.indices.clone(), 0, 0..1);
                }
            }
        }

        if let (Some(primitives), Some(textures)) = (self.egui_primitives.take(), self.egui_textures.take()) {
            let screen_descriptor = egui_wgpu::ScreenDescriptor {
                size_in_pixels: [self.width, self.height],
                pixels_per_point: self.egui_dpr,
            };

            // Upload egui textures
            for (id, image_delta) in &textures.set {
                self.egui_renderer.update_texture(device, queue, *id, image_delta);
            }
            self.egui_renderer
                .update_buffers(device, queue, &mut encoder, &primitives, &screen_descriptor);

            {
                let egui_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some("egui_render_pass"),
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: Operations {
                            load: LoadOp::Load,
                            store: StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                self.egui_renderer
                    .render(&mut egui_pass.forget_lifetime(), &primitives, &screen_descriptor);
            }

            for id in &textures.free {
                self.egui_renderer.free_texture(id);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_extent_keeps_small_textures() {
        assert_eq!(fit_extent(1024, 512, 2048), (1024, 512));
        assert_eq!(fit_extent(2048, 2048, 2048), (2048, 2048));
    }

    #[test]
    fn test_fit_extent_shrinks_to_limit() {
        assert_eq!(fit_extent(8192, 4096, 2048), (2048, 1024));
        assert_eq!(fit_extent(4096, 1, 2048), (2048, 1), "thin images keep at least one texel");
    }
}
