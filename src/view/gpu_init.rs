#![cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use wgpu::Device;

#[derive(Debug, Error)]
pub enum GpuInitError {
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to request device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
}

/// GPU context - unified for both WASM and native
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<wgpu::Queue>,
    pub surface: wgpu::Surface<'static>,
    pub format: wgpu::TextureFormat,
    pub config: wgpu::SurfaceConfiguration,
}

pub fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

async fn init_device_and_queue(
    adapter: &wgpu::Adapter,
) -> Result<(Arc<Device>, Arc<wgpu::Queue>), GpuInitError> {
    let adapter_limits = adapter.limits();
    let limits = wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter_limits);

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::default(),
        })
        .await?;

    Ok((Arc::new(device), Arc::new(queue)))
}

/// Prefer an sRGB format so base colours come out as authored
fn configure_surface(
    device: &Device,
    adapter: &wgpu::Adapter,
    surface: &wgpu::Surface,
    width: u32,
    height: u32,
) -> Result<(wgpu::TextureFormat, wgpu::SurfaceConfiguration), GpuInitError> {
    let caps = surface.get_capabilities(adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .ok_or(GpuInitError::NoSurfaceFormat)?;
    let alpha_mode = if caps.alpha_modes.contains(&wgpu::CompositeAlphaMode::PreMultiplied) {
        wgpu::CompositeAlphaMode::PreMultiplied
    } else {
        caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto)
    };

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(device, &config);

    Ok((format, config))
}

async fn finish(
    instance: &wgpu::Instance,
    surface: wgpu::Surface<'static>,
    width: u32,
    height: u32,
) -> Result<GpuContext, GpuInitError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        })
        .await?;
    let adapter_info = adapter.get_info();
    info!(name = %adapter_info.name, backend = ?adapter_info.backend, "GPU adapter selected");

    let (device, queue) = init_device_and_queue(&adapter).await?;
    let (format, config) = configure_surface(&device, &adapter, &surface, width, height)?;

    Ok(GpuContext { device, queue, surface, format, config })
}

impl GpuContext {
    /// Reconfigure after a size change; zero sizes are ignored
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        true
    }
}

#[cfg(target_arch = "wasm32")]
impl GpuContext {
    /// Initialize GPU for a given canvas surface (WASM)
    pub async fn new(
        canvas: &web_sys::HtmlCanvasElement,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuInitError> {
        let instance = create_instance();
        let surface = instance.create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone()))?;
        finish(&instance, surface, width, height).await
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl GpuContext {
    /// Initialize GPU for a window surface (Native). The surface must come
    /// from `instance`.
    pub async fn new_native(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuInitError> {
        finish(instance, surface, width, height).await
    }
}
