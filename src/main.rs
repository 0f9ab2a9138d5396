use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::{CursorGrabMode, Window, WindowId},
};

// Import from the library crate
use walkthrough::{
    config::WalkConfig,
    controller::{FrameLoopContext, InputEvent, KeyBindings, LightingUniform},
    logging, ui,
    model::{loader::FileFetch, AssetLoader, LoadMessage, LoadStatus},
    view::{gpu_init, GpuContext, RenderState},
};

const INITIAL_SIZE: (u32, u32) = (1280, 720);

/// Everything that only exists once the window is up
struct Graphics {
    window: Arc<Window>,
    gpu: GpuContext,
    render_state: RenderState,
    egui_state: egui_winit::State,
}

struct App {
    config: WalkConfig,
    graphics: Option<Graphics>,
    frame_ctx: FrameLoopContext,
    lighting: LightingUniform,
    egui_ctx: egui::Context,
    bindings: KeyBindings,

    // Input handling
    events: Vec<InputEvent>,
    cursor_grabbed: bool,
    primary_touch: Option<u64>,
    active_touches: u32,

    // Asset load
    load_status: LoadStatus,
    load_rx: Option<Receiver<LoadMessage>>,

    // Frame timing
    fps: ui::FpsCounter,
    last_frame: Instant,
}

impl App {
    fn new(config: WalkConfig) -> Self {
        let frame_ctx = FrameLoopContext::new(&config, INITIAL_SIZE.0, INITIAL_SIZE.1);
        let lighting = LightingUniform::for_config(&config);

        let (load_status, load_rx) = match spawn_scene_load(config.object_id.clone()) {
            Ok(rx) => (LoadStatus::default(), Some(rx)),
            Err(e) => {
                error!("could not start loader thread: {e}");
                (LoadStatus::Failed(e.to_string()), None)
            }
        };

        Self {
            config,
            graphics: None,
            frame_ctx,
            lighting,
            egui_ctx: egui::Context::default(),
            bindings: KeyBindings::default(),
            events: Vec::new(),
            cursor_grabbed: false,
            primary_touch: None,
            active_touches: 0,
            load_status,
            load_rx,
            fps: ui::FpsCounter::default(),
            last_frame: Instant::now(),
        }
    }

    fn init_graphics(&self, event_loop: &ActiveEventLoop) -> Result<Graphics, Box<dyn std::error::Error>> {
        let window_attributes = Window::default_attributes()
            .with_title(format!("Walkthrough - {}", self.config.object_id))
            .with_inner_size(winit::dpi::LogicalSize::new(INITIAL_SIZE.0, INITIAL_SIZE.1));
        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();

        let instance = gpu_init::create_instance();
        let surface = instance.create_surface(window.clone())?;
        let gpu = pollster::block_on(GpuContext::new_native(&instance, surface, size.width, size.height))?;

        let render_state = RenderState::new(
            gpu.device.as_ref(),
            gpu.queue.as_ref(),
            gpu.format,
            gpu.config.alpha_mode,
            gpu.config.width,
            gpu.config.height,
        );
        let egui_state = egui_winit::State::new(
            self.egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            None,
            None,
            None,
        );

        Ok(Graphics { window, gpu, render_state, egui_state })
    }

    fn set_cursor_grab(&mut self, grab: bool) {
        if self.cursor_grabbed == grab {
            return;
        }
        let Some(gfx) = &self.graphics else { return };
        if grab {
            let grabbed = gfx
                .window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| gfx.window.set_cursor_grab(CursorGrabMode::Confined));
            if let Err(e) = grabbed {
                warn!("cursor grab unavailable: {e}");
                return;
            }
            gfx.window.set_cursor_visible(false);
        } else {
            if let Err(e) = gfx.window.set_cursor_grab(CursorGrabMode::None) {
                warn!("cursor release failed: {e}");
            }
            gfx.window.set_cursor_visible(true);
        }
        self.cursor_grabbed = grab;
        self.events.push(InputEvent::PointerLockChanged { locked: grab });
    }

    /// Translate window events into queued input. Returns true when handled.
    fn input(&mut self, event: &WindowEvent) -> bool {
        // Let egui see the event first, unless the camera owns the pointer
        if let Some(gfx) = &mut self.graphics {
            let response = gfx.egui_state.on_window_event(gfx.window.as_ref(), event);
            if response.consumed && !self.cursor_grabbed {
                return true;
            }
        }

        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else { return false };
                // winit key names match DOM `KeyboardEvent.code` for the bound keys
                let code = format!("{code:?}");
                match event.state {
                    ElementState::Pressed => {
                        if self.bindings.is_release_pointer(&code) {
                            self.set_cursor_grab(false);
                        }
                        self.events.push(InputEvent::KeyDown(code));
                    }
                    ElementState::Released => self.events.push(InputEvent::KeyUp(code)),
                }
                true
            }
            WindowEvent::MouseInput { state: ElementState::Pressed, button: MouseButton::Left, .. } => {
                self.set_cursor_grab(true);
                true
            }
            WindowEvent::Touch(touch) => {
                let (x, y) = (touch.location.x as f32, touch.location.y as f32);
                match touch.phase {
                    TouchPhase::Started => {
                        self.active_touches += 1;
                        if self.primary_touch.is_none() {
                            self.primary_touch = Some(touch.id);
                            self.events.push(InputEvent::SurfaceTouchStart { x, y });
                        }
                    }
                    TouchPhase::Moved if self.primary_touch == Some(touch.id) => {
                        self.events.push(InputEvent::SurfaceTouchMove { x, y, touches: self.active_touches });
                    }
                    TouchPhase::Moved => {}
                    TouchPhase::Ended | TouchPhase::Cancelled => {
                        self.active_touches = self.active_touches.saturating_sub(1);
                        if self.primary_touch == Some(touch.id) {
                            self.primary_touch = None;
                            self.events.push(InputEvent::SurfaceTouchEnd);
                        }
                    }
                }
                true
            }
            WindowEvent::Focused(false) => {
                self.events.push(InputEvent::FocusLost);
                self.set_cursor_grab(false);
                true
            }
            _ => false,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(gfx) = &mut self.graphics else { return };
        if gfx.gpu.resize(width, height) {
            gfx.render_state.resize(gfx.gpu.device.as_ref(), width, height);
            self.frame_ctx.resize(width, height);
        }
    }

    /// Drain everything the loader thread has sent since the last frame
    fn poll_loader(&mut self) {
        let Some(rx) = &self.load_rx else { return };
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(message) => self.load_status.apply(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            self.load_rx = None;
            if matches!(self.load_status, LoadStatus::Loading(_)) {
                self.load_status.finish(Err(walkthrough::model::LoadError::Network {
                    url: self.config.model_path(),
                    reason: "loader stopped before finishing".to_string(),
                }));
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.poll_loader();

        let Some(gfx) = &mut self.graphics else { return };

        if let Some(scene) = self.load_status.take_loaded() {
            gfx.render_state.upload_scene(gfx.gpu.device.as_ref(), gfx.gpu.queue.as_ref(), &scene);
            self.frame_ctx.attach_scene(scene);
        }

        self.frame_ctx.update(self.events.drain(..));
        gfx.render_state
            .write_uniforms(gfx.gpu.queue.as_ref(), &self.frame_ctx.camera_uniform(), &self.lighting);

        let raw_input = gfx.egui_state.take_egui_input(&gfx.window);
        let info = ui::HudInfo {
            camera: &self.frame_ctx.cam,
            status: &self.load_status,
            fps: self.fps.tick(dt),
            pointer_locked: self.cursor_grabbed,
            object_id: &self.config.object_id,
        };
        let output = ui::build_ui(&self.egui_ctx, raw_input, &info);
        gfx.egui_state.handle_platform_output(&gfx.window, output.platform_output);
        let primitives = self.egui_ctx.tessellate(output.shapes, output.pixels_per_point);
        gfx.render_state.set_ui(primitives, output.textures_delta, output.pixels_per_point);

        match gfx.render_state.draw_frame(gfx.gpu.device.as_ref(), gfx.gpu.queue.as_ref(), &gfx.gpu.surface) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("GPU out of memory, exiting");
                event_loop.exit();
            }
            Err(e) => warn!("frame dropped: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.graphics.is_some() {
            return;
        }
        match self.init_graphics(event_loop) {
            Ok(gfx) => {
                let size = gfx.window.inner_size();
                self.frame_ctx.resize(size.width, size.height);
                self.graphics = Some(gfx);
                info!(width = size.width, height = size.height, "window ready");
            }
            Err(e) => {
                error!("failed to initialise graphics: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.input(&event) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            self.events.push(InputEvent::MouseMove { dx: delta.0 as f32, dy: delta.1 as f32 });
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gfx) = &self.graphics {
            gfx.window.request_redraw();
        }
    }
}

/// Load the model on a background thread, reporting over a channel
fn spawn_scene_load(object_id: String) -> std::io::Result<Receiver<LoadMessage>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("scene-loader".to_string())
        .spawn(move || {
            let loader = AssetLoader::new(FileFetch::new("."));
            let progress_tx = tx.clone();
            let result = pollster::block_on(loader.load(&object_id, move |progress| {
                let _ = progress_tx.send(LoadMessage::Progress(progress));
            }));
            debug!(ok = result.is_ok(), "loader thread finished");
            let _ = tx.send(LoadMessage::Finished(result));
        })?;
    Ok(rx)
}

fn main() {
    logging::init();

    let config = WalkConfig::from_env();
    info!(?config, "starting walkthrough");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!("failed to create event loop: {e}");
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        error!("event loop error: {e}");
    }
}
