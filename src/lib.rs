// Re-export all public modules so they can be used from main.rs
pub mod config;
pub mod logging;
pub mod utils;
pub mod ui;

// MVC Architecture
pub mod model;
pub mod view;
pub mod controller;

#[cfg(target_arch = "wasm32")]
use {
    crate::config::WalkConfig,
    crate::controller::{input::wasm as dom, FrameLoopContext, InputEvent, KeyBindings, LightingUniform},
    crate::model::{loader::BrowserFetch, AssetLoader, LoadStatus},
    crate::view::{GpuContext, RenderState},
    glam::Vec2,
    std::cell::{Cell, RefCell},
    std::rc::Rc,
    tracing::{info, warn},
    wasm_bindgen::closure::Closure,
    wasm_bindgen::{prelude::wasm_bindgen, JsCast, JsValue},
    web_sys::{Document, Element, Event, HtmlCanvasElement, HtmlElement, KeyboardEvent, MouseEvent, TouchEvent, Window},
};

/// Input events queued by DOM callbacks, drained once per animation frame
#[cfg(target_arch = "wasm32")]
type EventQueue = Rc<RefCell<Vec<InputEvent>>>;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    logging::init();

    let window = web_sys::window().ok_or_else(|| js_error("no global `window`"))?;
    let document = window.document().ok_or_else(|| js_error("no document on window"))?;

    let mut config = WalkConfig::default();
    if let Ok(query) = window.location().search() {
        config.apply_query(&query);
    }
    info!(?config, "starting walkthrough");

    let (width, height) = viewport_size(&window);
    let canvas = init_canvas(&document, width, height)?;
    setup_app(window, document, canvas, config).await
}

/// Main application setup for WASM
#[cfg(target_arch = "wasm32")]
async fn setup_app(
    window: Window,
    document: Document,
    canvas: HtmlCanvasElement,
    config: WalkConfig,
) -> Result<(), JsValue> {
    let mut gpu = GpuContext::new(&canvas, canvas.width(), canvas.height())
        .await
        .map_err(|e| js_error(format!("GPU init failed: {e}")))?;

    let width = gpu.config.width;
    let height = gpu.config.height;

    let mut render_state = RenderState::new(gpu.device.as_ref(), gpu.queue.as_ref(), gpu.format, gpu.config.alpha_mode, width, height);
    let mut frame_ctx = FrameLoopContext::new(&config, width, height);
    let lighting = LightingUniform::for_config(&config);
    let egui_ctx = egui::Context::default();
    let mut fps = ui::FpsCounter::default();

    let events: EventQueue = Rc::new(RefCell::new(Vec::new()));
    let pending_size: Rc<Cell<Option<(u32, u32)>>> = Rc::new(Cell::new(None));

    setup_input_listeners(&window, &document, &canvas, events.clone(), KeyBindings::default())?;
    setup_resize_listener(&window, pending_size.clone())?;
    let knob = setup_joystick(&document, events.clone())?;

    let load_status = Rc::new(RefCell::new(LoadStatus::default()));
    spawn_scene_load(config.object_id.clone(), load_status.clone());

    let performance = window.performance();
    let mut last_time = performance.as_ref().map(|p| p.now()).unwrap_or(0.0);
    let mut last_knob = Vec2::ZERO;
    let object_id = config.object_id.clone();

    // Continuous redraw using requestAnimationFrame
    let f = RcCellCallback::new(window.clone(), move || {
        let now = performance.as_ref().map(|p| p.now()).unwrap_or(last_time);
        let dt = ((now - last_time) / 1000.0) as f32;
        last_time = now;

        if let Some((w, h)) = pending_size.take() {
            canvas.set_width(w);
            canvas.set_height(h);
            if gpu.resize(w, h) {
                render_state.resize(gpu.device.as_ref(), w, h);
                frame_ctx.resize(w, h);
            }
        }

        if let Some(scene) = load_status.borrow_mut().take_loaded() {
            render_state.upload_scene(gpu.device.as_ref(), gpu.queue.as_ref(), &scene);
            frame_ctx.attach_scene(scene);
        }

        let queued = std::mem::take(&mut *events.borrow_mut());
        frame_ctx.update(queued);

        if let Some(knob) = &knob {
            let offset = frame_ctx.joystick_knob();
            if offset != last_knob {
                set_knob_offset(knob, offset);
                last_knob = offset;
            }
        }

        render_state.write_uniforms(gpu.queue.as_ref(), &frame_ctx.camera_uniform(), &lighting);

        let output = {
            let status = load_status.borrow();
            let info = ui::HudInfo {
                camera: &frame_ctx.cam,
                status: &status,
                fps: fps.tick(dt),
                pointer_locked: frame_ctx.input_state.pointer_locked,
                object_id: &object_id,
            };
            ui::build_ui(&egui_ctx, ui::canvas_raw_input(render_state.width, render_state.height, now), &info)
        };
        let primitives = egui_ctx.tessellate(output.shapes, output.pixels_per_point);
        render_state.set_ui(primitives, output.textures_delta, output.pixels_per_point);

        if let Err(e) = render_state.draw_frame(gpu.device.as_ref(), gpu.queue.as_ref(), &gpu.surface) {
            warn!("frame dropped: {e}");
        }
    });
    f.start()
}

/// Fetch and parse the model in the background; the frame loop picks it up when done
#[cfg(target_arch = "wasm32")]
fn spawn_scene_load(object_id: String, status: Rc<RefCell<LoadStatus>>) {
    wasm_bindgen_futures::spawn_local(async move {
        let loader = AssetLoader::new(BrowserFetch);
        let progress_status = status.clone();
        let result = loader
            .load(&object_id, move |progress| progress_status.borrow_mut().progress(progress))
            .await;
        status.borrow_mut().finish(result);
    });
}

/// Keyboard, pointer-lock, mouse and canvas touch listeners. Callbacks only queue events.
#[cfg(target_arch = "wasm32")]
fn setup_input_listeners(
    window: &Window,
    document: &Document,
    canvas: &HtmlCanvasElement,
    events: EventQueue,
    bindings: KeyBindings,
) -> Result<(), JsValue> {
    // Keyboard down
    {
        let events = events.clone();
        let document_for_exit = document.clone();
        let keydown = Closure::wrap(Box::new(move |e: KeyboardEvent| {
            let code = e.code();
            if bindings.is_release_pointer(&code) {
                document_for_exit.exit_pointer_lock();
            }
            // Keep arrows and space from scrolling the page
            if bindings.is_movement_key(&code) {
                e.prevent_default();
            }
            events.borrow_mut().push(dom::keyboard_event_to_input(&e, true));
        }) as Box<dyn FnMut(KeyboardEvent)>);
        document.add_event_listener_with_callback("keydown", keydown.as_ref().unchecked_ref())?;
        keydown.forget();
    }

    // Keyboard up
    {
        let events = events.clone();
        let keyup = Closure::wrap(Box::new(move |e: KeyboardEvent| {
            events.borrow_mut().push(dom::keyboard_event_to_input(&e, false));
        }) as Box<dyn FnMut(KeyboardEvent)>);
        document.add_event_listener_with_callback("keyup", keyup.as_ref().unchecked_ref())?;
        keyup.forget();
    }

    // Focus loss - key-ups will be missed, so release everything
    {
        let events = events.clone();
        let blur = Closure::wrap(Box::new(move |_e: Event| {
            events.borrow_mut().push(InputEvent::FocusLost);
        }) as Box<dyn FnMut(Event)>);
        window.add_event_listener_with_callback("blur", blur.as_ref().unchecked_ref())?;
        blur.forget();
    }

    // Visibility change
    {
        let events = events.clone();
        let doc_vis = document.clone();
        let visibility = Closure::wrap(Box::new(move |_e: Event| {
            if let Some(event) = dom::visibility_to_input(doc_vis.hidden()) {
                events.borrow_mut().push(event);
            }
        }) as Box<dyn FnMut(Event)>);
        document.add_event_listener_with_callback("visibilitychange", visibility.as_ref().unchecked_ref())?;
        visibility.forget();
    }

    // Pointer lock change
    {
        let events = events.clone();
        let doc_pl = document.clone();
        let plc = Closure::wrap(Box::new(move |_e: Event| {
            let locked = doc_pl.pointer_lock_element().is_some();
            events.borrow_mut().push(InputEvent::PointerLockChanged { locked });
        }) as Box<dyn FnMut(Event)>);
        document.add_event_listener_with_callback("pointerlockchange", plc.as_ref().unchecked_ref())?;
        plc.forget();
    }

    // Canvas click to enter pointer lock
    {
        let canvas_click = canvas.clone();
        let click = Closure::wrap(Box::new(move |_e: MouseEvent| {
            canvas_click.request_pointer_lock();
        }) as Box<dyn FnMut(MouseEvent)>);
        canvas.add_event_listener_with_callback("click", click.as_ref().unchecked_ref())?;
        click.forget();
    }

    // Mouse move, only turns the camera while locked
    {
        let events = events.clone();
        let mm = Closure::wrap(Box::new(move |e: MouseEvent| {
            events.borrow_mut().push(dom::mouse_move_to_input(&e));
        }) as Box<dyn FnMut(MouseEvent)>);
        document.add_event_listener_with_callback("mousemove", mm.as_ref().unchecked_ref())?;
        mm.forget();
    }

    // Touch drag on the canvas
    {
        let events = events.clone();
        let touchstart = Closure::wrap(Box::new(move |e: TouchEvent| {
            if let Some(event) = dom::surface_touch_start(&e) {
                events.borrow_mut().push(event);
            }
        }) as Box<dyn FnMut(TouchEvent)>);
        canvas.add_event_listener_with_callback("touchstart", touchstart.as_ref().unchecked_ref())?;
        touchstart.forget();
    }
    {
        let events = events.clone();
        let touchmove = Closure::wrap(Box::new(move |e: TouchEvent| {
            e.prevent_default();
            if let Some(event) = dom::surface_touch_move(&e) {
                events.borrow_mut().push(event);
            }
        }) as Box<dyn FnMut(TouchEvent)>);
        canvas.add_event_listener_with_callback("touchmove", touchmove.as_ref().unchecked_ref())?;
        touchmove.forget();
    }
    {
        let touchend = Closure::wrap(Box::new(move |_e: TouchEvent| {
            events.borrow_mut().push(InputEvent::SurfaceTouchEnd);
        }) as Box<dyn FnMut(TouchEvent)>);
        canvas.add_event_listener_with_callback("touchend", touchend.as_ref().unchecked_ref())?;
        canvas.add_event_listener_with_callback("touchcancel", touchend.as_ref().unchecked_ref())?;
        touchend.forget();
    }

    Ok(())
}

/// Wire the on-screen joystick. Returns the knob element, or `None` when the
/// page has no joystick markup.
#[cfg(target_arch = "wasm32")]
fn setup_joystick(document: &Document, events: EventQueue) -> Result<Option<HtmlElement>, JsValue> {
    let (Some(container), Some(knob)) = (
        document.get_element_by_id("joystick-container"),
        document.get_element_by_id("joystick"),
    ) else {
        warn!("joystick elements not found, touch joystick disabled");
        return Ok(None);
    };
    let knob = knob
        .dyn_into::<HtmlElement>()
        .map_err(|_| js_error("#joystick is not an HTML element"))?;

    {
        let events = events.clone();
        let container_for_radius = container.clone();
        let touchstart = Closure::wrap(Box::new(move |e: TouchEvent| {
            // The knob may travel half the container width
            let radius = container_for_radius.client_width() as f32 / 2.0;
            if let Some(event) = dom::joystick_start(&e, radius) {
                events.borrow_mut().push(event);
            }
        }) as Box<dyn FnMut(TouchEvent)>);
        container.add_event_listener_with_callback("touchstart", touchstart.as_ref().unchecked_ref())?;
        touchstart.forget();
    }
    {
        let events = events.clone();
        let touchmove = Closure::wrap(Box::new(move |e: TouchEvent| {
            e.prevent_default();
            if let Some(event) = dom::joystick_move(&e) {
                events.borrow_mut().push(event);
            }
        }) as Box<dyn FnMut(TouchEvent)>);
        container.add_event_listener_with_callback("touchmove", touchmove.as_ref().unchecked_ref())?;
        touchmove.forget();
    }
    {
        let touchend = Closure::wrap(Box::new(move |_e: TouchEvent| {
            events.borrow_mut().push(InputEvent::JoystickEnd);
        }) as Box<dyn FnMut(TouchEvent)>);
        container.add_event_listener_with_callback("touchend", touchend.as_ref().unchecked_ref())?;
        container.add_event_listener_with_callback("touchcancel", touchend.as_ref().unchecked_ref())?;
        touchend.forget();
    }

    Ok(Some(knob))
}

#[cfg(target_arch = "wasm32")]
fn setup_resize_listener(window: &Window, pending_size: Rc<Cell<Option<(u32, u32)>>>) -> Result<(), JsValue> {
    let window_for_size = window.clone();
    let resize = Closure::wrap(Box::new(move |_e: Event| {
        pending_size.set(Some(viewport_size(&window_for_size)));
    }) as Box<dyn FnMut(Event)>);
    window.add_event_listener_with_callback("resize", resize.as_ref().unchecked_ref())?;
    resize.forget();
    Ok(())
}

/// Offset the knob from the joystick centre
#[cfg(target_arch = "wasm32")]
fn set_knob_offset(knob: &HtmlElement, offset: Vec2) {
    let transform = format!("translate(calc(-50% + {:.1}px), calc(-50% + {:.1}px))", offset.x, offset.y);
    if let Err(e) = knob.style().set_property("transform", &transform) {
        warn!(?e, "failed to move joystick knob");
    }
}

#[cfg(target_arch = "wasm32")]
fn viewport_size(window: &Window) -> (u32, u32) {
    let dim = |v: Result<JsValue, JsValue>, fallback: u32| {
        v.ok()
            .and_then(|v| v.as_f64())
            .map(|v| v.max(1.0) as u32)
            .unwrap_or(fallback)
    };
    (dim(window.inner_width(), 800), dim(window.inner_height(), 600))
}

/// Create the full-window canvas under `#container3D`, or `<body>` if the page lacks it
#[cfg(target_arch = "wasm32")]
fn init_canvas(document: &Document, width: u32, height: u32) -> Result<HtmlCanvasElement, JsValue> {
    let parent: Element = match document.get_element_by_id("container3D") {
        Some(container) => container,
        None => {
            warn!("#container3D not found, attaching canvas to <body>");
            document.body().ok_or_else(|| js_error("no body on document"))?.into()
        }
    };
    let canvas_el = document
        .create_element("canvas")?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| js_error("failed to create canvas"))?;
    canvas_el.set_width(width);
    canvas_el.set_height(height);
    // Touch drags steer the camera instead of scrolling the page
    canvas_el.style().set_property("touch-action", "none")?;
    canvas_el.style().set_property("display", "block")?;
    parent.append_child(&canvas_el)?;
    Ok(canvas_el)
}

#[cfg(target_arch = "wasm32")]
fn js_error<E: Into<String>>(msg: E) -> JsValue {
    JsValue::from_str(&msg.into())
}

#[cfg(target_arch = "wasm32")]
struct RcCellCallback {
    inner: Rc<RefCell<Box<dyn FnMut()>>>,
    window: Window,
}

#[cfg(target_arch = "wasm32")]
impl RcCellCallback {
    fn new(window: Window, f: impl FnMut() + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Box::new(f))),
            window,
        }
    }

    fn start(self) -> Result<(), JsValue> {
        let inner = self.inner.clone();
        let window = self.window.clone();

        let callback = Rc::new(RefCell::new(None::<Closure<dyn FnMut()>>));
        let callback_clone = callback.clone();

        *callback.borrow_mut() = Some(Closure::wrap(Box::new(move || {
            inner.borrow_mut().as_mut()();

            // Recursively schedule next frame
            if let Some(cb) = callback_clone.borrow().as_ref() {
                if let Err(e) = window.request_animation_frame(cb.as_ref().unchecked_ref()) {
                    tracing::error!(?e, "requestAnimationFrame failed, render loop stopped");
                }
            }
        }) as Box<dyn FnMut()>));

        if let Some(cb) = callback.borrow().as_ref() {
            self.window.request_animation_frame(cb.as_ref().unchecked_ref())?;
        }

        // Leak the closure to keep it alive
        std::mem::forget(callback);
        Ok(())
    }
}
