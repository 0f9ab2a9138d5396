/// Platform-agnostic input handling system
use std::collections::HashSet;
use glam::Vec2;

use crate::config::SurfaceDrag;

/// Platform-independent input events, queued by the platform layer and
/// applied in arrival order once per frame
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    // Keyboard events, physical key codes ("KeyW", "ShiftLeft", ...)
    KeyDown(String),
    KeyUp(String),

    // Pointer-lock mouse movement
    MouseMove { dx: f32, dy: f32 },
    PointerLockChanged { locked: bool },

    // Single-finger drag on the render surface
    SurfaceTouchStart { x: f32, y: f32 },
    SurfaceTouchMove { x: f32, y: f32, touches: u32 },
    SurfaceTouchEnd,

    // Virtual joystick
    JoystickStart { x: f32, y: f32, radius: f32 },
    JoystickMove { x: f32, y: f32 },
    JoystickEnd,

    // Window events
    FocusLost,
}

/// Logical movement actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Forward,
    Back,
    Left,
    Right,
    Sprint,
}

impl Action {
    pub const ALL: [Action; 5] = [Action::Forward, Action::Back, Action::Left, Action::Right, Action::Sprint];
    pub const DIRECTIONS: [Action; 4] = [Action::Forward, Action::Back, Action::Left, Action::Right];

    fn index(self) -> usize {
        self as usize
    }
}

/// Direction flags for a drag delta in screen space (y grows downwards).
/// Each axis is discretized by sign only.
pub fn directions_from_delta(delta: Vec2) -> [(Action, bool); 4] {
    [
        (Action::Forward, delta.y < 0.0),
        (Action::Back, delta.y > 0.0),
        (Action::Left, delta.x < 0.0),
        (Action::Right, delta.x > 0.0),
    ]
}

/// Scale `delta` down to length `radius` if it is longer, keeping its direction
pub fn clamp_to_radius(delta: Vec2, radius: f32) -> Vec2 {
    let radius = radius.max(0.0);
    let distance = delta.length();
    if distance > radius && distance > 0.0 {
        delta * (radius / distance)
    } else {
        delta
    }
}

/// Tracks the previous point of a single-finger drag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TouchDrag {
    last: Option<Vec2>,
}

impl TouchDrag {
    pub fn start(&mut self, at: Vec2) {
        self.last = Some(at);
    }

    /// Delta since the previous point, or None when no drag is in progress
    pub fn drag_to(&mut self, at: Vec2) -> Option<Vec2> {
        let last = self.last.replace(at)?;
        Some(at - last)
    }

    pub fn end(&mut self) {
        self.last = None;
    }

    pub fn is_active(&self) -> bool {
        self.last.is_some()
    }
}

/// On-screen joystick: displacement from where the finger went down,
/// limited to the joystick's radius
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Joystick {
    origin: Option<Vec2>,
    radius: f32,
    knob: Vec2,
}

impl Joystick {
    pub fn start(&mut self, at: Vec2, radius: f32) {
        self.origin = Some(at);
        self.radius = radius;
        self.knob = Vec2::ZERO;
    }

    /// New knob offset, or None if the joystick isn't being dragged
    pub fn drag_to(&mut self, at: Vec2) -> Option<Vec2> {
        let origin = self.origin?;
        self.knob = clamp_to_radius(at - origin, self.radius);
        Some(self.knob)
    }

    pub fn release(&mut self) {
        self.origin = None;
        self.knob = Vec2::ZERO;
    }

    pub fn is_dragging(&self) -> bool {
        self.origin.is_some()
    }

    /// Knob offset from the center of the joystick, in pixels
    pub fn knob(&self) -> Vec2 {
        self.knob
    }
}

/// Unified input state
pub struct InputState {
    actions: [bool; 5],
    pub pressed_keys: HashSet<String>,
    pub pointer_locked: bool,
    pub touch: TouchDrag,
    pub joystick: Joystick,
    pub surface_drag: SurfaceDrag,
    bindings: KeyBindings,
}

impl InputState {
    pub fn new() -> Self {
        Self::with_bindings(KeyBindings::default(), SurfaceDrag::Look)
    }

    pub fn with_bindings(bindings: KeyBindings, surface_drag: SurfaceDrag) -> Self {
        Self {
            actions: [false; 5],
            pressed_keys: HashSet::new(),
            pointer_locked: false,
            touch: TouchDrag::default(),
            joystick: Joystick::default(),
            surface_drag,
            bindings,
        }
    }

    /// Process an input event and update state.
    ///
    /// Returns a look delta (pixels) for the look controller when the event
    /// should turn the camera. Every producer writes the same action flags, so
    /// whichever event touched a flag last wins.
    pub fn process_event(&mut self, event: &InputEvent) -> Option<Vec2> {
        match event {
            InputEvent::KeyDown(code) => {
                if let Some(action) = self.bindings.action_for(code) {
                    self.set(action, true);
                }
                self.pressed_keys.insert(code.clone());
            }
            InputEvent::KeyUp(code) => {
                if let Some(action) = self.bindings.action_for(code) {
                    self.set(action, false);
                }
                self.pressed_keys.remove(code.as_str());
            }
            InputEvent::MouseMove { dx, dy } => {
                if self.pointer_locked {
                    return Some(Vec2::new(*dx, *dy));
                }
            }
            InputEvent::PointerLockChanged { locked } => {
                self.pointer_locked = *locked;
            }
            InputEvent::SurfaceTouchStart { x, y } => {
                self.touch.start(Vec2::new(*x, *y));
            }
            InputEvent::SurfaceTouchMove { x, y, touches } => {
                if *touches != 1 {
                    return None;
                }
                let delta = self.touch.drag_to(Vec2::new(*x, *y))?;
                if self.surface_drag.moves() {
                    self.set_directions(delta);
                }
                if self.surface_drag.looks() {
                    return Some(delta);
                }
            }
            InputEvent::SurfaceTouchEnd => {
                self.touch.end();
                if self.surface_drag.moves() {
                    self.clear_directions();
                }
            }
            InputEvent::JoystickStart { x, y, radius } => {
                self.joystick.start(Vec2::new(*x, *y), *radius);
            }
            InputEvent::JoystickMove { x, y } => {
                if let Some(knob) = self.joystick.drag_to(Vec2::new(*x, *y)) {
                    self.set_directions(knob);
                }
            }
            InputEvent::JoystickEnd => {
                self.joystick.release();
                self.clear_directions();
            }
            InputEvent::FocusLost => {
                self.clear_keys();
            }
        }
        None
    }

    pub fn is_held(&self, action: Action) -> bool {
        self.actions[action.index()]
    }

    pub fn set(&mut self, action: Action, held: bool) {
        self.actions[action.index()] = held;
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.pressed_keys.contains(key)
    }

    fn set_directions(&mut self, delta: Vec2) {
        for (action, held) in directions_from_delta(delta) {
            self.set(action, held);
        }
    }

    fn clear_directions(&mut self) {
        for action in Action::DIRECTIONS {
            self.set(action, false);
        }
    }

    /// Release everything, e.g. when the window loses focus and key-ups would be missed
    pub fn clear_keys(&mut self) {
        self.pressed_keys.clear();
        self.actions = [false; 5];
        self.touch.end();
        self.joystick.release();
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

/// Key mapping configuration, by physical key code
#[derive(Clone)]
pub struct KeyBindings {
    pub forward: Vec<String>,
    pub back: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub sprint: Vec<String>,
    pub release_pointer: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let codes = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            forward: codes(&["KeyW", "ArrowUp"]),
            back: codes(&["KeyS", "ArrowDown"]),
            left: codes(&["KeyA", "ArrowLeft"]),
            right: codes(&["KeyD", "ArrowRight"]),
            sprint: codes(&["ShiftLeft"]),
            release_pointer: "Escape".to_string(),
        }
    }
}

impl KeyBindings {
    pub fn action_for(&self, code: &str) -> Option<Action> {
        Action::ALL
            .into_iter()
            .find(|action| self.codes(*action).iter().any(|c| c == code))
    }

    fn codes(&self, action: Action) -> &[String] {
        match action {
            Action::Forward => &self.forward,
            Action::Back => &self.back,
            Action::Left => &self.left,
            Action::Right => &self.right,
            Action::Sprint => &self.sprint,
        }
    }

    /// Keys whose browser default (page scrolling) should be suppressed
    pub fn is_movement_key(&self, code: &str) -> bool {
        self.action_for(code).is_some()
    }

    pub fn is_release_pointer(&self, code: &str) -> bool {
        code == self.release_pointer
    }
}

pub mod wasm {
    use super::*;
    use web_sys::{KeyboardEvent, MouseEvent, TouchEvent};

    pub fn keyboard_event_to_input(e: &KeyboardEvent, is_down: bool) -> InputEvent {
        let code = e.code();
        if is_down {
            InputEvent::KeyDown(code)
        } else {
            InputEvent::KeyUp(code)
        }
    }

    pub fn mouse_move_to_input(e: &MouseEvent) -> InputEvent {
        InputEvent::MouseMove {
            dx: e.movement_x() as f32,
            dy: e.movement_y() as f32,
        }
    }

    /// Client position of the first active touch
    pub fn first_touch(e: &TouchEvent) -> Option<(f32, f32)> {
        let touch = e.touches().get(0)?;
        Some((touch.client_x() as f32, touch.client_y() as f32))
    }

    pub fn surface_touch_start(e: &TouchEvent) -> Option<InputEvent> {
        let (x, y) = first_touch(e)?;
        Some(InputEvent::SurfaceTouchStart { x, y })
    }

    pub fn surface_touch_move(e: &TouchEvent) -> Option<InputEvent> {
        let (x, y) = first_touch(e)?;
        Some(InputEvent::SurfaceTouchMove { x, y, touches: e.touches().length() })
    }

    pub fn joystick_start(e: &TouchEvent, radius: f32) -> Option<InputEvent> {
        let (x, y) = first_touch(e)?;
        Some(InputEvent::JoystickStart { x, y, radius })
    }

    /// Hiding the page drops key-ups the same way a blur does; becoming visible needs nothing
    pub fn visibility_to_input(hidden: bool) -> Option<InputEvent> {
        hidden.then_some(InputEvent::FocusLost)
    }

    pub fn joystick_move(e: &TouchEvent) -> Option<InputEvent> {
        let (x, y) = first_touch(e)?;
        Some(InputEvent::JoystickMove { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_down(code: &str) -> InputEvent {
        InputEvent::KeyDown(code.to_string())
    }

    fn key_up(code: &str) -> InputEvent {
        InputEvent::KeyUp(code.to_string())
    }

    #[test]
    fn test_only_hiding_the_page_releases_keys() {
        let mut input = InputState::new();
        input.process_event(&key_down("KeyW"));

        assert_eq!(wasm::visibility_to_input(false), None, "becoming visible must not drop held keys");
        assert!(input.is_held(Action::Forward));

        let hidden = wasm::visibility_to_input(true).expect("hiding releases keys");
        input.process_event(&hidden);
        assert!(!input.is_held(Action::Forward));
    }

    #[test]
    fn test_keyboard_sets_and_clears_actions() {
        let mut input = InputState::new();
        input.process_event(&key_down("KeyW"));
        input.process_event(&key_down("ShiftLeft"));
        assert!(input.is_held(Action::Forward));
        assert!(input.is_held(Action::Sprint));

        input.process_event(&key_up("KeyW"));
        assert!(!input.is_held(Action::Forward));
        assert!(input.is_held(Action::Sprint));
    }

    #[test]
    fn test_unknown_keys_are_recorded_but_unused() {
        let mut input = InputState::new();
        input.process_event(&key_down("KeyQ"));
        assert!(input.is_key_pressed("KeyQ"));
        assert!(Action::ALL.iter().all(|a| !input.is_held(*a)));
        input.process_event(&key_up("KeyQ"));
        assert!(!input.is_key_pressed("KeyQ"));
    }

    #[test]
    fn test_mouse_move_only_looks_while_locked() {
        let mut input = InputState::new();
        let mv = InputEvent::MouseMove { dx: 4.0, dy: -2.0 };
        assert_eq!(input.process_event(&mv), None);
        input.process_event(&InputEvent::PointerLockChanged { locked: true });
        assert_eq!(input.process_event(&mv), Some(Vec2::new(4.0, -2.0)));
    }

    #[test]
    fn test_surface_drag_looks_by_default() {
        let mut input = InputState::new();
        assert_eq!(input.process_event(&InputEvent::SurfaceTouchMove { x: 5.0, y: 5.0, touches: 1 }), None,
            "move without start has no previous point");
        input.process_event(&InputEvent::SurfaceTouchStart { x: 10.0, y: 10.0 });
        let delta = input.process_event(&InputEvent::SurfaceTouchMove { x: 13.0, y: 6.0, touches: 1 });
        assert_eq!(delta, Some(Vec2::new(3.0, -4.0)));
        assert!(Action::DIRECTIONS.iter().all(|a| !input.is_held(*a)), "look mode must not walk");

        let delta = input.process_event(&InputEvent::SurfaceTouchMove { x: 14.0, y: 6.0, touches: 1 });
        assert_eq!(delta, Some(Vec2::new(1.0, 0.0)), "delta is relative to the previous move");

        input.process_event(&InputEvent::SurfaceTouchEnd);
        assert!(!input.touch.is_active());
    }

    #[test]
    fn test_multi_touch_moves_are_ignored() {
        let mut input = InputState::new();
        input.process_event(&InputEvent::SurfaceTouchStart { x: 0.0, y: 0.0 });
        assert_eq!(input.process_event(&InputEvent::SurfaceTouchMove { x: 9.0, y: 9.0, touches: 2 }), None);
    }

    #[test]
    fn test_surface_drag_move_mode_presses_directions() {
        let mut input = InputState::with_bindings(KeyBindings::default(), SurfaceDrag::Move);
        input.process_event(&InputEvent::SurfaceTouchStart { x: 100.0, y: 100.0 });
        let look = input.process_event(&InputEvent::SurfaceTouchMove { x: 90.0, y: 80.0, touches: 1 });
        assert_eq!(look, None);
        assert!(input.is_held(Action::Forward));
        assert!(input.is_held(Action::Left));
        assert!(!input.is_held(Action::Back));
        assert!(!input.is_held(Action::Right));

        input.process_event(&InputEvent::SurfaceTouchEnd);
        assert!(Action::DIRECTIONS.iter().all(|a| !input.is_held(*a)));
    }

    #[test]
    fn test_joystick_drag_and_release() {
        let mut input = InputState::new();
        input.process_event(&InputEvent::JoystickStart { x: 50.0, y: 50.0, radius: 40.0 });
        input.process_event(&InputEvent::JoystickMove { x: 60.0, y: 70.0 });
        assert!(input.is_held(Action::Back));
        assert!(input.is_held(Action::Right));
        assert!(!input.is_held(Action::Forward));
        assert_eq!(input.joystick.knob(), Vec2::new(10.0, 20.0));

        input.process_event(&InputEvent::JoystickEnd);
        assert_eq!(input.joystick.knob(), Vec2::ZERO, "knob recentres on release");
        assert!(Action::DIRECTIONS.iter().all(|a| !input.is_held(*a)));
    }

    #[test]
    fn test_joystick_move_without_start_is_ignored() {
        let mut input = InputState::new();
        input.process_event(&InputEvent::JoystickMove { x: 0.0, y: -30.0 });
        assert!(!input.is_held(Action::Forward));
    }

    #[test]
    fn test_joystick_clamps_to_radius() {
        let mut stick = Joystick::default();
        stick.start(Vec2::new(0.0, 0.0), 50.0);
        let knob = stick.drag_to(Vec2::new(300.0, -400.0)).expect("dragging");
        assert!((knob.length() - 50.0).abs() < 1e-4, "knob length {}", knob.length());
        assert!(knob.normalize().abs_diff_eq(Vec2::new(0.6, -0.8), 1e-6), "direction preserved");

        let inside = stick.drag_to(Vec2::new(3.0, 4.0)).expect("dragging");
        assert_eq!(inside, Vec2::new(3.0, 4.0));
    }

    #[test]
    fn test_clamp_to_radius_zero_delta() {
        assert_eq!(clamp_to_radius(Vec2::ZERO, 10.0), Vec2::ZERO);
        assert_eq!(clamp_to_radius(Vec2::new(3.0, 0.0), 0.0), Vec2::ZERO);
    }

    #[test]
    fn test_last_event_wins_across_producers() {
        let mut input = InputState::new();
        input.process_event(&key_down("KeyW"));
        input.process_event(&InputEvent::JoystickStart { x: 0.0, y: 0.0, radius: 40.0 });
        input.process_event(&InputEvent::JoystickEnd);
        assert!(!input.is_held(Action::Forward), "joystick release came after the key press");

        input.process_event(&InputEvent::JoystickStart { x: 0.0, y: 0.0, radius: 40.0 });
        input.process_event(&InputEvent::JoystickMove { x: 0.0, y: -10.0 });
        input.process_event(&key_up("KeyW"));
        assert!(!input.is_held(Action::Forward), "key release came after the joystick push");
    }

    #[test]
    fn test_focus_lost_releases_everything() {
        let mut input = InputState::new();
        input.process_event(&key_down("KeyD"));
        input.process_event(&key_down("ShiftLeft"));
        input.process_event(&InputEvent::JoystickStart { x: 0.0, y: 0.0, radius: 40.0 });
        input.process_event(&InputEvent::FocusLost);
        assert!(Action::ALL.iter().all(|a| !input.is_held(*a)));
        assert!(input.pressed_keys.is_empty());
        assert!(!input.joystick.is_dragging());
    }

    #[test]
    fn test_arrow_keys_are_bound() {
        let bindings = KeyBindings::default();
        assert_eq!(bindings.action_for("ArrowUp"), Some(Action::Forward));
        assert_eq!(bindings.action_for("ArrowRight"), Some(Action::Right));
        assert_eq!(bindings.action_for("ShiftRight"), None);
        assert!(bindings.is_release_pointer("Escape"));
    }
}
