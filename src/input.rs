//! Pointer, keyboard, wheel and touch input folded into per-frame state.
//!
//! Events only reach the handler through explicit listener registrations. Pointer,
//! wheel and touch listeners belong to the canvas, keyboard listeners to the
//! window; an event whose listener is not registered is dropped. The frame loop
//! reads the state after the scene update and then calls
//! [`InputHandler::reset_deltas`], so deltas only ever describe one frame.

use std::{cell::Cell, collections::HashSet};

use cgmath::{EuclideanSpace, InnerSpace, Point3, SquareMatrix, Vector2, Vector3, Vector4};
use winit::{
    event::{ElementState, MouseButton, MouseScrollDelta, TouchPhase, WindowEvent},
    keyboard::{Key, NamedKey},
};

use crate::camera::Camera;

/// What a listener is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    Canvas,
    Window,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    PointerMove,
    PointerDown,
    PointerUp,
    Wheel,
    TouchStart,
    TouchMove,
    TouchEnd,
    KeyDown,
    KeyUp,
}

impl ListenerKind {
    pub const ALL: [ListenerKind; 9] = [
        ListenerKind::PointerMove,
        ListenerKind::PointerDown,
        ListenerKind::PointerUp,
        ListenerKind::Wheel,
        ListenerKind::TouchStart,
        ListenerKind::TouchMove,
        ListenerKind::TouchEnd,
        ListenerKind::KeyDown,
        ListenerKind::KeyUp,
    ];

    pub fn target(&self) -> ListenerTarget {
        match self {
            ListenerKind::KeyDown | ListenerKind::KeyUp => ListenerTarget::Window,
            _ => ListenerTarget::Canvas,
        }
    }

    /// Whether the platform's default action (page scrolling) must be suppressed.
    pub fn prevents_default(&self) -> bool {
        matches!(
            self,
            ListenerKind::Wheel | ListenerKind::TouchStart | ListenerKind::TouchMove
        )
    }
}

/// Raw input in canvas pixels.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    PointerMoved { x: f32, y: f32 },
    PointerPressed,
    PointerReleased,
    Wheel { dx: f32, dy: f32 },
    TouchStarted { id: u64, x: f32, y: f32 },
    TouchMoved { id: u64, x: f32, y: f32 },
    TouchEnded { id: u64 },
    KeyPressed(String),
    KeyReleased(String),
}

impl InputEvent {
    pub fn kind(&self) -> ListenerKind {
        match self {
            InputEvent::PointerMoved { .. } => ListenerKind::PointerMove,
            InputEvent::PointerPressed => ListenerKind::PointerDown,
            InputEvent::PointerReleased => ListenerKind::PointerUp,
            InputEvent::Wheel { .. } => ListenerKind::Wheel,
            InputEvent::TouchStarted { .. } => ListenerKind::TouchStart,
            InputEvent::TouchMoved { .. } => ListenerKind::TouchMove,
            InputEvent::TouchEnded { .. } => ListenerKind::TouchEnd,
            InputEvent::KeyPressed(_) => ListenerKind::KeyDown,
            InputEvent::KeyReleased(_) => ListenerKind::KeyUp,
        }
    }

    /// Translate the winit events this crate cares about.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::CursorMoved { position, .. } => Some(InputEvent::PointerMoved {
                x: position.x as f32,
                y: position.y as f32,
            }),
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => Some(match state {
                ElementState::Pressed => InputEvent::PointerPressed,
                ElementState::Released => InputEvent::PointerReleased,
            }),
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (*x, *y),
                    MouseScrollDelta::PixelDelta(pos) => (pos.x as f32 / 120.0, pos.y as f32 / 120.0),
                };
                Some(InputEvent::Wheel { dx, dy })
            }
            WindowEvent::Touch(touch) => {
                let (id, x, y) = (touch.id, touch.location.x as f32, touch.location.y as f32);
                Some(match touch.phase {
                    TouchPhase::Started => InputEvent::TouchStarted { id, x, y },
                    TouchPhase::Moved => InputEvent::TouchMoved { id, x, y },
                    TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::TouchEnded { id },
                })
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let key = key_name(&event.logical_key)?;
                Some(match event.state {
                    ElementState::Pressed => InputEvent::KeyPressed(key),
                    ElementState::Released => InputEvent::KeyReleased(key),
                })
            }
            _ => None,
        }
    }
}

/// Lower-case identifier of a logical key (`"a"`, `"escape"`, `"arrowleft"`).
pub fn key_name(key: &Key) -> Option<String> {
    match key {
        Key::Character(c) => Some(c.to_lowercase()),
        Key::Named(NamedKey::Space) => Some(" ".to_string()),
        Key::Named(named) => Some(format!("{named:?}").to_lowercase()),
        _ => None,
    }
}

/// Pointer position in normalized device coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerState {
    pub x: f32,
    pub y: f32,
    pub delta_x: f32,
    pub delta_y: f32,
    pub pressed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct KeyboardState {
    held: HashSet<String>,
    last_pressed: Option<String>,
}

impl KeyboardState {
    /// Case-insensitive.
    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains(&key.to_lowercase())
    }

    pub fn last_pressed(&self) -> Option<&str> {
        self.last_pressed.as_deref()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// A half-line in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn point_at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }

    /// Distance to the nearest hit in front of the origin.
    pub fn intersect_sphere(&self, center: Point3<f32>, radius: f32) -> Option<f32> {
        let oc = self.origin - center;
        let b = 2.0 * oc.dot(self.direction);
        let c = oc.dot(oc) - radius * radius;
        let discriminant = b * b - 4.0 * c;
        if discriminant < 0.0 {
            return None;
        }
        let sqrt = discriminant.sqrt();
        [(-b - sqrt) / 2.0, (-b + sqrt) / 2.0]
            .into_iter()
            .find(|t| *t > 0.0)
    }
}

/// Reusable picking ray, re-aimed on demand.
#[derive(Clone, Debug)]
pub struct Raycaster {
    ray: Ray,
}

impl Default for Raycaster {
    fn default() -> Self {
        Self {
            ray: Ray {
                origin: Point3::origin(),
                direction: -Vector3::unit_z(),
            },
        }
    }
}

impl Raycaster {
    /// Aim through `ndc` as seen by `camera`. Keeps the old ray for degenerate cameras.
    pub fn set_from_camera(&mut self, ndc: Vector2<f32>, camera: &Camera) -> &Ray {
        let Some(inverse) = camera.view_projection().invert() else {
            log::warn!("Camera matrix is not invertible, keeping previous ray");
            return &self.ray;
        };
        let unproject = |z: f32| {
            let world = inverse * Vector4::new(ndc.x, ndc.y, z, 1.0);
            Point3::from_vec(world.truncate() / world.w)
        };
        let near = unproject(0.0);
        let far = unproject(1.0);
        let direction = far - near;
        if direction.magnitude2() > f32::EPSILON {
            self.ray = Ray {
                origin: near,
                direction: direction.normalize(),
            };
        }
        &self.ray
    }

    pub fn ray(&self) -> &Ray {
        &self.ray
    }
}

pub struct InputHandler {
    listeners: HashSet<(ListenerTarget, ListenerKind)>,
    width: f32,
    height: f32,
    pointer: PointerState,
    keyboard: KeyboardState,
    scroll: Cell<Vector2<f32>>,
    active_touch: Option<u64>,
    raycaster: Raycaster,
}

impl InputHandler {
    /// A handler for a canvas of `width × height` pixels with no listeners yet.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            listeners: HashSet::new(),
            width: width.max(1) as f32,
            height: height.max(1) as f32,
            pointer: PointerState::default(),
            keyboard: KeyboardState::default(),
            scroll: Cell::new(Vector2::new(0.0, 0.0)),
            active_touch: None,
            raycaster: Raycaster::default(),
        }
    }

    /// Register every listener kind on its target.
    pub fn attach(&mut self) {
        for kind in ListenerKind::ALL {
            self.add_listener(kind);
        }
    }

    pub fn add_listener(&mut self, kind: ListenerKind) -> bool {
        let added = self.listeners.insert((kind.target(), kind));
        if added {
            log::trace!("Added {kind:?} listener on {:?}", kind.target());
        }
        added
    }

    pub fn remove_listener(&mut self, kind: ListenerKind) -> bool {
        let removed = self.listeners.remove(&(kind.target(), kind));
        if removed {
            log::trace!("Removed {kind:?} listener from {:?}", kind.target());
        }
        removed
    }

    pub fn has_listener(&self, kind: ListenerKind) -> bool {
        self.listeners.contains(&(kind.target(), kind))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listeners_on(&self, target: ListenerTarget) -> usize {
        self.listeners.iter().filter(|(t, _)| *t == target).count()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1) as f32;
        self.height = height.max(1) as f32;
    }

    /// Fold `event` into the state. Returns `false` if no listener took it.
    pub fn handle_event(&mut self, event: &InputEvent) -> bool {
        if !self.has_listener(event.kind()) {
            return false;
        }
        match event {
            InputEvent::PointerMoved { x, y } => self.move_pointer(*x, *y, true),
            InputEvent::PointerPressed => self.pointer.pressed = true,
            InputEvent::PointerReleased => self.pointer.pressed = false,
            InputEvent::Wheel { dx, dy } => self.scroll.set(self.scroll.get() + Vector2::new(*dx, *dy)),
            InputEvent::TouchStarted { id, x, y } => {
                if self.active_touch.is_none() {
                    self.active_touch = Some(*id);
                    self.move_pointer(*x, *y, false);
                    self.pointer.pressed = true;
                }
            }
            InputEvent::TouchMoved { id, x, y } => {
                if self.active_touch == Some(*id) {
                    self.move_pointer(*x, *y, true);
                }
            }
            InputEvent::TouchEnded { id } => {
                if self.active_touch == Some(*id) {
                    self.active_touch = None;
                    self.pointer.pressed = false;
                }
            }
            InputEvent::KeyPressed(key) => {
                let key = key.to_lowercase();
                self.keyboard.held.insert(key.clone());
                self.keyboard.last_pressed = Some(key);
            }
            InputEvent::KeyReleased(key) => {
                self.keyboard.held.remove(&key.to_lowercase());
            }
        }
        true
    }

    fn move_pointer(&mut self, px: f32, py: f32, track_delta: bool) {
        let x = ((px / self.width) * 2.0 - 1.0).clamp(-1.0, 1.0);
        let y = (1.0 - (py / self.height) * 2.0).clamp(-1.0, 1.0);
        if track_delta {
            self.pointer.delta_x += x - self.pointer.x;
            self.pointer.delta_y += y - self.pointer.y;
        }
        self.pointer.x = x;
        self.pointer.y = y;
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    /// Scroll accumulated since the last call, in lines.
    pub fn take_scroll(&self) -> Vector2<f32> {
        self.scroll.replace(Vector2::new(0.0, 0.0))
    }

    pub fn peek_scroll(&self) -> Vector2<f32> {
        self.scroll.get()
    }

    pub fn reset_deltas(&mut self) {
        self.pointer.delta_x = 0.0;
        self.pointer.delta_y = 0.0;
    }

    /// Re-aim the ray caster through the current pointer position.
    pub fn update_raycaster(&mut self, camera: &Camera) -> &Ray {
        let ndc = Vector2::new(self.pointer.x, self.pointer.y);
        self.raycaster.set_from_camera(ndc, camera)
    }

    pub fn raycaster(&self) -> &Raycaster {
        &self.raycaster
    }

    /// Remove every listener and forget held keys.
    pub fn dispose(&mut self) {
        let removed = self.listeners.len();
        self.listeners.clear();
        self.keyboard = KeyboardState::default();
        self.pointer.pressed = false;
        self.active_touch = None;
        self.scroll.set(Vector2::new(0.0, 0.0));
        log::debug!("Input disposed, removed {removed} listener(s)");
    }
}
