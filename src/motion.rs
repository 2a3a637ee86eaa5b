//! The user's reduced-motion preference.
//!
//! [`ReducedMotion`] is constructed once by the application and cloned into every
//! component that animates. It reads the platform preference lazily, lets a stored
//! user override win over it, scales animation durations, and notifies subscribers
//! when the effective preference flips.
//!
//! The platform listener is reference counted: it is attached when the first
//! [`Subscription`] is taken and detached when the last one is dropped.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::Duration,
};

/// Fraction of the normal duration used while reduced motion is active.
pub const REDUCED_DURATION_FACTOR: f32 = 0.01;

/// Platform access to the reduced-motion media query.
pub trait MotionQuery {
    /// Current platform preference.
    fn matches(&self) -> bool;

    /// Start reporting changes to `on_change`. Only called while detached.
    fn attach(&self, on_change: Box<dyn Fn(bool)>);

    /// Stop reporting changes. Only called while attached.
    fn detach(&self);
}

/// Reads `FLOW_REDUCED_MOTION` (`1`/`true`) once; never changes afterwards.
pub struct EnvMotionQuery;

impl MotionQuery for EnvMotionQuery {
    fn matches(&self) -> bool {
        std::env::var("FLOW_REDUCED_MOTION")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn attach(&self, _: Box<dyn Fn(bool)>) {}

    fn detach(&self) {}
}

/// `matchMedia("(prefers-reduced-motion: reduce)")` with a `change` listener.
#[cfg(target_arch = "wasm32")]
pub struct MediaMotionQuery {
    list: Option<web_sys::MediaQueryList>,
    listener: RefCell<Option<wasm_bindgen::closure::Closure<dyn FnMut(web_sys::MediaQueryListEvent)>>>,
}

#[cfg(target_arch = "wasm32")]
impl MediaMotionQuery {
    pub fn new() -> Self {
        let list = web_sys::window()
            .and_then(|window| window.match_media("(prefers-reduced-motion: reduce)").ok().flatten());
        if list.is_none() {
            log::warn!("matchMedia unavailable, assuming full motion");
        }
        Self {
            list,
            listener: RefCell::new(None),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl MotionQuery for MediaMotionQuery {
    fn matches(&self) -> bool {
        self.list.as_ref().map(|list| list.matches()).unwrap_or(false)
    }

    fn attach(&self, on_change: Box<dyn Fn(bool)>) {
        use wasm_bindgen::JsCast;

        let Some(list) = &self.list else { return };
        let closure = wasm_bindgen::closure::Closure::<dyn FnMut(web_sys::MediaQueryListEvent)>::new(
            move |event: web_sys::MediaQueryListEvent| on_change(event.matches()),
        );
        if list
            .add_event_listener_with_callback("change", closure.as_ref().unchecked_ref())
            .is_err()
        {
            log::warn!("Could not observe prefers-reduced-motion changes");
        }
        *self.listener.borrow_mut() = Some(closure);
    }

    fn detach(&self) {
        use wasm_bindgen::JsCast;

        let (Some(list), Some(closure)) = (&self.list, self.listener.borrow_mut().take()) else {
            return;
        };
        let _ = list.remove_event_listener_with_callback("change", closure.as_ref().unchecked_ref());
    }
}

/// The query matching the current platform.
pub fn platform_query() -> Box<dyn MotionQuery> {
    #[cfg(target_arch = "wasm32")]
    {
        Box::new(MediaMotionQuery::new())
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Box::new(EnvMotionQuery)
    }
}

type Listener = Rc<dyn Fn(bool)>;

struct Inner {
    query: Box<dyn MotionQuery>,
    platform: Cell<Option<bool>>,
    user_override: Cell<Option<bool>>,
    subscribers: RefCell<Vec<(u64, Listener)>>,
    next_id: Cell<u64>,
    attached: Cell<bool>,
}

impl Inner {
    fn effective(&self) -> bool {
        if let Some(forced) = self.user_override.get() {
            return forced;
        }
        self.platform_value()
    }

    /// Cached while the change listener keeps it current, queried afresh otherwise.
    fn platform_value(&self) -> bool {
        if self.attached.get()
            && let Some(value) = self.platform.get()
        {
            return value;
        }
        let value = self.query.matches();
        if self.attached.get() {
            self.platform.set(Some(value));
        }
        value
    }

    fn notify(&self, reduced: bool) {
        // Listeners may subscribe or unsubscribe while being notified.
        let listeners: Vec<Listener> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        log::debug!("Reduced motion is now {}", if reduced { "on" } else { "off" });
        listeners.iter().for_each(|listener| listener(reduced));
    }

    fn platform_changed(&self, matches: bool) {
        let before = self.effective();
        self.platform.set(Some(matches));
        let after = self.effective();
        if before != after {
            self.notify(after);
        }
    }
}

/// Shared handle to the reduced-motion preference.
#[derive(Clone)]
pub struct ReducedMotion {
    inner: Rc<Inner>,
}

impl ReducedMotion {
    pub fn new(query: Box<dyn MotionQuery>) -> Self {
        Self {
            inner: Rc::new(Inner {
                query,
                platform: Cell::new(None),
                user_override: Cell::new(None),
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                attached: Cell::new(false),
            }),
        }
    }

    /// Detector backed by [`platform_query`].
    pub fn platform() -> Self {
        Self::new(platform_query())
    }

    /// Whether animations should be reduced right now.
    pub fn prefers_reduced_motion(&self) -> bool {
        self.inner.effective()
    }

    /// `normal` scaled down to [`REDUCED_DURATION_FACTOR`] while reduced motion is active.
    pub fn adjusted_duration(&self, normal: Duration) -> Duration {
        if self.prefers_reduced_motion() {
            normal.mul_f32(REDUCED_DURATION_FACTOR)
        } else {
            normal
        }
    }

    /// `reduced` while reduced motion is active, `normal` otherwise.
    pub fn adjusted_duration_or(&self, normal: Duration, reduced: Duration) -> Duration {
        if self.prefers_reduced_motion() {
            reduced
        } else {
            normal
        }
    }

    /// Force the preference regardless of the platform, or hand control back with `None`.
    pub fn set_override(&self, value: Option<bool>) {
        let before = self.inner.effective();
        self.inner.user_override.set(value);
        let after = self.inner.effective();
        if before != after {
            self.inner.notify(after);
        }
    }

    pub fn user_override(&self) -> Option<bool> {
        self.inner.user_override.get()
    }

    /// Call `listener` with the new value every time the effective preference changes.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.subscribers.borrow_mut().push((id, Rc::new(listener)));

        if !self.inner.attached.replace(true) {
            self.inner.platform.set(Some(self.inner.query.matches()));
            let weak: Weak<Inner> = Rc::downgrade(&self.inner);
            self.inner.query.attach(Box::new(move |matches| {
                if let Some(inner) = weak.upgrade() {
                    inner.platform_changed(matches);
                }
            }));
            log::trace!("Attached reduced-motion listener");
        }

        Subscription {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.attached.get()
    }

    /// Drop every subscriber and detach from the platform.
    pub fn teardown(&self) {
        self.inner.subscribers.borrow_mut().clear();
        detach_if_idle(&self.inner);
    }
}

fn detach_if_idle(inner: &Inner) {
    if inner.subscribers.borrow().is_empty() && inner.attached.replace(false) {
        inner.platform.set(None);
        inner.query.detach();
        log::trace!("Detached reduced-motion listener");
    }
}

/// Keeps a [`ReducedMotion::subscribe`] listener registered until dropped.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.subscribers.borrow_mut().retain(|(id, _)| *id != self.id);
        detach_if_idle(&inner);
    }
}
