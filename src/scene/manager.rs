//! The active-scene state machine.
//!
//! ```text
//!            start()                 init ok
//!   Idle(None) ────► Initializing(A) ────────► Idle(A)
//!
//!            transition_to(B)          B ready: camera → B, dispose A, mount B
//!   Idle(A) ─────────────────► Transitioning{A→B} ────────────────────────┐
//!      ▲            │ B init failed: stay on A                          │
//!      └────────────┘                                                   │
//!   Idle(B) ◄───────────────────────── camera transition settled ◄──────┘
//! ```
//!
//! While a transition is in flight every further navigation request is rejected,
//! not queued, and scene-level input is withheld. The only way out early is
//! [`SceneManager::cancel_transition`]:
//! - before B finished initializing, B is thrown away and A stays
//! - after the swap, the camera snaps to B's viewpoint and B becomes current
//!
//! All asynchronous work (scene `init` and the camera handle) is polled once per
//! [`SceneManager::frame`] on the calling thread.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use cgmath::Point3;
use futures::{FutureExt, future::LocalBoxFuture, task::noop_waker_ref};

use super::{
    FrameContext, Gpu, Navigation, RejectReason, Scene, SceneContext, SceneDescriptor, SceneId, SceneState,
    SceneTransitionState,
};
use crate::{
    camera::{Camera, CameraController, TransitionHandle, TransitionOptions, TweenOutcome},
    config::{ControlsConfig, FolioConfig},
    error::FolioError,
    input::{InputEvent, InputHandler},
    motion::Subscription,
    perf::{PerformanceMonitor, SceneBudget},
    preferences::{PreferenceStore, Preferences, unix_millis},
    render::{RenderError, Renderer},
    resources::dispose::ResourceDisposer,
};

type SceneSlot = Rc<RefCell<Option<Box<dyn Scene>>>>;

fn dispose_scene(scene: &mut dyn Scene) {
    scene.dispose();
    ResourceDisposer::dispose(scene.root_mut());
    log::debug!("Disposed scene '{}'", scene.id());
}

/// A scene whose `init` has not finished. Dropping it disposes the scene.
struct PendingInit {
    id: SceneId,
    init: Option<LocalBoxFuture<'static, anyhow::Result<()>>>,
    slot: SceneSlot,
}

impl PendingInit {
    #[allow(clippy::await_holding_refcell_ref)]
    fn start(scene: Box<dyn Scene>, ctx: SceneContext) -> Self {
        let id = scene.id().clone();
        let slot: SceneSlot = Rc::new(RefCell::new(Some(scene)));
        let init = {
            let slot = slot.clone();
            // The slot is only touched again once this future is gone.
            async move {
                let mut scene = slot.borrow_mut();
                match scene.as_mut() {
                    Some(scene) => scene.init(ctx).await,
                    None => Ok(()),
                }
            }
            .boxed_local()
        };
        log::debug!("Initializing scene '{id}'");
        Self {
            id,
            init: Some(init),
            slot,
        }
    }

    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        let Some(init) = self.init.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = futures::ready!(init.as_mut().poll(cx));
        self.init = None;
        Poll::Ready(result)
    }

    /// The initialized scene. Only meaningful once `poll` returned `Ready`.
    fn take_scene(&self) -> Option<Box<dyn Scene>> {
        if self.init.is_some() {
            return None;
        }
        self.slot.borrow_mut().take()
    }
}

impl Drop for PendingInit {
    fn drop(&mut self) {
        self.init.take();
        let abandoned = self.slot.borrow_mut().take();
        if let Some(mut scene) = abandoned {
            log::debug!("Abandoning scene '{}'", scene.id());
            dispose_scene(scene.as_mut());
        }
    }
}

enum Phase {
    Idle,
    /// First scene, or the current one being rebuilt after a context loss.
    Initializing(PendingInit),
    /// Transition step: waiting for the incoming scene's `init`.
    Preparing { from: Option<SceneId>, pending: PendingInit },
    /// Transition step: scenes swapped, camera on its way.
    Animating {
        from: Option<SceneId>,
        to: SceneId,
        handle: TransitionHandle,
    },
}

/// Owns the mounted scene and drives every frame.
pub struct SceneManager {
    registry: HashMap<SceneId, SceneDescriptor>,
    scene: Option<Box<dyn Scene>>,
    current_id: Option<SceneId>,
    previous_id: Option<SceneId>,
    phase: Phase,
    progress: Rc<Cell<f32>>,
    camera: CameraController,
    input: InputHandler,
    perf: PerformanceMonitor,
    renderer: Box<dyn Renderer>,
    ctx: SceneContext,
    controls: ControlsConfig,
    preferences: Option<(Box<dyn PreferenceStore>, Preferences)>,
    size: (u32, u32),
    started_at: Option<std::time::Duration>,
    last_frame: Option<std::time::Duration>,
    visible: bool,
    context_lost: bool,
    /// Scene whose first init was interrupted by a context loss.
    rebuild_id: Option<SceneId>,
    notices: Vec<FolioError>,
    /// Keeps the platform reduced-motion listener attached for the session.
    motion_subscription: Option<Subscription>,
}

impl SceneManager {
    pub fn new(config: &FolioConfig, ctx: SceneContext, renderer: Box<dyn Renderer>, width: u32, height: u32) -> Self {
        let camera = Camera::new(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0), &config.camera);
        let mut camera = CameraController::new(camera, config.camera.clone(), ctx.motion.clone());
        camera.update_aspect(width, height);
        let mut input = InputHandler::new(width, height);
        input.attach();
        let motion_subscription = ctx.motion.subscribe(|reduced| {
            log::info!("Reduced motion {}", if reduced { "enabled" } else { "disabled" });
        });
        Self {
            registry: HashMap::new(),
            scene: None,
            current_id: None,
            previous_id: None,
            phase: Phase::Idle,
            progress: Rc::new(Cell::new(0.0)),
            camera,
            input,
            perf: PerformanceMonitor::new(config.budgets.clone()),
            renderer,
            ctx,
            controls: config.controls.clone(),
            preferences: None,
            size: (width, height),
            started_at: None,
            last_frame: None,
            visible: true,
            context_lost: false,
            rebuild_id: None,
            notices: Vec::new(),
            motion_subscription: Some(motion_subscription),
        }
    }

    /// Persist visits and the reduced-motion override in `store`.
    pub fn with_preferences(mut self, store: Box<dyn PreferenceStore>) -> Self {
        let preferences = Preferences::load(store.as_ref());
        self.ctx.motion.set_override(preferences.reduced_motion_override);
        self.preferences = Some((store, preferences));
        self
    }

    pub fn register(&mut self, descriptor: SceneDescriptor) {
        if let Some(previous) = self.registry.insert(descriptor.id.clone(), descriptor) {
            log::warn!("Scene '{}' registered twice, keeping the latest", previous.id);
        }
    }

    /// Begin initializing the first scene.
    pub fn start(&mut self, id: impl Into<SceneId>) -> anyhow::Result<()> {
        let id = id.into();
        if !matches!(self.phase, Phase::Idle) || self.scene.is_some() {
            anyhow::bail!("the scene manager was already started");
        }
        let descriptor = self
            .registry
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("no scene registered as '{id}'"))?;
        self.camera
            .set_position(descriptor.camera_position, descriptor.camera_target);
        self.perf.set_scene_budget(budget_for(descriptor));
        let scene = (descriptor.factory)();
        self.phase = Phase::Initializing(PendingInit::start(scene, self.ctx.clone()));
        Ok(())
    }

    /// Navigate to `id`. Rejected requests change nothing.
    pub fn transition_to(&mut self, id: impl Into<SceneId>) -> Navigation {
        let id = id.into();
        let reason = match &self.phase {
            Phase::Preparing { .. } | Phase::Animating { .. } => Some(RejectReason::AlreadyTransitioning),
            Phase::Initializing(_) => Some(RejectReason::Initializing),
            Phase::Idle if self.context_lost => Some(RejectReason::ContextLost),
            Phase::Idle if self.current_id.as_ref() == Some(&id) => Some(RejectReason::AlreadyActive),
            Phase::Idle if !self.registry.contains_key(&id) => Some(RejectReason::UnknownScene),
            Phase::Idle => None,
        };
        if let Some(reason) = reason {
            log::debug!("Navigation to '{id}' rejected: {reason:?}");
            return Navigation::Rejected(reason);
        }
        let Some(descriptor) = self.registry.get(&id) else {
            return Navigation::Rejected(RejectReason::UnknownScene);
        };

        log::info!(
            "Transition {} -> {id}",
            self.current_id.as_ref().map(SceneId::as_str).unwrap_or("<none>")
        );
        let scene = (descriptor.factory)();
        self.progress.set(0.0);
        self.phase = Phase::Preparing {
            from: self.current_id.clone(),
            pending: PendingInit::start(scene, self.ctx.clone()),
        };
        Navigation::Started
    }

    /// Abort the running transition. Returns whether there was one.
    pub fn cancel_transition(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Preparing { pending, .. } => {
                log::info!("Transition to '{}' cancelled before it was ready", pending.id);
                drop(pending);
                self.progress.set(0.0);
                true
            }
            Phase::Animating { from, to, handle } => {
                log::info!("Transition to '{to}' cancelled, jumping to its viewpoint");
                if let Some((position, target)) = self.camera.transition_destination() {
                    self.camera.set_position(position, target);
                }
                drop(handle);
                self.finish_transition(from, to);
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Run one frame: poll pending work, update, render, sample, reset input.
    pub fn frame(&mut self) {
        if !self.visible || self.context_lost {
            return;
        }
        let now = self.ctx.clock.now();
        let started = *self.started_at.get_or_insert(now);
        let delta = self
            .last_frame
            .map(|last| now.saturating_sub(last))
            .unwrap_or_default();
        self.last_frame = Some(now);

        self.ctx.clock.fire_due();
        self.poll_init();
        self.camera.update(delta);
        self.poll_camera();
        self.handle_controls();

        if matches!(self.phase, Phase::Idle) && self.camera.parallax_strength() > 0.0 {
            let pointer = self.input.pointer();
            if pointer.delta_x != 0.0 || pointer.delta_y != 0.0 {
                let strength = self.camera.parallax_strength();
                self.camera.apply_parallax(pointer.x, pointer.y, strength);
            }
        }

        let transitioning = self.is_transitioning();
        if let Some(scene) = self.scene.as_mut() {
            let frame = FrameContext {
                delta,
                total: now.saturating_sub(started),
                input: (!transitioning).then_some(&self.input),
                camera: self.camera.camera(),
            };
            scene.update(&frame);
        }

        match self
            .renderer
            .render(self.scene.as_deref().map(|scene| scene.root()), self.camera.camera())
        {
            Ok(()) => (),
            Err(RenderError::ContextLost) => {
                self.on_context_lost();
                return;
            }
            Err(RenderError::Other(e)) => log::warn!("Frame dropped: {e:#}"),
        }

        let info = self.renderer.info();
        self.perf.update(now, &info);
        self.input.reset_deltas();
    }

    /// Feed an input event. Returns whether a listener took it.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        self.input.handle_event(event)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.size = (width, height);
        self.camera.update_aspect(width, height);
        self.renderer.resize(width, height);
        self.input.resize(width, height);
        if let Some(scene) = self.scene.as_mut() {
            scene.on_resize(width, height);
        }
    }

    /// Pause or resume frame driving. Scene state is kept as is.
    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        if visible {
            self.last_frame = None;
            self.perf.resume();
        }
        log::debug!("Render loop {}", if visible { "resumed" } else { "paused" });
        if let Some(scene) = self.scene.as_mut() {
            scene.on_visibility_change(visible);
        }
    }

    /// Stop rendering and forget every cached asset.
    pub fn on_context_lost(&mut self) {
        if self.context_lost {
            return;
        }
        self.context_lost = true;
        log::error!("GPU context lost, rendering suspended");
        self.ctx.assets.invalidate();
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Initializing(pending) => self.rebuild_id = Some(pending.id.clone()),
            Phase::Preparing { .. } => self.progress.set(0.0),
            other => self.phase = other,
        }
        self.notices.push(FolioError::ContextLost);
    }

    /// Rebuild the current scene on the restored context and resume rendering.
    pub fn on_context_restored(&mut self, gpu: Option<Gpu>) {
        if !self.context_lost {
            return;
        }
        self.context_lost = false;
        self.last_frame = None;
        if gpu.is_some() {
            self.ctx.gpu = gpu;
        }
        if matches!(self.phase, Phase::Animating { .. }) {
            self.cancel_transition();
        }
        if let Some(mut stale) = self.scene.take() {
            dispose_scene(stale.as_mut());
        }
        let Some(id) = self.rebuild_id.take().or_else(|| self.current_id.clone()) else {
            return;
        };
        let Some(descriptor) = self.registry.get(&id) else {
            return;
        };
        log::info!("GPU context restored, rebuilding '{id}'");
        let scene = (descriptor.factory)();
        self.phase = Phase::Initializing(PendingInit::start(scene, self.ctx.clone()));
    }

    /// Dispose everything. The manager is unusable afterwards.
    pub fn teardown(&mut self) {
        self.phase = Phase::Idle;
        self.camera.dispose();
        if let Some(mut scene) = self.scene.take() {
            dispose_scene(scene.as_mut());
        }
        self.input.dispose();
        self.ctx.assets.clear_cache();
        self.motion_subscription.take();
        self.ctx.motion.teardown();
        log::info!("Scene manager torn down");
    }

    pub fn set_reduced_motion_override(&mut self, value: Option<bool>) {
        self.ctx.motion.set_override(value);
        if let Some((store, preferences)) = self.preferences.as_mut() {
            preferences.reduced_motion_override = value;
            if let Err(e) = preferences.save(store.as_ref()) {
                log::warn!("Could not save preferences: {e:#}");
            }
        }
    }

    pub fn state(&self) -> SceneState {
        match &self.phase {
            Phase::Idle => SceneState::Idle(self.current_id.clone()),
            Phase::Initializing(pending) => SceneState::Initializing(pending.id.clone()),
            Phase::Preparing { from, pending } => SceneState::Transitioning {
                from: from.clone(),
                to: pending.id.clone(),
                progress: self.progress.get(),
            },
            Phase::Animating { from, to, .. } => SceneState::Transitioning {
                from: from.clone(),
                to: to.clone(),
                progress: self.progress.get(),
            },
        }
    }

    pub fn transition_state(&self) -> SceneTransitionState {
        SceneTransitionState {
            current_scene_id: self.current_id.clone(),
            previous_scene_id: self.previous_id.clone(),
            is_transitioning: self.is_transitioning(),
            transition_progress: self.progress.get(),
        }
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.phase, Phase::Preparing { .. } | Phase::Animating { .. })
    }

    pub fn current_scene_id(&self) -> Option<&SceneId> {
        self.current_id.as_ref()
    }

    pub fn current_scene(&self) -> Option<&dyn Scene> {
        self.scene.as_deref()
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }

    pub fn input(&self) -> &InputHandler {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputHandler {
        &mut self.input
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.perf
    }

    pub fn performance_mut(&mut self) -> &mut PerformanceMonitor {
        &mut self.perf
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Swap in a renderer built on a fresh GPU context. Returns the old one.
    pub fn replace_renderer(&mut self, mut renderer: Box<dyn Renderer>) -> Box<dyn Renderer> {
        renderer.resize(self.size.0, self.size.1);
        std::mem::replace(&mut self.renderer, renderer)
    }

    pub fn context(&self) -> &SceneContext {
        &self.ctx
    }

    pub fn preferences(&self) -> Option<&Preferences> {
        self.preferences.as_ref().map(|(_, preferences)| preferences)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    /// Failures worth telling the user about, oldest first.
    pub fn take_notices(&mut self) -> Vec<FolioError> {
        std::mem::take(&mut self.notices)
    }

    fn poll_init(&mut self) {
        let mut cx = Context::from_waker(noop_waker_ref());
        let ready = match &mut self.phase {
            Phase::Initializing(pending) | Phase::Preparing { pending, .. } => pending.poll(&mut cx),
            _ => return,
        };
        let Poll::Ready(result) = ready else {
            return;
        };
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Initializing(pending) => self.settle_initial(pending, result),
            Phase::Preparing { from, pending } => self.swap_scenes(from, pending, result),
            other => self.phase = other,
        }
    }

    fn settle_initial(&mut self, pending: PendingInit, result: anyhow::Result<()>) {
        let id = pending.id.clone();
        match result {
            Ok(()) => {
                let Some(mut scene) = pending.take_scene() else {
                    log::error!("Scene '{id}' vanished during init");
                    return;
                };
                scene.on_resize(self.size.0, self.size.1);
                scene.mount();
                self.scene = Some(scene);
                self.current_id = Some(id.clone());
                self.remember_visit(&id);
                log::info!("Scene '{id}' ready");
            }
            Err(cause) => {
                drop(pending);
                self.current_id = None;
                self.init_failed(id, cause);
            }
        }
    }

    fn swap_scenes(&mut self, from: Option<SceneId>, pending: PendingInit, result: anyhow::Result<()>) {
        let to = pending.id.clone();
        if let Err(cause) = result {
            drop(pending);
            self.progress.set(0.0);
            self.init_failed(to, cause);
            return;
        }
        let Some(mut incoming) = pending.take_scene() else {
            log::error!("Scene '{to}' vanished during init");
            return;
        };

        let (position, target, budget) = match self.registry.get(&to) {
            Some(descriptor) => (
                descriptor.camera_position,
                descriptor.camera_target,
                budget_for(descriptor),
            ),
            None => (
                self.camera.camera().position,
                self.camera.camera().target,
                SceneBudget::Typical,
            ),
        };
        let progress = self.progress.clone();
        let handle = self.camera.transition_to(
            position,
            target,
            TransitionOptions::default().on_update(move |t| progress.set(progress.get().max(t.clamp(0.0, 1.0)))),
        );

        if let Some(mut outgoing) = self.scene.take() {
            dispose_scene(outgoing.as_mut());
        }
        incoming.on_resize(self.size.0, self.size.1);
        incoming.mount();
        self.scene = Some(incoming);
        self.perf.set_scene_budget(budget);
        self.phase = Phase::Animating { from, to, handle };
    }

    fn poll_camera(&mut self) {
        let Phase::Animating { handle, .. } = &mut self.phase else {
            return;
        };
        let mut cx = Context::from_waker(noop_waker_ref());
        let Poll::Ready(outcome) = Pin::new(handle).poll(&mut cx) else {
            return;
        };
        if let Phase::Animating { from, to, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            if outcome != TweenOutcome::Completed {
                log::debug!("Camera transition to '{to}' ended early: {outcome:?}");
            }
            self.finish_transition(from, to);
        }
    }

    fn finish_transition(&mut self, from: Option<SceneId>, to: SceneId) {
        self.progress.set(1.0);
        self.previous_id = from;
        self.current_id = Some(to.clone());
        self.remember_visit(&to);
        log::info!("Now showing '{to}'");
    }

    fn handle_controls(&mut self) {
        if self.is_transitioning() && self.input.keyboard().is_held(&self.controls.cancel_key) {
            self.cancel_transition();
        }
    }

    fn init_failed(&mut self, scene: SceneId, cause: anyhow::Error) {
        log::error!("Scene '{scene}' failed to initialize: {cause:#}");
        self.notices.push(FolioError::SceneInit { scene, cause });
    }

    fn remember_visit(&mut self, id: &SceneId) {
        let Some((store, preferences)) = self.preferences.as_mut() else {
            return;
        };
        preferences.record_visit(id.as_str(), unix_millis());
        if let Err(e) = preferences.save(store.as_ref()) {
            log::warn!("Could not save preferences: {e:#}");
        }
    }
}

fn budget_for(descriptor: &SceneDescriptor) -> SceneBudget {
    if descriptor.is_landing {
        SceneBudget::Landing
    } else {
        SceneBudget::Typical
    }
}
