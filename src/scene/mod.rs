//! Scenes and the lifecycle they go through.
//!
//! A [`Scene`] is created lazily from its [`SceneDescriptor`] the first time it is
//! navigated to, initialized asynchronously, mounted, updated once per frame and
//! finally disposed when the user navigates away. A disposed scene is dropped and
//! never reused; coming back creates a fresh one from the factory.
//!
//! The [`SceneManager`] sequences all of this. See [`manager`] for the protocol.

use std::{fmt, time::Duration};

use cgmath::Point3;
use futures::future::LocalBoxFuture;

use crate::{
    assets::AssetLoader,
    camera::Camera,
    clock::Clock,
    input::InputHandler,
    motion::ReducedMotion,
    resources::SceneNode,
};

pub mod manager;
pub mod section;

pub use manager::SceneManager;

/// Key a scene is registered and navigated to under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(String);

impl SceneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SceneId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// GPU device and queue for scenes that build their own geometry.
#[derive(Clone, Debug)]
pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// Everything a scene may use while initializing.
#[derive(Clone)]
pub struct SceneContext {
    pub assets: AssetLoader,
    pub clock: Clock,
    pub motion: ReducedMotion,
    /// `None` when running without a GPU (tests, headless).
    pub gpu: Option<Gpu>,
}

/// Per-frame input for [`Scene::update`].
pub struct FrameContext<'a> {
    pub delta: Duration,
    pub total: Duration,
    /// Withheld while a transition is running.
    pub input: Option<&'a InputHandler>,
    pub camera: &'a Camera,
}

/// A self-contained renderable unit.
pub trait Scene {
    fn id(&self) -> &SceneId;

    fn root(&self) -> &SceneNode;

    fn root_mut(&mut self) -> &mut SceneNode;

    /// Load what the scene needs. May be called more than once and must not load
    /// twice; the asset cache makes repeated loads cheap.
    fn init(&mut self, ctx: SceneContext) -> LocalBoxFuture<'_, anyhow::Result<()>>;

    /// Become part of the rendered graph.
    fn mount(&mut self);

    fn update(&mut self, frame: &FrameContext<'_>);

    /// Release every resource the scene created. The manager additionally runs the
    /// disposer over [`root_mut`](Self::root_mut) afterwards.
    fn dispose(&mut self);

    fn on_resize(&mut self, _width: u32, _height: u32) {}

    fn on_visibility_change(&mut self, _visible: bool) {}
}

pub type SceneFactory = Box<dyn Fn() -> Box<dyn Scene>>;

/// How to build a scene and where the camera goes when it is shown.
pub struct SceneDescriptor {
    pub id: SceneId,
    pub camera_position: Point3<f32>,
    pub camera_target: Point3<f32>,
    /// Landing scenes get the tighter draw-call budget.
    pub is_landing: bool,
    pub factory: SceneFactory,
}

impl SceneDescriptor {
    pub fn new(
        id: impl Into<SceneId>,
        camera_position: Point3<f32>,
        camera_target: Point3<f32>,
        factory: impl Fn() -> Box<dyn Scene> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            camera_position,
            camera_target,
            is_landing: false,
            factory: Box::new(factory),
        }
    }

    pub fn landing(mut self) -> Self {
        self.is_landing = true;
        self
    }
}

/// Answer to [`SceneManager::transition_to`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    Started,
    Rejected(RejectReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Another transition is running; navigation requests are not queued.
    AlreadyTransitioning,
    /// The first scene is still initializing.
    Initializing,
    /// The requested scene is already shown.
    AlreadyActive,
    UnknownScene,
    /// Rendering is suspended until the GPU context comes back.
    ContextLost,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SceneState {
    Idle(Option<SceneId>),
    Initializing(SceneId),
    Transitioning {
        from: Option<SceneId>,
        to: SceneId,
        progress: f32,
    },
}

/// Observable summary of the navigation state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneTransitionState {
    pub current_scene_id: Option<SceneId>,
    pub previous_scene_id: Option<SceneId>,
    pub is_transitioning: bool,
    /// In `[0, 1]`, never decreasing within one transition.
    pub transition_progress: f32,
}
