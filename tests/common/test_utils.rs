#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use cgmath::Point3;
use flow_folio::{
    assets::{AssetLoader, AssetSource, ProgressFn},
    camera::Camera,
    clock::{Clock, ManualTime},
    config::{AssetConfig, FolioConfig},
    motion::{MotionQuery, ReducedMotion},
    preferences::PreferenceStore,
    render::{RenderError, RenderInfo, Renderer},
    resources::{
        BASE_COLOR_MAP, Geometry, GpuHandle, Material, MaterialProperty, Mesh, SceneNode, Texture,
    },
    scene::{FrameContext, Scene, SceneContext, SceneDescriptor, SceneId, SceneManager},
};
use futures::{FutureExt, future::LocalBoxFuture};

/// Labels of released handles, in release order.
pub(crate) type ReleaseLog = Rc<RefCell<Vec<String>>>;

pub(crate) fn release_log() -> ReleaseLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub(crate) struct MockHandle {
    label: String,
    log: ReleaseLog,
    fail: bool,
}

impl MockHandle {
    pub fn new(label: impl Into<String>, log: &ReleaseLog) -> Self {
        Self {
            label: label.into(),
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(label: impl Into<String>, log: &ReleaseLog) -> Self {
        Self {
            fail: true,
            ..Self::new(label, log)
        }
    }
}

impl GpuHandle for MockHandle {
    fn release(&mut self) -> anyhow::Result<()> {
        self.log.borrow_mut().push(self.label.clone());
        if self.fail {
            anyhow::bail!("driver refused to free {}", self.label);
        }
        Ok(())
    }

    fn byte_size(&self) -> u64 {
        1024
    }
}

pub(crate) fn mock_texture(label: &str, log: &ReleaseLog) -> Rc<Texture> {
    Rc::new(Texture::new(label, 16, 16, Box::new(MockHandle::new(label, log))))
}

pub(crate) fn mock_geometry(label: &str, log: &ReleaseLog) -> Geometry {
    Geometry::new(label, 2, vec![Box::new(MockHandle::new(label, log))])
}

/// A node with a mesh whose geometry, material and base colour map all log as `<name>.*`.
pub(crate) fn mock_node(name: &str, log: &ReleaseLog) -> SceneNode {
    let texture = mock_texture(&format!("{name}.tex"), log);
    let material = Material::new(format!("{name}.mat"))
        .with_property(BASE_COLOR_MAP, MaterialProperty::Texture(texture))
        .with_handle(Box::new(MockHandle::new(format!("{name}.mat"), log)));
    SceneNode::new(name).with_mesh(Mesh {
        geometry: mock_geometry(&format!("{name}.geom"), log),
        material: Rc::new(material),
    })
}

pub(crate) fn released(log: &ReleaseLog) -> Vec<String> {
    log.borrow().clone()
}

pub(crate) fn manual_clock() -> (Rc<ManualTime>, Clock) {
    let time = Rc::new(ManualTime::new());
    let clock = Clock::manual(time.clone());
    (time, clock)
}

/// Platform reduced-motion preference the test can flip.
#[derive(Clone, Default)]
pub(crate) struct TestMotionQuery {
    pub matches: Rc<Cell<bool>>,
    pub attaches: Rc<Cell<u32>>,
    pub detaches: Rc<Cell<u32>>,
    on_change: Rc<RefCell<Option<Box<dyn Fn(bool)>>>>,
}

impl TestMotionQuery {
    /// Simulate the user changing the OS setting.
    pub fn change(&self, matches: bool) {
        self.matches.set(matches);
        if let Some(on_change) = self.on_change.borrow().as_ref() {
            on_change(matches);
        }
    }
}

impl MotionQuery for TestMotionQuery {
    fn matches(&self) -> bool {
        self.matches.get()
    }

    fn attach(&self, on_change: Box<dyn Fn(bool)>) {
        self.attaches.set(self.attaches.get() + 1);
        *self.on_change.borrow_mut() = Some(on_change);
    }

    fn detach(&self) {
        self.detaches.set(self.detaches.get() + 1);
        self.on_change.borrow_mut().take();
    }
}

pub(crate) fn full_motion() -> ReducedMotion {
    ReducedMotion::new(Box::new(TestMotionQuery::default()))
}

/// Asset source serving mock models and textures after `latency`.
pub(crate) struct FakeSource {
    clock: Clock,
    latency: Duration,
    log: ReleaseLog,
    /// Remaining failures per URL.
    failures: RefCell<HashMap<String, u32>>,
    attempts: RefCell<Vec<(String, Duration)>>,
}

impl FakeSource {
    pub fn new(clock: &Clock, log: &ReleaseLog) -> Self {
        Self {
            clock: clock.clone(),
            latency: Duration::ZERO,
            log: log.clone(),
            failures: RefCell::new(HashMap::new()),
            attempts: RefCell::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_times(&self, url: &str, times: u32) {
        self.failures.borrow_mut().insert(url.to_string(), times);
    }

    pub fn fail_always(&self, url: &str) {
        self.fail_times(url, u32::MAX);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.attempts.borrow().iter().filter(|(u, _)| u == url).count()
    }

    /// Clock readings at which `url` was requested.
    pub fn attempt_times(&self, url: &str) -> Vec<Duration> {
        self.attempts
            .borrow()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }

    fn begin(&self, url: &str) -> anyhow::Result<()> {
        self.attempts.borrow_mut().push((url.to_string(), self.clock.now()));
        let mut failures = self.failures.borrow_mut();
        match failures.get_mut(url) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                Err(anyhow::anyhow!("404 for {url}"))
            }
            _ => Ok(()),
        }
    }
}

impl AssetSource for FakeSource {
    fn fetch_model(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<SceneNode>> {
        let outcome = self.begin(url).map(|()| mock_node(url, &self.log));
        let sleep = self.clock.sleep(self.latency);
        async move {
            sleep.await;
            let node = outcome?;
            progress(1, Some(1));
            Ok(node)
        }
        .boxed_local()
    }

    fn fetch_texture(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Texture>> {
        let outcome = self
            .begin(url)
            .map(|()| Texture::new(url, 16, 16, Box::new(MockHandle::new(url, &self.log))));
        let sleep = self.clock.sleep(self.latency);
        async move {
            sleep.await;
            let texture = outcome?;
            progress(1, Some(1));
            Ok(texture)
        }
        .boxed_local()
    }
}

pub(crate) fn loader(source: &Rc<FakeSource>, clock: &Clock, max_retries: u32) -> AssetLoader {
    AssetLoader::new(
        source.clone(),
        clock.clone(),
        AssetConfig {
            max_retries,
            backoff_base_ms: 1000,
        },
    )
}

/// Lifecycle counters shared between a test and every scene built for one id.
#[derive(Default)]
pub(crate) struct SceneProbe {
    inits: Cell<u32>,
    mounts: Cell<u32>,
    updates: Cell<u32>,
    updates_with_input: Cell<u32>,
    disposes: Cell<u32>,
    resizes: RefCell<Vec<(u32, u32)>>,
}

impl SceneProbe {
    pub fn init_invocations(&self) -> u32 {
        self.inits.get()
    }

    pub fn mount_invocations(&self) -> u32 {
        self.mounts.get()
    }

    pub fn update_invocations(&self) -> u32 {
        self.updates.get()
    }

    pub fn updates_with_input(&self) -> u32 {
        self.updates_with_input.get()
    }

    pub fn dispose_invocations(&self) -> u32 {
        self.disposes.get()
    }

    pub fn last_resize(&self) -> Option<(u32, u32)> {
        self.resizes.borrow().last().copied()
    }
}

pub(crate) struct MockScene {
    id: SceneId,
    root: SceneNode,
    probe: Rc<SceneProbe>,
    log: ReleaseLog,
    init_delay: Duration,
    fail: bool,
}

impl Scene for MockScene {
    fn id(&self) -> &SceneId {
        &self.id
    }

    fn root(&self) -> &SceneNode {
        &self.root
    }

    fn root_mut(&mut self) -> &mut SceneNode {
        &mut self.root
    }

    fn init(&mut self, ctx: SceneContext) -> LocalBoxFuture<'_, anyhow::Result<()>> {
        async move {
            self.probe.inits.set(self.probe.inits.get() + 1);
            if !self.init_delay.is_zero() {
                ctx.clock.sleep(self.init_delay).await;
            }
            if self.fail {
                anyhow::bail!("{} refused to initialize", self.id);
            }
            let body = mock_node(&format!("{}.body", self.id), &self.log);
            self.root.add_child(body);
            Ok(())
        }
        .boxed_local()
    }

    fn mount(&mut self) {
        self.probe.mounts.set(self.probe.mounts.get() + 1);
    }

    fn update(&mut self, frame: &FrameContext<'_>) {
        self.probe.updates.set(self.probe.updates.get() + 1);
        if frame.input.is_some() {
            self.probe.updates_with_input.set(self.probe.updates_with_input.get() + 1);
        }
    }

    fn dispose(&mut self) {
        self.probe.disposes.set(self.probe.disposes.get() + 1);
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.probe.resizes.borrow_mut().push((width, height));
    }
}

/// Builder for a [`MockScene`] descriptor.
pub(crate) struct MockSceneSpec {
    pub id: &'static str,
    pub position: Point3<f32>,
    pub init_delay: Duration,
    pub fail: bool,
    pub landing: bool,
}

impl MockSceneSpec {
    pub fn new(id: &'static str, x: f32) -> Self {
        Self {
            id,
            position: Point3::new(x, 0.0, 10.0),
            init_delay: Duration::ZERO,
            fail: false,
            landing: false,
        }
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn landing(mut self) -> Self {
        self.landing = true;
        self
    }

    pub fn descriptor(&self, probe: &Rc<SceneProbe>, log: &ReleaseLog) -> SceneDescriptor {
        let (id, delay, fail) = (self.id, self.init_delay, self.fail);
        let probe = probe.clone();
        let log = log.clone();
        let target = Point3::new(self.position.x, 0.0, 0.0);
        let descriptor = SceneDescriptor::new(id, self.position, target, move || {
            Box::new(MockScene {
                id: SceneId::new(id),
                root: SceneNode::new(format!("{id}.root")),
                probe: probe.clone(),
                log: log.clone(),
                init_delay: delay,
                fail,
            })
        });
        if self.landing { descriptor.landing() } else { descriptor }
    }
}

/// Observable state of a [`FakeRenderer`].
#[derive(Default)]
pub(crate) struct RenderProbe {
    pub frames: Cell<u32>,
    pub lost: Cell<bool>,
    pub sizes: RefCell<Vec<(u32, u32)>>,
    pub last_root: RefCell<Option<String>>,
    pub draw_calls: Cell<u32>,
}

pub(crate) struct FakeRenderer {
    probe: Rc<RenderProbe>,
}

impl FakeRenderer {
    pub fn new(probe: &Rc<RenderProbe>) -> Self {
        Self { probe: probe.clone() }
    }
}

impl Renderer for FakeRenderer {
    fn render(&mut self, root: Option<&SceneNode>, _camera: &Camera) -> Result<(), RenderError> {
        if self.probe.lost.get() {
            return Err(RenderError::ContextLost);
        }
        self.probe.frames.set(self.probe.frames.get() + 1);
        *self.probe.last_root.borrow_mut() = root.map(|root| root.name.clone());
        Ok(())
    }

    fn info(&self) -> RenderInfo {
        RenderInfo {
            draw_calls: self.probe.draw_calls.get(),
            programs: 1,
            ..RenderInfo::default()
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.probe.sizes.borrow_mut().push((width, height));
    }

    fn is_context_lost(&self) -> bool {
        self.probe.lost.get()
    }
}

/// A manager wired to fakes, driven by a manual clock.
pub(crate) struct Harness {
    pub time: Rc<ManualTime>,
    pub clock: Clock,
    pub log: ReleaseLog,
    pub source: Rc<FakeSource>,
    pub renderer: Rc<RenderProbe>,
    pub motion: TestMotionQuery,
    pub manager: SceneManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FolioConfig::default())
    }

    pub fn with_config(config: FolioConfig) -> Self {
        Self::build(config, None)
    }

    /// A harness whose manager persists preferences in `store`.
    pub fn with_store(store: Box<dyn PreferenceStore>) -> Self {
        Self::build(FolioConfig::default(), Some(store))
    }

    fn build(config: FolioConfig, store: Option<Box<dyn PreferenceStore>>) -> Self {
        let (time, clock) = manual_clock();
        let log = release_log();
        let source = Rc::new(FakeSource::new(&clock, &log));
        let motion = TestMotionQuery::default();
        let ctx = SceneContext {
            assets: loader(&source, &clock, config.assets.max_retries),
            clock: clock.clone(),
            motion: ReducedMotion::new(Box::new(motion.clone())),
            gpu: None,
        };
        let renderer = Rc::new(RenderProbe::default());
        let mut manager = SceneManager::new(&config, ctx, Box::new(FakeRenderer::new(&renderer)), 1280, 720);
        if let Some(store) = store {
            manager = manager.with_preferences(store);
        }
        Self {
            time,
            clock,
            log,
            source,
            renderer,
            motion,
            manager,
        }
    }

    pub fn register(&mut self, spec: MockSceneSpec) -> Rc<SceneProbe> {
        let probe = Rc::new(SceneProbe::default());
        self.manager.register(spec.descriptor(&probe, &self.log));
        probe
    }

    /// Advance the clock by `step` and run one frame.
    pub fn step(&mut self, step: Duration) {
        self.time.advance(step);
        self.manager.frame();
    }

    /// Step 16ms frames until the manager is idle again, at most `max_frames`.
    pub fn settle(&mut self, max_frames: u32) -> u32 {
        for frame in 1..=max_frames {
            self.step(Duration::from_millis(16));
            if !self.manager.is_transitioning()
                && matches!(self.manager.state(), flow_folio::scene::SceneState::Idle(_))
            {
                return frame;
            }
        }
        max_frames
    }
}
