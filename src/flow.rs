//! Application event loop.
//!
//! Glues winit to the [`SceneManager`]: the window and GPU context are created on
//! `resumed`, every `RedrawRequested` runs one manager frame, and raw window events
//! are translated into [`InputEvent`]s. Natively the GPU setup is awaited on a tokio
//! runtime; on the web it runs in `spawn_local` and reports back through a user event.
//!
//! A lost GPU device is detected on the frame that fails to render. The context is
//! then rebuilt the same way it was created and handed back to the manager.

use std::{rc::Rc, sync::Arc};

use instant::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    window::Window,
};

use crate::{
    assets::AssetLoader,
    clock::Clock,
    config::FolioConfig,
    content::ContentDocument,
    context::Context,
    error::FolioError,
    input::InputEvent,
    motion::ReducedMotion,
    preferences::platform_store,
    resources::source::WgpuAssetSource,
    scene::{SceneContext, SceneManager, section},
};

/// How often the performance overlay refreshes the window title.
const OVERLAY_REFRESH: Duration = Duration::from_millis(500);

#[cfg(target_arch = "wasm32")]
const CANVAS_ID: &str = "canvas";

pub(crate) enum FolioEvent {
    /// The first GPU context is ready.
    Initialized(Box<Context>),
    /// A replacement context after a device loss.
    Restored(Box<Context>),
    /// The platform cannot render at all.
    Unsupported(String),
}

struct AppState {
    window: Arc<Window>,
    manager: SceneManager,
    source: Rc<WgpuAssetSource>,
    restoring: bool,
    overlay: bool,
    overlay_refreshed: Duration,
}

pub(crate) struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<FolioEvent>,
    config: FolioConfig,
    content: ContentDocument,
    window: Option<Arc<Window>>,
    state: Option<AppState>,
}

impl App {
    fn new(event_loop: &EventLoop<FolioEvent>, content: ContentDocument, config: FolioConfig) -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime: tokio::runtime::Runtime::new()?,
            proxy: event_loop.create_proxy(),
            config,
            content,
            window: None,
            state: None,
        })
    }

    /// Build a GPU context for `window` and deliver it as `wrap(context)`.
    fn spawn_context(&self, window: Arc<Window>, wrap: fn(Box<Context>) -> FolioEvent) {
        let proxy = self.proxy.clone();
        let fut = async move {
            match Context::new(window).await {
                Ok(ctx) => wrap(Box::new(ctx)),
                Err(e) => FolioEvent::Unsupported(format!("{e:#}")),
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            let event = self.async_runtime.block_on(fut);
            if proxy.send_event(event).is_err() {
                log::error!("Event loop closed before the GPU context was ready");
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            wasm_bindgen_futures::spawn_local(async move {
                if proxy.send_event(fut.await).is_err() {
                    log::error!("Event loop closed before the GPU context was ready");
                }
            });
        }
    }

    fn initialize(&mut self, ctx: Context) -> anyhow::Result<()> {
        let window = ctx.window().clone();
        let size = window.inner_size();
        let gpu = ctx.gpu();
        let clock = Clock::system();
        let motion = ReducedMotion::platform();
        let source = Rc::new(WgpuAssetSource::new(gpu.device.clone(), gpu.queue.clone()));
        let assets = AssetLoader::new(source.clone(), clock.clone(), self.config.assets.clone());
        assets.on_progress(|url, loaded, total| match total {
            Some(total) => log::debug!("{url}: {loaded}/{total} bytes"),
            None => log::debug!("{url}: {loaded} bytes"),
        });
        assets.on_error(|failure| log::error!("{failure}"));
        assets.on_load_complete(|| log::info!("All pending assets loaded"));

        let scene_ctx = SceneContext {
            assets,
            clock,
            motion,
            gpu: Some(gpu),
        };
        let mut manager = SceneManager::new(
            &self.config,
            scene_ctx,
            Box::new(ctx),
            size.width.max(1),
            size.height.max(1),
        )
        .with_preferences(platform_store());
        for descriptor in section::descriptors(&self.content) {
            manager.register(descriptor);
        }
        let landing = self
            .content
            .landing()
            .ok_or_else(|| anyhow::anyhow!("content has no sections"))?;
        manager.start(landing.id.as_str())?;

        window.request_redraw();
        self.state = Some(AppState {
            window,
            manager,
            source,
            restoring: false,
            overlay: false,
            overlay_refreshed: Duration::ZERO,
        });
        Ok(())
    }

    fn redraw(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        {
            // Asset futures may need the runtime's reactor while they are polled.
            #[cfg(not(target_arch = "wasm32"))]
            let _guard = self.async_runtime.enter();
            state.manager.frame();
        }
        for notice in state.manager.take_notices() {
            match notice {
                FolioError::ContextLost => log::error!("{notice}, rebuilding"),
                other => log::warn!("{other}"),
            }
        }

        if state.overlay {
            let now = state.manager.context().clock.now();
            if now.saturating_sub(state.overlay_refreshed) >= OVERLAY_REFRESH {
                state.overlay_refreshed = now;
                state.window.set_title(&state.manager.performance().to_string());
            }
        }

        if state.manager.is_context_lost() && !state.restoring {
            state.restoring = true;
            let window = state.window.clone();
            self.spawn_context(window, FolioEvent::Restored);
            return;
        }
        state.window.request_redraw();
    }

    fn restore(&mut self, ctx: Context) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let gpu = ctx.gpu();
        state.source.rebind(gpu.device.clone(), gpu.queue.clone());
        let _stale = state.manager.replace_renderer(Box::new(ctx));
        state.manager.on_context_restored(Some(gpu));
        state.restoring = false;
        state.window.request_redraw();
    }
}

impl ApplicationHandler<FolioEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("flow-folio");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            let canvas = web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id(CANVAS_ID))
                .and_then(|element| element.dyn_into::<web_sys::HtmlCanvasElement>().ok());
            match canvas {
                Some(canvas) => window_attributes = window_attributes.with_canvas(Some(canvas)),
                None => log::warn!("No <canvas id=\"{CANVAS_ID}\">, winit will create one"),
            }
            window_attributes = window_attributes.with_prevent_default(true);
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Unable to create a window: {e}");
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());
        self.spawn_context(window, FolioEvent::Initialized);
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: FolioEvent) {
        match event {
            FolioEvent::Initialized(ctx) => {
                if let Err(e) = self.initialize(*ctx) {
                    log::error!("Unable to start: {e:#}");
                    event_loop.exit();
                }
            }
            FolioEvent::Restored(ctx) => self.restore(*ctx),
            FolioEvent::Unsupported(reason) => {
                let error = FolioError::UnsupportedEnvironment(reason);
                log::error!("{error}");
                show_static_fallback(&fallback_message(&error));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: winit::window::WindowId, event: WindowEvent) {
        if let WindowEvent::RedrawRequested = event {
            self.redraw();
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match &event {
            WindowEvent::CloseRequested => {
                state.manager.teardown();
                event_loop.exit();
                return;
            }
            WindowEvent::Resized(size) => state.manager.resize(size.width, size.height),
            WindowEvent::Occluded(occluded) => {
                state.manager.set_visible(!occluded);
                if !occluded {
                    state.window.request_redraw();
                }
            }
            _ => (),
        }

        if let Some(input) = InputEvent::from_window_event(&event) {
            if let InputEvent::KeyPressed(key) = &input
                && *key == self.config.controls.overlay_key
            {
                state.overlay = !state.overlay;
                if !state.overlay {
                    state.window.set_title("flow-folio");
                }
                log::info!("{}", state.manager.performance());
            }
            state.manager.handle_input(&input);
        }
    }
}

fn fallback_message(error: &FolioError) -> String {
    format!("This portfolio needs WebGL2 or WebGPU, which is not available here ({error}).")
}

/// Swap the canvas for a plain text notice so the page is not left blank.
#[cfg(target_arch = "wasm32")]
fn show_static_fallback(message: &str) {
    let Some(document) = web_sys::window().and_then(|window| window.document()) else {
        return;
    };
    let notice = match document.create_element("p") {
        Ok(notice) => notice,
        Err(e) => {
            log::error!("Unable to create the fallback notice: {e:?}");
            return;
        }
    };
    notice.set_id("flow-folio-fallback");
    notice.set_text_content(Some(message));

    let canvas = document.get_element_by_id(CANVAS_ID);
    let placed = match canvas.as_ref().and_then(|canvas| canvas.parent_node().map(|parent| (canvas, parent))) {
        Some((canvas, parent)) => parent.replace_child(&notice, canvas).is_ok(),
        None => document
            .document_element()
            .is_some_and(|root| root.append_child(&notice).is_ok()),
    };
    if !placed {
        log::error!("Unable to show the fallback notice");
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn show_static_fallback(message: &str) {
    eprintln!("{message}");
}

/// Open a window and show `content` until it is closed.
pub fn run(content: ContentDocument, config: FolioConfig) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).map_err(|e| anyhow::anyhow!("logger: {e}"))?;
    }

    content.validate()?;
    config.validate()?;
    let event_loop: EventLoop<FolioEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, content, config)?;
    event_loop.run_app(&mut app)?;

    Ok(())
}

/// [`run`] with the content and an optional config given as JSON.
pub fn run_json(content_json: &str, config_json: Option<&str>) -> anyhow::Result<()> {
    let content = ContentDocument::from_json(content_json)?;
    let config = match config_json {
        Some(json) => FolioConfig::from_json(json)?,
        None => FolioConfig::default(),
    };
    run(content, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_message_names_the_missing_capability() {
        let message = fallback_message(&FolioError::UnsupportedEnvironment("no adapter".into()));
        assert!(message.contains("WebGL2"));
        assert!(message.contains("no adapter"));
    }
}
