//! flow-folio
//!
//! Scene lifecycle orchestration for web-first interactive 3D portfolios. A
//! portfolio is a set of navigable sections; this crate owns the single active
//! scene, moves the camera between sections, loads and caches the assets they
//! need and releases every GPU allocation a scene made once it is left. It runs
//! natively and in the browser (WebGL through wgpu).
//!
//! High-level modules
//! - `scene`: the [`Scene`](scene::Scene) trait and the [`SceneManager`] state machine
//! - `assets`: deduplicating, retrying asset cache
//! - `camera`: camera, directed transitions and pointer parallax
//! - `input`: listener registry, pointer/keyboard state and ray picking
//! - `motion`: the reduced-motion preference and its subscribers
//! - `perf`: frame sampling and budget warnings
//! - `resources`: GPU resource kinds, loaders and the disposer
//! - `context` / `render`: the wgpu renderer behind the [`Renderer`](render::Renderer) seam
//! - `flow`: the winit event loop tying it all together
//!

pub mod assets;
pub mod camera;
pub mod clock;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod flow;
pub mod input;
pub mod motion;
pub mod perf;
pub mod pipelines;
pub mod preferences;
pub mod render;
pub mod resources;
pub mod scene;

// Re-exports commonly used types for convenience in downstream code.
pub use assets::AssetLoader;
pub use config::FolioConfig;
pub use content::ContentDocument;
pub use error::FolioError;
pub use flow::{run, run_json};
pub use scene::{SceneId, SceneManager};
pub use winit::event::WindowEvent;
