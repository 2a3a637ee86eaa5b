//! The boundary between the orchestration core and the GPU.
//!
//! The scene manager never builds a renderer itself; it is handed something that
//! implements [`Renderer`]. [`crate::context::Context`] is the wgpu implementation,
//! tests use a recording fake.

use std::fmt;

use thiserror::Error;

use crate::{camera::Camera, resources::SceneNode};

/// Counters reported by the renderer for the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderInfo {
    pub draw_calls: u32,
    pub triangles: u64,
    pub geometries: usize,
    pub textures: usize,
    /// Compiled shader programs / pipelines.
    pub programs: usize,
    /// Exact resident texture bytes if the backend knows them.
    pub texture_bytes: Option<u64>,
}

impl fmt::Display for RenderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} draw calls, {} triangles, {} geometries, {} textures, {} programs",
            self.draw_calls, self.triangles, self.geometries, self.textures, self.programs
        )
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("the GPU context was lost")]
    ContextLost,
    /// A frame could not be produced; the next one may succeed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait Renderer {
    /// Draw `root` (nothing if `None`) as seen from `camera`.
    fn render(&mut self, root: Option<&SceneNode>, camera: &Camera) -> Result<(), RenderError>;

    /// Counters of the most recent [`render`](Self::render).
    fn info(&self) -> RenderInfo;

    /// New viewport size in physical pixels.
    fn resize(&mut self, width: u32, height: u32);

    /// Whether the GPU context is currently usable.
    fn is_context_lost(&self) -> bool {
        false
    }
}
