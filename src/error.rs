//! Error taxonomy.
//!
//! Causes travel as [`anyhow::Error`]; the variants here only classify them so that
//! callers and the UI glue can decide how loud to be. Rejected navigations are not
//! errors at all, see [`crate::scene::Navigation`].

use std::sync::Arc;

use thiserror::Error;

use crate::scene::SceneId;

/// A failed asset fetch after all retries were used up.
///
/// Cheap to clone so that every caller coalesced onto the same in-flight request
/// receives the same failure.
#[derive(Clone, Debug, Error)]
#[error("failed to load {url} after {attempts} attempt(s): {cause:#}")]
pub struct AssetLoadFailure {
    pub url: String,
    pub attempts: u32,
    cause: Arc<anyhow::Error>,
}

impl AssetLoadFailure {
    pub fn new(url: impl Into<String>, attempts: u32, cause: anyhow::Error) -> Self {
        Self {
            url: url.into(),
            attempts,
            cause: Arc::new(cause),
        }
    }

    /// The last error reported by the asset source.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

#[derive(Debug, Error)]
pub enum FolioError {
    #[error(transparent)]
    AssetLoad(#[from] AssetLoadFailure),

    #[error("scene '{scene}' failed to initialize: {cause:#}")]
    SceneInit {
        scene: SceneId,
        cause: anyhow::Error,
    },

    #[error("the GPU context was lost")]
    ContextLost,

    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),
}
