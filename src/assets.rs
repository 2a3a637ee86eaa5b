//! Cached, retrying asset loading.
//!
//! One [`AssetLoader`] is created by the application and cloned into every scene
//! context. It hands out `Rc`-shared [`Model`]s and [`Texture`]s keyed by URL:
//!
//! - a cache hit resolves immediately
//! - concurrent requests for the same URL share a single underlying fetch
//! - failed fetches are retried with exponential backoff on the session [`Clock`]
//! - cached entries live until [`AssetLoader::clear_cache`]
//!
//! The actual I/O is done by an [`AssetSource`]; the wgpu backend lives in
//! [`crate::resources::source`], tests plug in fakes.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

use futures::{
    FutureExt,
    future::{self, LocalBoxFuture, Shared, WeakShared},
};

use crate::{
    clock::Clock,
    config::AssetConfig,
    error::AssetLoadFailure,
    resources::{Model, SceneNode, Texture, dispose::ResourceDisposer},
};

/// Byte-level progress: `(loaded, total)` with `total` unknown for streamed bodies.
pub type ProgressFn = Rc<dyn Fn(u64, Option<u64>)>;

/// Where assets come from.
///
/// Each call is one attempt; retrying and caching are the loader's business.
pub trait AssetSource {
    fn fetch_model(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<SceneNode>>;
    fn fetch_texture(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Texture>>;
}

/// How [`AssetLoader::preload_assets_with`] reacts to failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PreloadPolicy {
    /// Fail with the first asset that exhausts its retries, abandoning the rest.
    #[default]
    FailFast,
    /// Wait for every asset and report failures in the result.
    CollectAll,
}

/// Outcome of a preload.
#[derive(Default)]
pub struct PreloadReport {
    pub models: Vec<Rc<Model>>,
    pub textures: Vec<Rc<Texture>>,
    /// Only populated under [`PreloadPolicy::CollectAll`].
    pub failures: Vec<AssetLoadFailure>,
}

impl PreloadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Snapshot of the loader's bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cached_models: usize,
    pub cached_textures: usize,
    pub in_flight: usize,
}

pub type LoadResult<T> = Result<Rc<T>, AssetLoadFailure>;
pub type LoadFuture<T> = LocalBoxFuture<'static, LoadResult<T>>;

struct AssetCache<T> {
    entries: HashMap<String, Rc<T>>,
    in_flight: HashMap<String, (u64, WeakShared<LoadFuture<T>>)>,
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Callbacks {
    on_progress: Option<Rc<dyn Fn(&str, u64, Option<u64>)>>,
    on_error: Option<Rc<dyn Fn(&AssetLoadFailure)>>,
    on_complete: Option<Rc<dyn Fn()>>,
}

struct Inner {
    source: Rc<dyn AssetSource>,
    clock: Clock,
    config: AssetConfig,
    models: RefCell<AssetCache<Model>>,
    textures: RefCell<AssetCache<Texture>>,
    callbacks: RefCell<Callbacks>,
    pending: Cell<usize>,
    generation: Cell<u64>,
}

/// The two kinds of cached asset.
trait CachedAsset: Sized + 'static {
    const KIND: &'static str;

    fn cache(inner: &Inner) -> &RefCell<AssetCache<Self>>;

    fn fetch(source: &dyn AssetSource, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Self>>;

    fn dispose(asset: &Rc<Self>);
}

impl CachedAsset for Model {
    const KIND: &'static str = "model";

    fn cache(inner: &Inner) -> &RefCell<AssetCache<Self>> {
        &inner.models
    }

    fn fetch(source: &dyn AssetSource, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Self>> {
        let url_owned = url.to_string();
        source
            .fetch_model(url, progress)
            .map(move |root| root.map(|root| Model::new(url_owned, root)))
            .boxed_local()
    }

    fn dispose(asset: &Rc<Self>) {
        ResourceDisposer::dispose_model(asset);
    }
}

impl CachedAsset for Texture {
    const KIND: &'static str = "texture";

    fn cache(inner: &Inner) -> &RefCell<AssetCache<Self>> {
        &inner.textures
    }

    fn fetch(source: &dyn AssetSource, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Self>> {
        source.fetch_texture(url, progress)
    }

    fn dispose(asset: &Rc<Self>) {
        ResourceDisposer::dispose(&mut asset.clone());
    }
}

/// Tracks one underlying fetch. Dropped when the fetch settles or is abandoned by
/// every caller, whichever comes first.
struct PendingGuard<T: CachedAsset> {
    inner: Weak<Inner>,
    url: String,
    generation: u64,
    _kind: std::marker::PhantomData<T>,
}

impl<T: CachedAsset> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        {
            let mut cache = T::cache(&inner).borrow_mut();
            if cache
                .in_flight
                .get(&self.url)
                .is_some_and(|(generation, _)| *generation == self.generation)
            {
                cache.in_flight.remove(&self.url);
            }
        }
        let pending = inner.pending.get().saturating_sub(1);
        inner.pending.set(pending);
        if pending == 0 {
            log::debug!("All asset requests settled");
            let on_complete = inner.callbacks.borrow().on_complete.clone();
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        }
    }
}

/// Shared handle to the session's asset cache.
#[derive(Clone)]
pub struct AssetLoader {
    inner: Rc<Inner>,
}

impl AssetLoader {
    pub fn new(source: Rc<dyn AssetSource>, clock: Clock, config: AssetConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                source,
                clock,
                config,
                models: RefCell::new(AssetCache::default()),
                textures: RefCell::new(AssetCache::default()),
                callbacks: RefCell::new(Callbacks::default()),
                pending: Cell::new(0),
                generation: Cell::new(0),
            }),
        }
    }

    /// Called with `(url, loaded, total)` whenever a source reports progress.
    pub fn on_progress(&self, callback: impl Fn(&str, u64, Option<u64>) + 'static) {
        self.inner.callbacks.borrow_mut().on_progress = Some(Rc::new(callback));
    }

    /// Called once per request that exhausted its retries.
    pub fn on_error(&self, callback: impl Fn(&AssetLoadFailure) + 'static) {
        self.inner.callbacks.borrow_mut().on_error = Some(Rc::new(callback));
    }

    /// Called every time the last outstanding request settles.
    pub fn on_load_complete(&self, callback: impl Fn() + 'static) {
        self.inner.callbacks.borrow_mut().on_complete = Some(Rc::new(callback));
    }

    pub fn load_model(&self, url: &str) -> LoadFuture<Model> {
        self.load::<Model>(url, self.inner.config.max_retries)
    }

    /// Like [`load_model`](Self::load_model) with an explicit attempt limit.
    pub fn load_model_with_retries(&self, url: &str, max_retries: u32) -> LoadFuture<Model> {
        self.load::<Model>(url, max_retries)
    }

    pub fn load_texture(&self, url: &str) -> LoadFuture<Texture> {
        self.load::<Texture>(url, self.inner.config.max_retries)
    }

    pub fn load_texture_with_retries(&self, url: &str, max_retries: u32) -> LoadFuture<Texture> {
        self.load::<Texture>(url, max_retries)
    }

    /// Load every model and texture concurrently, failing on the first failure.
    pub fn preload_assets<S: AsRef<str>>(
        &self,
        models: &[S],
        textures: &[S],
    ) -> LocalBoxFuture<'static, Result<PreloadReport, AssetLoadFailure>> {
        self.preload_assets_with(models, textures, PreloadPolicy::FailFast)
    }

    pub fn preload_assets_with<S: AsRef<str>>(
        &self,
        models: &[S],
        textures: &[S],
        policy: PreloadPolicy,
    ) -> LocalBoxFuture<'static, Result<PreloadReport, AssetLoadFailure>> {
        let models: Vec<_> = models.iter().map(|url| self.load_model(url.as_ref())).collect();
        let textures: Vec<_> = textures.iter().map(|url| self.load_texture(url.as_ref())).collect();
        async move {
            match policy {
                PreloadPolicy::FailFast => {
                    let (models, textures) =
                        future::try_join(future::try_join_all(models), future::try_join_all(textures)).await?;
                    Ok(PreloadReport {
                        models,
                        textures,
                        failures: Vec::new(),
                    })
                }
                PreloadPolicy::CollectAll => {
                    let (models, textures) = future::join(future::join_all(models), future::join_all(textures)).await;
                    let mut report = PreloadReport::default();
                    for result in models {
                        match result {
                            Ok(model) => report.models.push(model),
                            Err(failure) => report.failures.push(failure),
                        }
                    }
                    for result in textures {
                        match result {
                            Ok(texture) => report.textures.push(texture),
                            Err(failure) => report.failures.push(failure),
                        }
                    }
                    if !report.is_complete() {
                        log::warn!("Preload finished with {} failed asset(s)", report.failures.len());
                    }
                    Ok(report)
                }
            }
        }
        .boxed_local()
    }

    /// Dispose every cached model and texture and empty the cache.
    ///
    /// Requests still in flight are unaffected and will populate the cache when they
    /// settle.
    pub fn clear_cache(&self) {
        let models: Vec<Rc<Model>> = self.inner.models.borrow_mut().entries.drain().map(|(_, m)| m).collect();
        let textures: Vec<Rc<Texture>> = self.inner.textures.borrow_mut().entries.drain().map(|(_, t)| t).collect();
        log::info!("Clearing asset cache ({} models, {} textures)", models.len(), textures.len());
        models.iter().for_each(Model::dispose);
        textures.iter().for_each(Texture::dispose);
    }

    /// Forget every cached asset without touching the GPU.
    ///
    /// Used when the GPU context is gone and the handles are already invalid.
    /// Fetches in flight at this point still resolve for their callers but are
    /// not cached.
    pub fn invalidate(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
        *self.inner.models.borrow_mut() = AssetCache::default();
        *self.inner.textures.borrow_mut() = AssetCache::default();
        log::warn!("Asset cache invalidated");
    }

    pub fn cached_model(&self, url: &str) -> Option<Rc<Model>> {
        self.inner.models.borrow().entries.get(url).cloned()
    }

    pub fn cached_texture(&self, url: &str) -> Option<Rc<Texture>> {
        self.inner.textures.borrow().entries.get(url).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let models = self.inner.models.borrow();
        let textures = self.inner.textures.borrow();
        CacheStats {
            cached_models: models.entries.len(),
            cached_textures: textures.entries.len(),
            in_flight: models.in_flight.len() + textures.in_flight.len(),
        }
    }

    /// Number of underlying fetches that have not settled yet.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.get()
    }

    fn load<T: CachedAsset>(&self, url: &str, max_retries: u32) -> LoadFuture<T> {
        let generation = self.inner.generation.get();
        {
            let cache = T::cache(&self.inner).borrow();
            if let Some(asset) = cache.entries.get(url) {
                log::trace!("Cache hit for {} '{url}'", T::KIND);
                return future::ready(Ok(asset.clone())).boxed_local();
            }
            if let Some(shared) = cache
                .in_flight
                .get(url)
                .and_then(|(_, weak)| weak.upgrade())
            {
                log::trace!("Joining in-flight request for {} '{url}'", T::KIND);
                return shared.boxed_local();
            }
        }

        self.inner.pending.set(self.inner.pending.get() + 1);
        let guard = PendingGuard::<T> {
            inner: Rc::downgrade(&self.inner),
            url: url.to_string(),
            generation,
            _kind: std::marker::PhantomData,
        };
        let fetch: LoadFuture<T> = Self::fetch_with_retries::<T>(
            Rc::downgrade(&self.inner),
            self.inner.source.clone(),
            self.inner.clock.clone(),
            self.inner.config.backoff_base(),
            url.to_string(),
            max_retries.max(1),
            generation,
            guard,
        )
        .boxed_local();
        let shared: Shared<LoadFuture<T>> = fetch.shared();
        if let Some(weak) = shared.downgrade() {
            T::cache(&self.inner)
                .borrow_mut()
                .in_flight
                .insert(url.to_string(), (generation, weak));
        }
        shared.boxed_local()
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_with_retries<T: CachedAsset>(
        inner: Weak<Inner>,
        source: Rc<dyn AssetSource>,
        clock: Clock,
        backoff_base: std::time::Duration,
        url: String,
        max_attempts: u32,
        generation: u64,
        guard: PendingGuard<T>,
    ) -> LoadResult<T> {
        let progress: ProgressFn = {
            let inner = inner.clone();
            let url = url.clone();
            Rc::new(move |loaded, total| {
                let Some(inner) = inner.upgrade() else { return };
                let on_progress = inner.callbacks.borrow().on_progress.clone();
                if let Some(on_progress) = on_progress {
                    on_progress(&url, loaded, total);
                }
            })
        };

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            log::debug!("Loading {} '{url}' (attempt {attempt}/{max_attempts})", T::KIND);
            match T::fetch(&*source, &url, progress.clone()).await {
                Ok(asset) => break Ok(Rc::new(asset)),
                Err(e) if attempt < max_attempts => {
                    let delay = backoff_base * 2u32.saturating_pow(attempt - 1);
                    log::warn!("Loading {} '{url}' failed, retrying in {delay:?}: {e:#}", T::KIND);
                    clock.sleep(delay).await;
                }
                Err(e) => break Err(AssetLoadFailure::new(url.clone(), attempt, e)),
            }
        };

        if let Some(inner) = inner.upgrade() {
            match &result {
                Ok(asset) if inner.generation.get() == generation => {
                    T::cache(&inner).borrow_mut().entries.insert(url.clone(), asset.clone());
                }
                Ok(_) => log::debug!("Discarding stale {} '{url}'", T::KIND),
                Err(failure) => {
                    log::error!("{failure}");
                    let on_error = inner.callbacks.borrow().on_error.clone();
                    if let Some(on_error) = on_error {
                        on_error(failure);
                    }
                }
            }
        }
        drop(guard);
        result
    }
}
