use std::cell::RefCell;

use futures::{FutureExt, future::LocalBoxFuture};

use super::{SceneNode, Texture, gltf_loader::load_model_gltf, texture::{load_binary, texture_from_bytes}};
use crate::assets::{AssetSource, ProgressFn};

/// Asset backend that fetches files and uploads them through wgpu.
///
/// Device and queue are swapped via [`rebind`](Self::rebind) when the GPU context is
/// recreated after a loss.
pub struct WgpuAssetSource {
    gpu: RefCell<(wgpu::Device, wgpu::Queue)>,
}

impl WgpuAssetSource {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            gpu: RefCell::new((device, queue)),
        }
    }

    pub fn rebind(&self, device: wgpu::Device, queue: wgpu::Queue) {
        *self.gpu.borrow_mut() = (device, queue);
    }
}

impl AssetSource for WgpuAssetSource {
    fn fetch_model(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<SceneNode>> {
        let (device, queue) = self.gpu.borrow().clone();
        let url = url.to_string();
        async move { load_model_gltf(&url, &device, &queue, &*progress).await }.boxed_local()
    }

    fn fetch_texture(&self, url: &str, progress: ProgressFn) -> LocalBoxFuture<'static, anyhow::Result<Texture>> {
        let (device, queue) = self.gpu.borrow().clone();
        let url = url.to_string();
        async move {
            let bytes = load_binary(&url, &*progress).await?;
            texture_from_bytes(&device, &queue, &bytes, &url, false)
        }
        .boxed_local()
    }
}
