//! Fetching raw asset bytes and turning images into GPU textures.

use anyhow::Context as _;
use image::{GenericImageView, ImageFormat, load_from_memory_with_format};

use super::{GpuHandle, Texture};

impl GpuHandle for wgpu::Texture {
    fn release(&mut self) -> anyhow::Result<()> {
        self.destroy();
        Ok(())
    }

    fn byte_size(&self) -> u64 {
        let size = self.size();
        let texel = self.format().block_copy_size(None).unwrap_or(4);
        u64::from(size.width)
            * u64::from(size.height)
            * u64::from(size.depth_or_array_layers)
            * u64::from(texel)
    }
}

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    if let Ok(url) = reqwest::Url::parse(file_name) {
        return Ok(url);
    }
    let window = web_sys::window().context("no window")?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow::anyhow!("no location origin"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin))?;
    Ok(base.join(file_name)?)
}

/// Callback receiving `(loaded, total)` byte counts while a fetch is running.
pub type ByteProgress<'a> = &'a dyn Fn(u64, Option<u64>);

/// Fetch the bytes behind `file_name`, reporting progress per received chunk.
///
/// On the web this is an HTTP request relative to `<origin>/assets/`, natively a read
/// from `./assets/`.
pub async fn load_binary(file_name: &str, progress: ByteProgress<'_>) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        use futures::TryStreamExt;

        let url = format_url(file_name)?;
        let response = reqwest::get(url).await?.error_for_status()?;
        let total = response.content_length();
        collect_chunks(response.bytes_stream().map_err(anyhow::Error::from), total, progress).await?
    };
    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        use tokio::io::AsyncReadExt;

        const CHUNK_SIZE: usize = 64 * 1024;

        let path = std::path::Path::new("./").join("assets").join(file_name);
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let total = file.metadata().await.ok().map(|metadata| metadata.len());
        let chunks = futures::stream::try_unfold(file, |mut file| async move {
            let mut chunk = vec![0; CHUNK_SIZE];
            let read = file.read(&mut chunk).await?;
            chunk.truncate(read);
            anyhow::Ok((read > 0).then_some((chunk, file)))
        });
        collect_chunks(chunks, total, progress)
            .await
            .with_context(|| format!("reading {}", path.display()))?
    };

    Ok(data)
}

/// Concatenate `chunks`, calling `progress` before the first and after every chunk.
pub(crate) async fn collect_chunks<S, B>(chunks: S, total: Option<u64>, progress: ByteProgress<'_>) -> anyhow::Result<Vec<u8>>
where
    S: futures::Stream<Item = anyhow::Result<B>>,
    B: AsRef<[u8]>,
{
    use futures::TryStreamExt;

    let mut data = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
    progress(0, total);
    futures::pin_mut!(chunks);
    while let Some(chunk) = chunks.try_next().await? {
        data.extend_from_slice(chunk.as_ref());
        progress(data.len() as u64, total);
    }
    Ok(data)
}

/// Decode image bytes and upload them as an sRGB (or linear, for data maps) texture.
pub fn texture_from_bytes(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    bytes: &[u8],
    label: &str,
    linear: bool,
) -> anyhow::Result<Texture> {
    let img = match ImageFormat::from_path(label) {
        Ok(format) => load_from_memory_with_format(bytes, format)?,
        Err(_) => image::load_from_memory(bytes)?,
    };
    Ok(texture_from_image(device, queue, &img, label, linear))
}

pub fn texture_from_image(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    img: &image::DynamicImage,
    label: &str,
    linear: bool,
) -> Texture {
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba8();
    upload_rgba(device, queue, &rgba, width, height, label, linear)
}

/// A 1×1 texture of a single colour, used where a material has no map.
pub fn solid_texture(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4], label: &str) -> Texture {
    upload_rgba(device, queue, &rgba, 1, 1, label, true)
}

fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    rgba: &[u8],
    width: u32,
    height: u32,
    label: &str,
    linear: bool,
) -> Texture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let format = if linear {
        wgpu::TextureFormat::Rgba8Unorm
    } else {
        wgpu::TextureFormat::Rgba8UnormSrgb
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Texture::new(label, width, height, Box::new(texture)).with_view(view)
}

pub fn create_default_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}

/// Depth attachment matching the surface size.
pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Texture {
    let extent = wgpu::Extent3d {
        width: size[0].max(1),
        height: size[1].max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[DEPTH_FORMAT],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Texture::new(label, extent.width, extent.height, Box::new(texture)).with_view(view)
}

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
