//! The wgpu [`Renderer`]: surface, device and one unlit textured pipeline.

use std::{
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use cgmath::{Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    camera::{Camera, CameraUniform},
    error::FolioError,
    pipelines::unlit::{self, DRAW_UNIFORM_SIZE, DrawUniform},
    render::{RenderError, RenderInfo, Renderer},
    resources::{
        Material, MeshBuffers, SceneNode, Texture,
        dispose::ResourceDisposer,
        texture::{create_default_sampler, create_depth_texture, solid_texture},
    },
    scene::Gpu,
};

const INITIAL_DRAW_SLOTS: u64 = 64;

/// Everything one draw needs, detached from the graph borrow.
struct Draw {
    buffers: MeshBuffers,
    material: Rc<Material>,
    world: Matrix4<f32>,
}

pub struct Context {
    window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub clear_colour: wgpu::Color,
    is_surface_configured: bool,
    depth_texture: Rc<Texture>,
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    draw_layout: wgpu::BindGroupLayout,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    draw_stride: u64,
    draw_slots: u64,
    material_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    fallback: Rc<Texture>,
    /// Sampled by materials without a base colour map.
    fallback_view: wgpu::TextureView,
    lost: Arc<AtomicBool>,
    info: RenderInfo,
}

impl Context {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| FolioError::UnsupportedEnvironment(format!("no drawing surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| FolioError::UnsupportedEnvironment(format!("no suitable GPU adapter: {e}")))?;
        log::info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features, so if
                // we're building for the web we'll have to disable some.
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                ..Default::default()
            })
            .await
            .map_err(|e| FolioError::UnsupportedEnvironment(format!("no GPU device: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = lost.clone();
            device.set_device_lost_callback(move |reason, message| {
                log::error!("GPU device lost ({reason:?}): {message}");
                lost.store(true, Ordering::SeqCst);
            });
        }

        let surface_caps = surface.get_capabilities(&adapter);
        // The shader writes linear colour; an sRGB surface does the conversion.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| FolioError::UnsupportedEnvironment("surface has no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        let is_surface_configured = size.width > 0 && size.height > 0;
        if is_surface_configured {
            surface.configure(&device, &config);
        }

        let camera_layout = unlit::camera_layout(&device);
        let draw_layout = unlit::draw_layout(&device);
        let material_layout = unlit::material_layout(&device);
        let pipeline = unlit::mk_unlit_pipeline(&device, config.format, &camera_layout, &draw_layout, &material_layout);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform {
                view_position: [0.0; 4],
                view_proj: [[0.0; 4]; 4],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment).max(1);
        let draw_stride = DRAW_UNIFORM_SIZE.div_ceil(alignment) * alignment;
        let (draw_buffer, draw_bind_group) = create_draw_slots(&device, &draw_layout, draw_stride, INITIAL_DRAW_SLOTS);

        let depth_texture = Rc::new(create_depth_texture(&device, [config.width, config.height], "depth_texture"));
        let fallback_texture = solid_texture(&device, &queue, [255, 255, 255, 255], "fallback_white");
        let fallback_view = fallback_texture
            .view()
            .ok_or_else(|| anyhow::anyhow!("fallback texture has no view"))?;
        let fallback = Rc::new(fallback_texture);
        let sampler = create_default_sampler(&device);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            clear_colour: wgpu::Color {
                r: 0.02,
                g: 0.02,
                b: 0.04,
                a: 1.0,
            },
            is_surface_configured,
            depth_texture,
            pipeline,
            camera_buffer,
            camera_bind_group,
            draw_layout,
            draw_buffer,
            draw_bind_group,
            draw_stride,
            draw_slots: INITIAL_DRAW_SLOTS,
            material_layout,
            sampler,
            fallback,
            fallback_view,
            lost,
            info: RenderInfo::default(),
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Device and queue for scenes and asset sources.
    pub fn gpu(&self) -> Gpu {
        Gpu {
            device: self.device.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Release the context's own allocations. Scene resources are not touched.
    pub fn dispose(&mut self) {
        ResourceDisposer::dispose(&mut self.depth_texture);
        ResourceDisposer::dispose(&mut self.fallback);
        self.draw_buffer.destroy();
        self.camera_buffer.destroy();
    }

    fn reserve_draw_slots(&mut self, needed: u64) {
        if needed <= self.draw_slots {
            return;
        }
        let slots = needed.next_power_of_two();
        log::debug!("Growing draw uniforms to {slots} slots");
        self.draw_buffer.destroy();
        let (buffer, bind_group) = create_draw_slots(&self.device, &self.draw_layout, self.draw_stride, slots);
        self.draw_buffer = buffer;
        self.draw_bind_group = bind_group;
        self.draw_slots = slots;
    }

    fn material_binding(&self, material: &Material) -> wgpu::BindGroup {
        if let Some(binding) = material.binding() {
            return binding;
        }
        let view = material
            .base_color_map()
            .and_then(|texture| texture.view())
            .unwrap_or_else(|| self.fallback_view.clone());
        let binding = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.material_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            label: Some(material.label()),
        });
        material.set_binding(binding.clone());
        binding
    }
}

fn create_draw_slots(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    slots: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Draw Uniform Buffer"),
        size: stride * slots,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(DRAW_UNIFORM_SIZE),
            }),
        }],
        label: Some("draw_bind_group"),
    });
    (buffer, bind_group)
}

impl Renderer for Context {
    fn render(&mut self, root: Option<&SceneNode>, camera: &Camera) -> Result<(), RenderError> {
        if self.is_context_lost() {
            return Err(RenderError::ContextLost);
        }
        self.info = RenderInfo {
            programs: 1,
            ..RenderInfo::default()
        };
        // Rendering requires the surface to be configured
        if !self.is_surface_configured {
            return Ok(());
        }

        let mut draws = Vec::new();
        if let Some(root) = root {
            root.walk_meshes(Matrix4::identity(), &mut |mesh, world| {
                if let Some(buffers) = mesh.geometry.buffers() {
                    draws.push(Draw {
                        buffers: buffers.clone(),
                        material: mesh.material.clone(),
                        world,
                    });
                }
            });
            let census = root.census();
            self.info.geometries = census.geometries;
            self.info.textures = census.textures;
            self.info.texture_bytes = Some(census.texture_bytes);
        }

        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniform::from_camera(camera)]),
        );
        self.reserve_draw_slots(draws.len() as u64);
        let mut uniforms = vec![0u8; (self.draw_stride as usize) * draws.len()];
        for (i, draw) in draws.iter().enumerate() {
            let uniform = DrawUniform {
                model: draw.world.into(),
                color: draw.material.base_color(),
            };
            let start = i * self.draw_stride as usize;
            uniforms[start..start + DRAW_UNIFORM_SIZE as usize].copy_from_slice(bytemuck::bytes_of(&uniform));
        }
        if !uniforms.is_empty() {
            self.queue.write_buffer(&self.draw_buffer, 0, &uniforms);
        }
        let bindings: Vec<wgpu::BindGroup> = draws
            .iter()
            .map(|draw| self.material_binding(&draw.material))
            .collect();

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(e) => return Err(RenderError::Other(anyhow::anyhow!("surface unavailable: {e}"))),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = self
            .depth_texture
            .view()
            .ok_or_else(|| RenderError::Other(anyhow::anyhow!("depth texture was released")))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            for (i, (draw, binding)) in draws.iter().zip(&bindings).enumerate() {
                let offset = (i as u64 * self.draw_stride) as u32;
                render_pass.set_bind_group(1, &self.draw_bind_group, &[offset]);
                render_pass.set_bind_group(2, binding, &[]);
                render_pass.set_vertex_buffer(0, draw.buffers.vertex.slice(..));
                render_pass.set_index_buffer(draw.buffers.index.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..draw.buffers.index_count, 0, 0..1);
                self.info.draw_calls += 1;
                self.info.triangles += u64::from(draw.buffers.index_count / 3);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }

    fn info(&self) -> RenderInfo {
        self.info
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.is_surface_configured = true;
        self.surface.configure(&self.device, &self.config);
        ResourceDisposer::dispose(&mut self.depth_texture);
        self.depth_texture = Rc::new(create_depth_texture(&self.device, [width, height], "depth_texture"));
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}
