use wgpu::util::DeviceExt;

use super::{Geometry, GpuHandle, MeshBuffers};

impl GpuHandle for wgpu::Buffer {
    fn release(&mut self) -> anyhow::Result<()> {
        self.destroy();
        Ok(())
    }

    fn byte_size(&self) -> u64 {
        self.size()
    }
}

/// Vertex layout shared by every mesh the renderer draws.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl ModelVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2, 2 => Float32x3];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Upload vertices and indices into a drawable [`Geometry`].
pub fn upload_geometry(
    device: &wgpu::Device,
    label: &str,
    vertices: &[ModelVertex],
    indices: &[u32],
) -> Geometry {
    let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label} Vertex Buffer")),
        contents: bytemuck::cast_slice(vertices),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label} Index Buffer")),
        contents: bytemuck::cast_slice(indices),
        usage: wgpu::BufferUsages::INDEX,
    });
    Geometry::from_buffers(
        label,
        MeshBuffers {
            vertex,
            index,
            index_count: indices.len() as u32,
        },
    )
}

/// A `width × height` quad in the XY plane facing +Z, centred on the origin.
pub fn quad(width: f32, height: f32) -> (Vec<ModelVertex>, Vec<u32>) {
    let (hw, hh) = (width / 2.0, height / 2.0);
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        ModelVertex { position: [-hw, -hh, 0.0], tex_coords: [0.0, 1.0], normal },
        ModelVertex { position: [hw, -hh, 0.0], tex_coords: [1.0, 1.0], normal },
        ModelVertex { position: [hw, hh, 0.0], tex_coords: [1.0, 0.0], normal },
        ModelVertex { position: [-hw, hh, 0.0], tex_coords: [0.0, 0.0], normal },
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

/// A UV sphere with `rings × segments` quads.
pub fn uv_sphere(radius: f32, rings: u32, segments: u32) -> (Vec<ModelVertex>, Vec<u32>) {
    let rings = rings.max(2);
    let segments = segments.max(3);
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let phi = v * std::f32::consts::PI;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let theta = u * std::f32::consts::TAU;
            let normal = [phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin()];
            vertices.push(ModelVertex {
                position: [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                tex_coords: [u, v],
                normal,
            });
        }
    }
    let stride = segments + 1;
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    (vertices, indices)
}
