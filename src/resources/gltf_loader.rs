//! glTF models to scene graphs.
//!
//! Only what the renderer draws is read: positions, normals, the first UV set,
//! indices, node transforms and each material's base colour (factor and texture).
//! Animations, skins and morph targets are ignored.

use std::{collections::HashMap, rc::Rc};

use anyhow::Context as _;

use super::{
    BASE_COLOR, BASE_COLOR_MAP, Material, MaterialProperty, Mesh, SceneNode, Texture,
    mesh::{ModelVertex, upload_geometry},
    texture::{ByteProgress, load_binary, texture_from_bytes},
};

/// Parse a `.gltf`/`.glb` document and upload its meshes and textures.
pub async fn load_model_gltf(
    file_name: &str,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    progress: ByteProgress<'_>,
) -> anyhow::Result<SceneNode> {
    let bytes = load_binary(file_name, progress).await?;
    let gltf = gltf::Gltf::from_slice(&bytes).with_context(|| format!("parsing {file_name}"))?;

    let mut buffer_data: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                let blob = gltf
                    .blob
                    .as_deref()
                    .with_context(|| format!("{file_name} references a missing binary chunk"))?;
                buffer_data.push(blob.into());
            }
            gltf::buffer::Source::Uri(uri) => {
                buffer_data.push(load_binary(&sibling(file_name, uri), &|_, _| ()).await?);
            }
        }
    }

    let mut textures: HashMap<usize, Rc<Texture>> = HashMap::new();
    let mut materials = Vec::new();
    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        let mut out = Material::new(material.name().unwrap_or("gltf material"))
            .with_property(BASE_COLOR, MaterialProperty::Color(pbr.base_color_factor()));
        if let Some(info) = pbr.base_color_texture() {
            let image = info.texture().source();
            let image_idx = image.index();
            let texture = match textures.get(&image_idx) {
                Some(texture) => texture.clone(),
                None => {
                    let texture = Rc::new(load_image(file_name, image, &buffer_data, device, queue).await?);
                    textures.insert(image_idx, texture.clone());
                    texture
                }
            };
            out = out.with_property(BASE_COLOR_MAP, MaterialProperty::Texture(texture));
        }
        materials.push(Rc::new(out));
    }
    let fallback = Rc::new(Material::new("gltf default"));

    let mut root = SceneNode::new(file_name);
    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .with_context(|| format!("{file_name} contains no scene"))?;
    for node in scene.nodes() {
        root.add_child(to_scene_node(node, &buffer_data, device, &materials, &fallback));
    }
    Ok(root)
}

async fn load_image(
    file_name: &str,
    image: gltf::Image<'_>,
    buffers: &[Vec<u8>],
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> anyhow::Result<Texture> {
    match image.source() {
        gltf::image::Source::View { view, mime_type } => {
            let start = view.offset();
            let end = start + view.length();
            let bytes = buffers
                .get(view.buffer().index())
                .and_then(|buffer| buffer.get(start..end))
                .with_context(|| format!("{file_name}: image view out of bounds"))?;
            let label = format!("{file_name}#{}.{}", image.index(), mime_type.rsplit('/').next().unwrap_or("png"));
            texture_from_bytes(device, queue, bytes, &label, false)
        }
        gltf::image::Source::Uri { uri, .. } => {
            let path = sibling(file_name, uri);
            let bytes = load_binary(&path, &|_, _| ()).await?;
            texture_from_bytes(device, queue, &bytes, &path, false)
        }
    }
}

fn to_scene_node(
    node: gltf::Node<'_>,
    buffers: &[Vec<u8>],
    device: &wgpu::Device,
    materials: &[Rc<Material>],
    fallback: &Rc<Material>,
) -> SceneNode {
    let name = node.name().map(str::to_string).unwrap_or_else(|| format!("node {}", node.index()));
    let mut scene_node = SceneNode::new(name.clone()).with_transform(node.transform().matrix().into());

    if let Some(mesh) = node.mesh() {
        for (idx, primitive) in mesh.primitives().enumerate() {
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let mut vertices: Vec<ModelVertex> = match reader.read_positions() {
                Some(positions) => positions
                    .map(|position| ModelVertex {
                        position,
                        ..Default::default()
                    })
                    .collect(),
                None => {
                    log::warn!("Primitive {idx} of '{name}' has no positions, skipping it");
                    continue;
                }
            };
            if let Some(normals) = reader.read_normals() {
                vertices.iter_mut().zip(normals).for_each(|(v, n)| v.normal = n);
            }
            if let Some(uvs) = reader.read_tex_coords(0) {
                vertices
                    .iter_mut()
                    .zip(uvs.into_f32())
                    .for_each(|(v, uv)| v.tex_coords = uv);
            }
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..vertices.len() as u32).collect(),
            };
            let material = primitive
                .material()
                .index()
                .and_then(|i| materials.get(i))
                .unwrap_or(fallback)
                .clone();
            let geometry = upload_geometry(device, &format!("{name}/{idx}"), &vertices, &indices);
            scene_node.add_child(SceneNode::new(format!("{name}/{idx}")).with_mesh(Mesh { geometry, material }));
        }
    }

    for child in node.children() {
        scene_node.add_child(to_scene_node(child, buffers, device, materials, fallback));
    }
    scene_node
}

/// Resolve `uri` relative to the directory of `file_name`.
fn sibling(file_name: &str, uri: &str) -> String {
    match file_name.rfind('/') {
        Some(idx) => format!("{}/{}", &file_name[..idx], uri),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::sibling;

    #[test]
    fn resolves_relative_uris() {
        assert_eq!(sibling("models/desk.gltf", "desk.bin"), "models/desk.bin");
        assert_eq!(sibling("desk.gltf", "desk.bin"), "desk.bin");
    }
}
