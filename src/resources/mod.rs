//! GPU-backed resources and the object graphs that own them.
//!
//! Every allocation a scene makes on the GPU is wrapped in one of a small, closed
//! set of resource kinds ([`Resource`]): geometry, materials, textures and render
//! targets. Each kind knows how to release its handles, so the disposer never has
//! to guess what an object is by poking at its properties.
//!
//! Ownership follows the graph:
//! - a [`SceneNode`] owns its mesh, its loose resources and its children
//! - textures and materials are `Rc`-shared between meshes but release exactly once
//! - [`Model`]s handed out by the asset cache are referenced from scene nodes through
//!   `instances` and are owned by the cache, not by the scene
//!
//! The loaders in this module (`texture`, `mesh`, `gltf_loader`, `source`) create these
//! objects from wgpu allocations. Tests create them from mock handles.

use std::{
    cell::{Cell, Ref, RefCell},
    collections::BTreeMap,
    fmt::Debug,
    rc::Rc,
};

use cgmath::SquareMatrix;

pub mod dispose;
pub mod gltf_loader;
pub mod mesh;
pub mod source;
pub mod texture;

/// A single releasable GPU allocation.
///
/// `release` is called at most once by the owning resource. Implementations for
/// wgpu types live in [`texture`] and [`mesh`].
pub trait GpuHandle {
    fn release(&mut self) -> anyhow::Result<()>;

    /// Approximate resident size in bytes, used for memory estimates.
    fn byte_size(&self) -> u64 {
        0
    }
}

/// Release `handle` if it is still present, logging instead of propagating failures.
///
/// Returns `true` if a release was attempted.
pub(crate) fn release_handle(kind: &str, label: &str, handle: Option<Box<dyn GpuHandle>>) -> bool {
    match handle {
        Some(mut handle) => {
            if let Err(e) = handle.release() {
                log::warn!("Failed to release {kind} '{label}': {e:#}");
            } else {
                log::trace!("Released {kind} '{label}'");
            }
            true
        }
        None => false,
    }
}

/// A texture living on the GPU.
///
/// Shared through `Rc` between every material that samples it. The first
/// [`dispose`](dispose::Disposable) releases the allocation, later ones are no-ops.
pub struct Texture {
    label: String,
    width: u32,
    height: u32,
    handle: RefCell<Option<Box<dyn GpuHandle>>>,
    view: RefCell<Option<wgpu::TextureView>>,
}

impl Texture {
    pub fn new(label: impl Into<String>, width: u32, height: u32, handle: Box<dyn GpuHandle>) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            handle: RefCell::new(Some(handle)),
            view: RefCell::new(None),
        }
    }

    /// Attach the view the renderer samples from.
    pub fn with_view(self, view: wgpu::TextureView) -> Self {
        *self.view.borrow_mut() = Some(view);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn view(&self) -> Option<wgpu::TextureView> {
        self.view.borrow().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.borrow().is_none()
    }

    /// Resident bytes: what the handle reports, or an RGBA8 estimate.
    pub fn byte_size(&self) -> u64 {
        match self.handle.borrow().as_ref() {
            Some(handle) => match handle.byte_size() {
                0 => u64::from(self.width) * u64::from(self.height) * 4,
                bytes => bytes,
            },
            None => 0,
        }
    }

    pub(crate) fn release(&self) -> bool {
        self.view.borrow_mut().take();
        let handle = self.handle.borrow_mut().take();
        release_handle("texture", &self.label, handle)
    }
}

impl Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("label", &self.label)
            .field("size", &(self.width, self.height))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Vertex and index buffers a mesh is drawn from.
#[derive(Clone, Debug)]
pub struct MeshBuffers {
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
    pub index_count: u32,
}

/// Vertex data on the GPU.
pub struct Geometry {
    label: String,
    triangles: u32,
    handles: Vec<Box<dyn GpuHandle>>,
    buffers: Option<MeshBuffers>,
}

impl Geometry {
    pub fn new(label: impl Into<String>, triangles: u32, handles: Vec<Box<dyn GpuHandle>>) -> Self {
        Self {
            label: label.into(),
            triangles,
            handles,
            buffers: None,
        }
    }

    /// Geometry drawn by the wgpu renderer. Both buffers are released on dispose.
    pub fn from_buffers(label: impl Into<String>, buffers: MeshBuffers) -> Self {
        let handles: Vec<Box<dyn GpuHandle>> = vec![
            Box::new(buffers.vertex.clone()),
            Box::new(buffers.index.clone()),
        ];
        Self {
            label: label.into(),
            triangles: buffers.index_count / 3,
            handles,
            buffers: Some(buffers),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn triangles(&self) -> u32 {
        self.triangles
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        self.buffers.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.handles.is_empty() && self.buffers.is_none()
    }

    pub(crate) fn release(&mut self) -> bool {
        self.buffers = None;
        let label = self.label.clone();
        self.handles
            .drain(..)
            .map(|handle| release_handle("geometry", &label, Some(handle)))
            .fold(false, |acc, released| acc | released)
    }
}

impl Debug for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geometry")
            .field("label", &self.label)
            .field("triangles", &self.triangles)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A value in a material's property set.
#[derive(Clone, Debug)]
pub enum MaterialProperty {
    Texture(Rc<Texture>),
    /// A texture owned by the asset cache. Sampled like any other, never released
    /// with the material.
    SharedTexture(Rc<Texture>),
    Color([f32; 4]),
    Scalar(f32),
}

/// Property key of the base colour texture.
pub const BASE_COLOR_MAP: &str = "map";
/// Property key of the base colour factor.
pub const BASE_COLOR: &str = "color";

/// Shading parameters shared between meshes.
pub struct Material {
    label: String,
    properties: RefCell<BTreeMap<String, MaterialProperty>>,
    handle: RefCell<Option<Box<dyn GpuHandle>>>,
    binding: RefCell<Option<wgpu::BindGroup>>,
    disposed: Cell<bool>,
}

impl Material {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: RefCell::new(BTreeMap::new()),
            handle: RefCell::new(None),
            binding: RefCell::new(None),
            disposed: Cell::new(false),
        }
    }

    pub fn with_property(self, key: impl Into<String>, value: MaterialProperty) -> Self {
        self.properties.borrow_mut().insert(key.into(), value);
        self
    }

    /// A GPU allocation owned by the material itself (e.g. a uniform buffer).
    pub fn with_handle(self, handle: Box<dyn GpuHandle>) -> Self {
        *self.handle.borrow_mut() = Some(handle);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn property(&self, key: &str) -> Option<MaterialProperty> {
        self.properties.borrow().get(key).cloned()
    }

    /// Every texture-valued property, in key order.
    pub fn textures(&self) -> Vec<Rc<Texture>> {
        self.properties
            .borrow()
            .values()
            .filter_map(|value| match value {
                MaterialProperty::Texture(texture) | MaterialProperty::SharedTexture(texture) => Some(texture.clone()),
                _ => None,
            })
            .collect()
    }

    /// Texture-valued properties the material is responsible for releasing.
    pub fn owned_textures(&self) -> Vec<Rc<Texture>> {
        self.properties
            .borrow()
            .values()
            .filter_map(|value| match value {
                MaterialProperty::Texture(texture) => Some(texture.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn base_color(&self) -> [f32; 4] {
        match self.property(BASE_COLOR) {
            Some(MaterialProperty::Color(color)) => color,
            _ => [1.0; 4],
        }
    }

    pub fn base_color_map(&self) -> Option<Rc<Texture>> {
        match self.property(BASE_COLOR_MAP) {
            Some(MaterialProperty::Texture(texture) | MaterialProperty::SharedTexture(texture)) => Some(texture),
            _ => None,
        }
    }

    /// Bind group cached by the renderer, built on first draw.
    pub fn binding(&self) -> Option<wgpu::BindGroup> {
        self.binding.borrow().clone()
    }

    pub fn set_binding(&self, binding: wgpu::BindGroup) {
        if !self.disposed.get() {
            *self.binding.borrow_mut() = Some(binding);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Release the material's own handle. Textures are released by the disposer.
    pub(crate) fn release(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        self.binding.borrow_mut().take();
        let handle = self.handle.borrow_mut().take();
        release_handle("material", &self.label, handle);
        true
    }
}

impl Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("label", &self.label)
            .field("properties", &self.properties.borrow().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An offscreen colour target with an optional depth attachment.
#[derive(Debug)]
pub struct RenderTarget {
    pub label: String,
    pub color: Rc<Texture>,
    pub depth: Option<Rc<Texture>>,
}

/// The closed set of disposable GPU resource kinds.
#[derive(Debug)]
pub enum Resource {
    Geometry(Geometry),
    Material(Rc<Material>),
    Texture(Rc<Texture>),
    RenderTarget(RenderTarget),
}

/// Something drawable: geometry shaded by a material.
#[derive(Debug)]
pub struct Mesh {
    pub geometry: Geometry,
    pub material: Rc<Material>,
}

/// A node of a scene's renderable graph.
#[derive(Debug)]
pub struct SceneNode {
    pub name: String,
    pub transform: cgmath::Matrix4<f32>,
    pub visible: bool,
    pub mesh: Option<Mesh>,
    pub resources: Vec<Resource>,
    pub children: Vec<SceneNode>,
    /// Cache-owned models placed under this node.
    pub instances: Vec<Rc<Model>>,
    pub(crate) disposed: bool,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: cgmath::Matrix4::identity(),
            visible: true,
            mesh: None,
            resources: Vec::new(),
            children: Vec::new(),
            instances: Vec::new(),
            disposed: false,
        }
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_transform(mut self, transform: cgmath::Matrix4<f32>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub fn add_instance(&mut self, model: Rc<Model>) {
        self.instances.push(model);
    }

    /// Remove the first direct child called `name` from this node.
    pub fn detach_child(&mut self, name: &str) -> Option<SceneNode> {
        let idx = self.children.iter().position(|child| child.name == name)?;
        Some(self.children.remove(idx))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Visit every visible mesh with its world transform, descending into instances.
    pub fn walk_meshes<F>(&self, parent: cgmath::Matrix4<f32>, f: &mut F)
    where
        F: FnMut(&Mesh, cgmath::Matrix4<f32>),
    {
        if !self.visible || self.disposed {
            return;
        }
        let world = parent * self.transform;
        if let Some(mesh) = &self.mesh {
            f(mesh, world);
        }
        for instance in &self.instances {
            instance.root().walk_meshes(world, f);
        }
        for child in &self.children {
            child.walk_meshes(world, f);
        }
    }

    /// Number of GPU objects reachable from this node, by kind.
    pub fn census(&self) -> Census {
        let mut census = Census::default();
        let mut textures: Vec<*const Texture> = Vec::new();
        self.count_into(&mut census, &mut textures);
        census.textures = textures.len();
        census
    }

    fn count_into(&self, census: &mut Census, textures: &mut Vec<*const Texture>) {
        let mut note_texture = |texture: &Rc<Texture>, census: &mut Census| {
            let ptr = Rc::as_ptr(texture);
            if !texture.is_disposed() && !textures.contains(&ptr) {
                textures.push(ptr);
                census.texture_bytes += texture.byte_size();
            }
        };
        if let Some(mesh) = &self.mesh {
            if !mesh.geometry.is_disposed() {
                census.geometries += 1;
                census.triangles += u64::from(mesh.geometry.triangles());
            }
            mesh.material
                .textures()
                .iter()
                .for_each(|t| note_texture(t, census));
        }
        for resource in &self.resources {
            match resource {
                Resource::Geometry(geometry) if !geometry.is_disposed() => census.geometries += 1,
                Resource::Geometry(_) => (),
                Resource::Material(material) => material
                    .textures()
                    .iter()
                    .for_each(|t| note_texture(t, census)),
                Resource::Texture(texture) => note_texture(texture, census),
                Resource::RenderTarget(target) => {
                    note_texture(&target.color, census);
                    if let Some(depth) = &target.depth {
                        note_texture(depth, census);
                    }
                }
            }
        }
        for instance in &self.instances {
            instance.root().count_into(census, textures);
        }
        for child in &self.children {
            child.count_into(census, textures);
        }
    }
}

/// Live GPU object counts for a graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Census {
    pub geometries: usize,
    pub textures: usize,
    pub triangles: u64,
    pub texture_bytes: u64,
}

/// A loaded model owned by the asset cache.
///
/// Scenes reference models through [`SceneNode::add_instance`]; only
/// [`AssetLoader::clear_cache`](crate::assets::AssetLoader::clear_cache) frees them.
#[derive(Debug)]
pub struct Model {
    url: String,
    root: RefCell<SceneNode>,
}

impl Model {
    pub fn new(url: impl Into<String>, root: SceneNode) -> Self {
        Self {
            url: url.into(),
            root: RefCell::new(root),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> Ref<'_, SceneNode> {
        self.root.borrow()
    }

    pub fn is_disposed(&self) -> bool {
        self.root.borrow().is_disposed()
    }

    pub(crate) fn root_mut(&self) -> std::cell::RefMut<'_, SceneNode> {
        self.root.borrow_mut()
    }
}
