//! Deterministic release of GPU resources.
//!
//! [`ResourceDisposer::dispose`] walks an object graph depth-first and frees every
//! GPU allocation reachable from it exactly once: children first, then the node's
//! own mesh and loose resources. Materials take their texture-valued properties down
//! with them, except textures shared from the asset cache. A failing release is
//! logged and the walk carries on with the siblings.
//!
//! Disposing twice is harmless: released handles are gone, so the second pass finds
//! nothing left to free.

use std::rc::Rc;

use super::{Geometry, Material, Mesh, Model, RenderTarget, Resource, SceneNode, Texture};

/// Anything the disposer knows how to free.
///
/// The set of implementors is closed over the resource kinds of this crate, which
/// keeps disposal exhaustively checked by the compiler.
pub trait Disposable {
    fn dispose_gpu(&mut self);
}

impl Disposable for Rc<Texture> {
    fn dispose_gpu(&mut self) {
        self.release();
    }
}

impl Disposable for Geometry {
    fn dispose_gpu(&mut self) {
        self.release();
    }
}

impl Disposable for Rc<Material> {
    fn dispose_gpu(&mut self) {
        if self.is_disposed() {
            return;
        }
        for mut texture in self.owned_textures() {
            texture.dispose_gpu();
        }
        self.release();
    }
}

impl Disposable for RenderTarget {
    fn dispose_gpu(&mut self) {
        self.color.dispose_gpu();
        if let Some(depth) = self.depth.as_mut() {
            depth.dispose_gpu();
        }
    }
}

impl Disposable for Resource {
    fn dispose_gpu(&mut self) {
        match self {
            Resource::Geometry(geometry) => geometry.dispose_gpu(),
            Resource::Material(material) => material.dispose_gpu(),
            Resource::Texture(texture) => texture.dispose_gpu(),
            Resource::RenderTarget(target) => target.dispose_gpu(),
        }
    }
}

impl Disposable for Mesh {
    fn dispose_gpu(&mut self) {
        self.geometry.dispose_gpu();
        self.material.dispose_gpu();
    }
}

impl Disposable for SceneNode {
    fn dispose_gpu(&mut self) {
        if self.disposed {
            return;
        }
        for child in self.children.iter_mut() {
            child.dispose_gpu();
        }
        if let Some(mesh) = self.mesh.as_mut() {
            mesh.dispose_gpu();
        }
        for resource in self.resources.iter_mut() {
            resource.dispose_gpu();
        }
        // Shared models belong to the asset cache: detach, don't free.
        self.instances.clear();
        self.children.clear();
        self.disposed = true;
    }
}

impl<T: Disposable> Disposable for Option<T> {
    fn dispose_gpu(&mut self) {
        if let Some(inner) = self.as_mut() {
            inner.dispose_gpu();
        }
    }
}

/// Stateless entry point for freeing GPU resources.
pub struct ResourceDisposer;

impl ResourceDisposer {
    /// Free everything reachable from `target`. Never fails; see the module docs.
    ///
    /// A node disposed in place is emptied (no children, no instances) but stays in its
    /// parent's `children`. Use [`dispose_child`](Self::dispose_child) to detach it as well.
    pub fn dispose<T: Disposable + ?Sized>(target: &mut T) {
        target.dispose_gpu();
    }

    pub fn dispose_resource(resource: &mut Resource) {
        resource.dispose_gpu();
    }

    /// Remove the child called `name` from `parent` and free it.
    pub fn dispose_child(parent: &mut SceneNode, name: &str) {
        match parent.detach_child(name) {
            Some(mut child) => child.dispose_gpu(),
            None => log::debug!("No child '{}' under '{}' to dispose", name, parent.name),
        }
    }

    /// Free a cache-owned model. Scenes still referencing it will stop drawing it.
    pub fn dispose_model(model: &Model) {
        model.root_mut().dispose_gpu();
    }
}
