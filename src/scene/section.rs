//! A scene built from one section of the content document.

use std::rc::Rc;

use cgmath::{Matrix4, Rad, Vector3};
use futures::{FutureExt, future::LocalBoxFuture};

use super::{FrameContext, Scene, SceneContext, SceneDescriptor, SceneId};
use crate::{
    assets::PreloadPolicy,
    content::{ContentDocument, Section},
    motion::ReducedMotion,
    resources::{
        BASE_COLOR, BASE_COLOR_MAP, Material, MaterialProperty, Mesh, SceneNode, dispose::ResourceDisposer, mesh,
        texture::solid_texture,
    },
};

/// Radians per second the section's showcase turns at.
const SPIN_SPEED: f32 = 0.15;
const CARD_SIZE: (f32, f32) = (1.6, 0.9);
const CARD_SPACING: f32 = 2.0;
const SHOWCASE: &str = "showcase";

/// Shows a section's project models and thumbnail cards laid out in a row.
///
/// Models and thumbnails come from the asset cache and stay there when the scene
/// goes away; the card geometry and materials belong to the scene.
pub struct SectionScene {
    id: SceneId,
    section: Section,
    root: SceneNode,
    initialized: bool,
    mounted: bool,
    motion: Option<ReducedMotion>,
}

impl SectionScene {
    pub fn new(section: Section) -> Self {
        let id = SceneId::new(section.id.clone());
        Self {
            root: SceneNode::new(format!("section:{id}")),
            id,
            section,
            initialized: false,
            mounted: false,
            motion: None,
        }
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    async fn load(&mut self, ctx: SceneContext) -> anyhow::Result<()> {
        let models: Vec<String> = self.section.model_urls().into_iter().map(String::from).collect();
        let thumbnails: Vec<String> = self.section.thumbnail_urls().into_iter().map(String::from).collect();
        // A missing model or thumbnail degrades the section, it does not break it.
        let report = ctx
            .assets
            .preload_assets_with(&models, &thumbnails, PreloadPolicy::CollectAll)
            .await?;
        for failure in &report.failures {
            log::warn!("Section '{}' continues without {}", self.id, failure.url);
        }

        let mut showcase = SceneNode::new(SHOWCASE);
        let count = report.models.len();
        for (i, model) in report.models.into_iter().enumerate() {
            let mut holder = SceneNode::new(format!("model:{}", model.url()))
                .with_transform(Matrix4::from_translation(slot(i, count)));
            holder.add_instance(model);
            showcase.add_child(holder);
        }
        self.root.add_child(showcase);

        if let Some(gpu) = &ctx.gpu {
            let (vertices, indices) = mesh::quad(CARD_SIZE.0, CARD_SIZE.1);
            let mut cards = SceneNode::new("cards");
            for (i, texture) in report.textures.iter().enumerate() {
                let label = format!("{}:card:{i}", self.id);
                let geometry = mesh::upload_geometry(&gpu.device, &label, &vertices, &indices);
                let material = Rc::new(
                    Material::new(label.clone())
                        .with_property(BASE_COLOR_MAP, MaterialProperty::SharedTexture(texture.clone())),
                );
                let offset = slot(i, report.textures.len()) - Vector3::new(0.0, 1.5, 0.0);
                cards.add_child(
                    SceneNode::new(label)
                        .with_mesh(Mesh { geometry, material })
                        .with_transform(Matrix4::from_translation(offset)),
                );
            }
            self.root.add_child(cards);

            if self.section.projects.is_empty() {
                let (vertices, indices) = mesh::uv_sphere(1.0, 24, 32);
                let label = format!("{}:marker", self.id);
                let geometry = mesh::upload_geometry(&gpu.device, &label, &vertices, &indices);
                let tint = Rc::new(solid_texture(&gpu.device, &gpu.queue, [255, 255, 255, 255], &label));
                let material = Rc::new(
                    Material::new(label.clone())
                        .with_property(BASE_COLOR_MAP, MaterialProperty::Texture(tint))
                        .with_property(BASE_COLOR, MaterialProperty::Color([0.85, 0.8, 1.0, 1.0])),
                );
                self.root
                    .add_child(SceneNode::new(label).with_mesh(Mesh { geometry, material }));
            }
        }

        self.motion = Some(ctx.motion.clone());
        self.initialized = true;
        log::debug!("Section '{}' initialized", self.id);
        Ok(())
    }
}

/// Centre of slot `i` of `n` along the X axis.
fn slot(i: usize, n: usize) -> Vector3<f32> {
    let first = -(n.saturating_sub(1) as f32) * CARD_SPACING / 2.0;
    Vector3::new(first + i as f32 * CARD_SPACING, 0.0, 0.0)
}

impl Scene for SectionScene {
    fn id(&self) -> &SceneId {
        &self.id
    }

    fn root(&self) -> &SceneNode {
        &self.root
    }

    fn root_mut(&mut self) -> &mut SceneNode {
        &mut self.root
    }

    fn init(&mut self, ctx: SceneContext) -> LocalBoxFuture<'_, anyhow::Result<()>> {
        async move {
            if self.initialized {
                return Ok(());
            }
            self.load(ctx).await
        }
        .boxed_local()
    }

    fn mount(&mut self) {
        self.root.visible = true;
        self.mounted = true;
    }

    fn update(&mut self, frame: &FrameContext<'_>) {
        let still = self
            .motion
            .as_ref()
            .is_some_and(|motion| motion.prefers_reduced_motion());
        if still {
            return;
        }
        let angle = Rad(frame.total.as_secs_f32() * SPIN_SPEED);
        for showcase in self.root.children.iter_mut().filter(|c| c.name == SHOWCASE) {
            let count = showcase.children.len();
            for (i, holder) in showcase.children.iter_mut().enumerate() {
                holder.transform = Matrix4::from_translation(slot(i, count)) * Matrix4::from_angle_y(angle);
            }
        }
    }

    fn dispose(&mut self) {
        self.mounted = false;
        self.root.visible = false;
        // Scene-owned loose resources go first; the manager sweeps the rest.
        for resource in self.root.resources.iter_mut() {
            ResourceDisposer::dispose_resource(resource);
        }
        self.root.resources.clear();
    }
}

/// One descriptor per section; the landing section is marked as such.
pub fn descriptors(document: &ContentDocument) -> Vec<SceneDescriptor> {
    document
        .sections
        .iter()
        .map(|section| {
            let owned = section.clone();
            let mut descriptor = SceneDescriptor::new(
                section.id.as_str(),
                section.camera.position(),
                section.camera.target(),
                move || Box::new(SectionScene::new(owned.clone())),
            );
            descriptor.is_landing = section.landing;
            descriptor
        })
        .collect()
}
