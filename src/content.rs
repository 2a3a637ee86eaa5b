//! The content document: navigable sections and the projects shown in them.
//!
//! Only the structural shape is checked here. What the text says, or whether a
//! project is worth featuring, is none of this crate's business.

use std::collections::HashSet;

use cgmath::Point3;
use serde::{Deserialize, Serialize};

/// Where the camera goes for a section.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: [f32; 3],
    pub target: [f32; 3],
}

impl CameraPose {
    pub fn position(&self) -> Point3<f32> {
        self.position.into()
    }

    pub fn target(&self) -> Point3<f32> {
        self.target.into()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub thumbnail: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub featured: bool,
    /// ISO date, kept as written.
    #[serde(default)]
    pub created: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub camera: CameraPose,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub projects: Vec<Project>,
    /// The entry section; gets the tighter draw-call budget.
    #[serde(default)]
    pub landing: bool,
}

impl Section {
    /// Model URLs, in project order.
    pub fn model_urls(&self) -> Vec<&str> {
        self.projects.iter().filter_map(|p| p.model.as_deref()).collect()
    }

    pub fn thumbnail_urls(&self) -> Vec<&str> {
        self.projects.iter().map(|p| p.thumbnail.as_str()).collect()
    }

    pub fn featured(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.featured)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    pub sections: Vec<Section>,
}

impl ContentDocument {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let document: Self = serde_json::from_str(json)?;
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sections.is_empty() {
            anyhow::bail!("content has no sections");
        }
        let mut ids = HashSet::new();
        for section in &self.sections {
            if section.id.trim().is_empty() {
                anyhow::bail!("section without an id");
            }
            if !ids.insert(section.id.as_str()) {
                anyhow::bail!("duplicate section id '{}'", section.id);
            }
            if let Some(project) = section.projects.iter().find(|p| p.title.trim().is_empty()) {
                anyhow::bail!("project without a title in section '{}' ({})", section.id, project.thumbnail);
            }
        }
        if self.sections.iter().filter(|s| s.landing).count() > 1 {
            anyhow::bail!("more than one landing section");
        }
        Ok(())
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// The landing section, or the first one if none is marked.
    pub fn landing(&self) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.landing)
            .or_else(|| self.sections.first())
    }
}
