//! Runtime configuration.
//!
//! Every tunable of the orchestration core lives in [`FolioConfig`]. All fields have
//! defaults, so a JSON document only needs to name what it overrides:
//!
//! ```json
//! { "camera": { "transition_secs": 1.5 }, "assets": { "max_retries": 5 } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::camera::Easing;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub camera: CameraConfig,
    pub assets: AssetConfig,
    pub budgets: PerformanceBudget,
    pub controls: ControlsConfig,
}

impl FolioConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the camera, clock and monitor cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let camera = &self.camera;
        for (name, value) in [
            ("camera.transition_secs", camera.transition_secs),
            ("camera.parallax_secs", camera.parallax_secs),
            ("camera.fov_degrees", camera.fov_degrees),
            ("camera.min_fov_degrees", camera.min_fov_degrees),
            ("camera.max_fov_degrees", camera.max_fov_degrees),
            ("camera.near", camera.near),
            ("camera.far", camera.far),
            ("camera.parallax_strength", camera.parallax_strength),
            ("budgets.max_frame_time_ms", self.budgets.max_frame_time_ms),
            ("budgets.max_stutter_ms", self.budgets.max_stutter_ms),
            ("budgets.target_fps", self.budgets.target_fps),
            ("budgets.warning_cooldown_secs", self.budgets.warning_cooldown_secs),
        ] {
            anyhow::ensure!(value.is_finite(), "{name} must be finite, got {value}");
        }
        anyhow::ensure!(
            camera.min_fov_degrees <= camera.max_fov_degrees,
            "camera.min_fov_degrees ({}) exceeds camera.max_fov_degrees ({})",
            camera.min_fov_degrees,
            camera.max_fov_degrees
        );
        anyhow::ensure!(
            0.0 < camera.near && camera.near < camera.far,
            "camera clip planes must satisfy 0 < near < far"
        );
        anyhow::ensure!(self.budgets.history_capacity > 0, "budgets.history_capacity must be positive");
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Default length of a directed camera transition.
    pub transition_secs: f32,
    pub easing: Easing,
    pub fov_degrees: f32,
    pub min_fov_degrees: f32,
    pub max_fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// How far (in world units) the camera drifts at the edge of the screen. Zero disables parallax.
    pub parallax_strength: f32,
    pub parallax_secs: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            transition_secs: 2.0,
            easing: Easing::EaseInOut,
            fov_degrees: 50.0,
            min_fov_degrees: 30.0,
            max_fov_degrees: 90.0,
            near: 0.1,
            far: 1000.0,
            parallax_strength: 0.5,
            parallax_secs: 1.0,
        }
    }
}

impl CameraConfig {
    pub fn transition_duration(&self) -> Duration {
        Duration::from_secs_f32(self.transition_secs.max(0.0))
    }

    pub fn parallax_duration(&self) -> Duration {
        Duration::from_secs_f32(self.parallax_secs.max(0.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Total number of attempts per asset, including the first one.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for every further one.
    pub backoff_base_ms: u64,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl AssetConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Frame budget the performance monitor checks every sample against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceBudget {
    pub target_fps: f32,
    pub max_frame_time_ms: f32,
    pub max_draw_calls_landing: u32,
    pub max_draw_calls_typical: u32,
    pub max_texture_memory_bytes: u64,
    pub max_stutter_ms: f32,
    /// Minimum time between two warning bursts.
    pub warning_cooldown_secs: f32,
    pub history_capacity: usize,
}

impl Default for PerformanceBudget {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            max_frame_time_ms: 1000.0 / 60.0,
            max_draw_calls_landing: 50,
            max_draw_calls_typical: 100,
            max_texture_memory_bytes: 50 * 1024 * 1024,
            max_stutter_ms: 100.0,
            warning_cooldown_secs: 5.0,
            history_capacity: 120,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Key that aborts an in-flight transition.
    pub cancel_key: String,
    /// Key that toggles the performance overlay.
    pub overlay_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            cancel_key: "escape".to_string(),
            overlay_key: "p".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config =
            FolioConfig::from_json(r#"{ "camera": { "transition_secs": 1.5 }, "assets": { "max_retries": 5 } }"#)
                .unwrap();
        assert_eq!(config.camera.transition_secs, 1.5);
        assert_eq!(config.camera.fov_degrees, 50.0);
        assert_eq!(config.assets.max_retries, 5);
        assert_eq!(config.assets.backoff_base_ms, 1000);
        assert_eq!(config.budgets, PerformanceBudget::default());
    }

    #[test]
    fn inverted_fov_range_is_rejected() {
        let err = FolioConfig::from_json(r#"{ "camera": { "min_fov_degrees": 90, "max_fov_degrees": 30 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("min_fov_degrees"), "{err}");
    }

    #[test]
    fn overflowing_durations_and_empty_history_are_rejected() {
        assert!(FolioConfig::from_json(r#"{ "camera": { "transition_secs": 1e40 } }"#).is_err());
        assert!(FolioConfig::from_json(r#"{ "budgets": { "history_capacity": 0 } }"#).is_err());
        assert!(FolioConfig::default().validate().is_ok());
    }
}
