//! Frame statistics and budget checks.

use std::{collections::VecDeque, fmt, time::Duration};

use crate::{config::PerformanceBudget, render::RenderInfo};

/// Per-texture estimate used when the renderer cannot report exact bytes
/// (one 1024² RGBA8 image).
pub const ESTIMATED_TEXTURE_BYTES: u64 = 1024 * 1024 * 4;

/// Which draw-call budget applies to the mounted scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SceneBudget {
    Landing,
    #[default]
    Typical,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BudgetViolation {
    LowFps { fps: f32, target: f32 },
    SlowFrame { frame_ms: f32, max_ms: f32 },
    Stutter { frame_ms: f32, max_ms: f32 },
    DrawCalls { draw_calls: u32, max: u32 },
    TextureMemory { bytes: u64, max: u64 },
}

impl fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetViolation::LowFps { fps, target } => write!(f, "average FPS {fps:.1} below target {target:.0}"),
            BudgetViolation::SlowFrame { frame_ms, max_ms } => {
                write!(f, "frame took {frame_ms:.2}ms (budget {max_ms:.2}ms)")
            }
            BudgetViolation::Stutter { frame_ms, max_ms } => write!(f, "stutter of {frame_ms:.0}ms (max {max_ms:.0}ms)"),
            BudgetViolation::DrawCalls { draw_calls, max } => write!(f, "{draw_calls} draw calls (max {max})"),
            BudgetViolation::TextureMemory { bytes, max } => write!(
                f,
                "~{:.1} MiB of textures (max {:.1} MiB)",
                *bytes as f64 / (1024.0 * 1024.0),
                *max as f64 / (1024.0 * 1024.0)
            ),
        }
    }
}

/// Derived statistics after the latest [`PerformanceMonitor::update`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerformanceStats {
    pub current_fps: f32,
    pub average_fps: f32,
    pub median_fps: f32,
    pub min_fps: f32,
    pub max_fps: f32,
    pub frame_time_ms: f32,
    pub draw_calls: u32,
    pub triangles: u64,
    pub geometries: usize,
    pub textures: usize,
    pub programs: usize,
    pub texture_memory_bytes: u64,
}

/// Rolling frame statistics, sampled once per frame.
///
/// Time is passed in rather than read, so the monitor works the same on both
/// targets and under a manual clock.
pub struct PerformanceMonitor {
    budget: PerformanceBudget,
    scene_budget: SceneBudget,
    frame_times: VecDeque<f32>,
    fps_history: VecDeque<f32>,
    last_update: Option<Duration>,
    last_warning: Option<Duration>,
    stats: PerformanceStats,
}

impl PerformanceMonitor {
    pub fn new(budget: PerformanceBudget) -> Self {
        let capacity = budget.history_capacity.max(1);
        Self {
            budget,
            scene_budget: SceneBudget::default(),
            frame_times: VecDeque::with_capacity(capacity),
            fps_history: VecDeque::with_capacity(capacity),
            last_update: None,
            last_warning: None,
            stats: PerformanceStats::default(),
        }
    }

    pub fn set_scene_budget(&mut self, scene_budget: SceneBudget) {
        self.scene_budget = scene_budget;
    }

    /// Record a frame that ended at `now` and check it against the budget.
    ///
    /// Returns the violations that were reported this call. At most one burst is
    /// reported per cooldown window; everything in between is only counted in the
    /// statistics. The first call only establishes the time origin.
    pub fn update(&mut self, now: Duration, info: &RenderInfo) -> Vec<BudgetViolation> {
        self.record_render_info(info);

        let Some(last) = self.last_update.replace(now) else {
            return Vec::new();
        };
        let frame_ms = now.saturating_sub(last).as_secs_f32() * 1000.0;
        if frame_ms <= 0.0 {
            return Vec::new();
        }
        let fps = 1000.0 / frame_ms;

        let capacity = self.budget.history_capacity.max(1);
        if self.frame_times.len() == capacity {
            self.frame_times.pop_front();
            self.fps_history.pop_front();
        }
        self.frame_times.push_back(frame_ms);
        self.fps_history.push_back(fps);
        self.recompute(frame_ms, fps);

        let violations = self.check_budget(frame_ms);
        if violations.is_empty() {
            return violations;
        }
        let cooldown = Duration::from_secs_f32(self.budget.warning_cooldown_secs.max(0.0));
        if self
            .last_warning
            .is_some_and(|warned| now.saturating_sub(warned) < cooldown)
        {
            return Vec::new();
        }
        self.last_warning = Some(now);
        for violation in &violations {
            log::warn!("Performance budget exceeded: {violation}");
        }
        violations
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        self.frame_times.clear();
        self.fps_history.clear();
        self.last_update = None;
        self.last_warning = None;
        self.stats = PerformanceStats::default();
    }

    /// Skip the gap of a paused loop without recording it as a stutter.
    pub fn resume(&mut self) {
        self.last_update = None;
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn fps_history(&self) -> impl Iterator<Item = f32> + '_ {
        self.fps_history.iter().copied()
    }

    pub fn frame_times(&self) -> impl Iterator<Item = f32> + '_ {
        self.frame_times.iter().copied()
    }

    pub fn sample_count(&self) -> usize {
        self.fps_history.len()
    }

    fn record_render_info(&mut self, info: &RenderInfo) {
        self.stats.draw_calls = info.draw_calls;
        self.stats.triangles = info.triangles;
        self.stats.geometries = info.geometries;
        self.stats.textures = info.textures;
        self.stats.programs = info.programs;
        self.stats.texture_memory_bytes = info
            .texture_bytes
            .unwrap_or(info.textures as u64 * ESTIMATED_TEXTURE_BYTES);
    }

    fn recompute(&mut self, frame_ms: f32, fps: f32) {
        let mut sorted: Vec<f32> = self.fps_history.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        self.stats.current_fps = fps;
        self.stats.frame_time_ms = frame_ms;
        self.stats.average_fps = sorted.iter().sum::<f32>() / n as f32;
        self.stats.median_fps = median;
        self.stats.min_fps = sorted[0];
        self.stats.max_fps = sorted[n - 1];
    }

    fn check_budget(&self, frame_ms: f32) -> Vec<BudgetViolation> {
        let budget = &self.budget;
        let mut violations = Vec::new();
        // Averages over a handful of frames are too noisy to complain about.
        if self.fps_history.len() >= budget.history_capacity.max(1) / 2
            && self.stats.average_fps < budget.target_fps * 0.9
        {
            violations.push(BudgetViolation::LowFps {
                fps: self.stats.average_fps,
                target: budget.target_fps,
            });
        }
        if frame_ms > budget.max_stutter_ms {
            violations.push(BudgetViolation::Stutter {
                frame_ms,
                max_ms: budget.max_stutter_ms,
            });
        } else if frame_ms > budget.max_frame_time_ms {
            violations.push(BudgetViolation::SlowFrame {
                frame_ms,
                max_ms: budget.max_frame_time_ms,
            });
        }
        let max_draw_calls = match self.scene_budget {
            SceneBudget::Landing => budget.max_draw_calls_landing,
            SceneBudget::Typical => budget.max_draw_calls_typical,
        };
        if self.stats.draw_calls > max_draw_calls {
            violations.push(BudgetViolation::DrawCalls {
                draw_calls: self.stats.draw_calls,
                max: max_draw_calls,
            });
        }
        if self.stats.texture_memory_bytes > budget.max_texture_memory_bytes {
            violations.push(BudgetViolation::TextureMemory {
                bytes: self.stats.texture_memory_bytes,
                max: budget.max_texture_memory_bytes,
            });
        }
        violations
    }
}

impl fmt::Display for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(
            f,
            "FPS: {:.0} (avg {:.0}, median {:.0}, min {:.0}, max {:.0})",
            s.current_fps, s.average_fps, s.median_fps, s.min_fps, s.max_fps
        )?;
        writeln!(f, "Frame: {:.2}ms", s.frame_time_ms)?;
        writeln!(f, "Draw calls: {}  Triangles: {}", s.draw_calls, s.triangles)?;
        writeln!(
            f,
            "Geometries: {}  Textures: {}  Programs: {}",
            s.geometries, s.textures, s.programs
        )?;
        write!(f, "Texture memory: ~{:.1} MiB", s.texture_memory_bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_window_averages_middle_samples() {
        let mut monitor = PerformanceMonitor::new(PerformanceBudget::default());
        let info = RenderInfo::default();
        let mut now = Duration::ZERO;
        monitor.update(now, &info);
        for ms in [10, 20, 25, 50] {
            now += Duration::from_millis(ms);
            monitor.update(now, &info);
        }
        // 100, 50, 40, 20 fps
        assert!((monitor.stats().median_fps - 45.0).abs() < 0.01);
        assert!((monitor.stats().min_fps - 20.0).abs() < 0.01);
        assert!((monitor.stats().max_fps - 100.0).abs() < 0.01);
    }

    #[test]
    fn texture_memory_falls_back_to_estimate() {
        let mut monitor = PerformanceMonitor::new(PerformanceBudget::default());
        monitor.update(
            Duration::ZERO,
            &RenderInfo {
                textures: 3,
                ..Default::default()
            },
        );
        assert_eq!(monitor.stats().texture_memory_bytes, 3 * ESTIMATED_TEXTURE_BYTES);
    }
}
