//! The session camera and its animations.
//!
//! [`CameraController`] owns the only [`Camera`]. It runs at most one directed
//! transition at a time and, while none is running, a short parallax drift
//! following the pointer. Both are advanced by [`CameraController::update`] from the
//! frame loop; nothing here reads the clock.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
    time::Duration,
};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Vector3};
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};

use crate::{config::CameraConfig, motion::ReducedMotion};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Acceleration curve of an animation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    Linear,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
}

impl Easing {
    /// Map linear progress in `[0, 1]` onto the curve.
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
        }
    }
}

impl FromStr for Easing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" | "none" => Ok(Easing::Linear),
            "ease-in" | "power2.in" => Ok(Easing::EaseIn),
            "ease-out" | "power2.out" => Ok(Easing::EaseOut),
            "ease-in-out" | "power2.inout" => Ok(Easing::EaseInOut),
            other => Err(anyhow::anyhow!("unknown easing '{other}'")),
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Easing::Linear => "linear",
            Easing::EaseIn => "ease-in",
            Easing::EaseOut => "ease-out",
            Easing::EaseInOut => "ease-in-out",
        })
    }
}

// Unlike `f32::clamp`, tolerates an inverted range (max wins).
fn clamp_fov(degrees: f32, config: &CameraConfig) -> f32 {
    degrees.max(config.min_fov_degrees).min(config.max_fov_degrees)
}

/// A perspective camera looking at a point.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Point3<f32>, target: Point3<f32>, config: &CameraConfig) -> Self {
        Self {
            position,
            target,
            up: Vector3::unit_y(),
            fov: clamp_fov(config.fov_degrees, config),
            aspect: 16.0 / 9.0,
            near: config.near,
            far: config.far,
        }
    }

    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(cgmath::Deg(self.fov), self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection() * self.view()
    }

    pub fn forward(&self) -> Vector3<f32> {
        (self.target - self.position).normalize()
    }
}

/// GPU layout of the camera uniform.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_position: [f32; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view_position: camera.position.to_homogeneous().into(),
            view_proj: camera.view_projection().into(),
        }
    }
}

/// How a directed camera transition ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TweenOutcome {
    /// Reached its destination.
    Completed,
    /// Stopped by `set_position`, `cancel` or `dispose`.
    Cancelled,
    /// Replaced by a newer transition.
    Superseded,
}

/// Per-transition overrides and hooks.
#[derive(Default)]
pub struct TransitionOptions {
    pub duration: Option<Duration>,
    pub easing: Option<Easing>,
    pub on_start: Option<Box<dyn FnOnce()>>,
    /// Receives linear progress in `[0, 1]` after every step.
    pub on_update: Option<Box<dyn FnMut(f32)>>,
    pub on_complete: Option<Box<dyn FnOnce()>>,
}

impl TransitionOptions {
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = Some(easing);
        self
    }

    pub fn on_start(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl FnMut(f32) + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

/// Resolves exactly once with the [`TweenOutcome`] of its transition.
pub struct TransitionHandle {
    rx: oneshot::Receiver<TweenOutcome>,
}

impl Future for TransitionHandle {
    type Output = TweenOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TweenOutcome> {
        Pin::new(&mut self.rx)
            .poll(cx)
            // The controller went away with the transition still running.
            .map(|outcome| outcome.unwrap_or(TweenOutcome::Cancelled))
    }
}

struct Tween {
    from_position: Point3<f32>,
    to_position: Point3<f32>,
    from_target: Point3<f32>,
    to_target: Point3<f32>,
    duration: Duration,
    elapsed: Duration,
    easing: Easing,
}

impl Tween {
    /// Linear progress after advancing by `dt`.
    fn advance(&mut self, dt: Duration) -> f32 {
        self.elapsed += dt;
        if self.duration.is_zero() {
            1.0
        } else {
            (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        }
    }

    fn sample(&self, t: f32) -> (Point3<f32>, Point3<f32>) {
        let k = self.easing.apply(t);
        (
            lerp(self.from_position, self.to_position, k),
            lerp(self.from_target, self.to_target, k),
        )
    }
}

fn lerp(a: Point3<f32>, b: Point3<f32>, t: f32) -> Point3<f32> {
    Point3::from_vec(a.to_vec() + (b - a) * t)
}

struct DirectedTransition {
    tween: Tween,
    on_update: Option<Box<dyn FnMut(f32)>>,
    on_complete: Option<Box<dyn FnOnce()>>,
    done: Option<oneshot::Sender<TweenOutcome>>,
}

impl DirectedTransition {
    fn finish(mut self, outcome: TweenOutcome) {
        if outcome == TweenOutcome::Completed
            && let Some(on_complete) = self.on_complete.take()
        {
            on_complete();
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}

/// Owns the camera and animates it.
pub struct CameraController {
    camera: Camera,
    config: CameraConfig,
    motion: ReducedMotion,
    transition: Option<DirectedTransition>,
    parallax: Option<Tween>,
    /// Where the camera rests without parallax.
    base_position: Point3<f32>,
}

impl CameraController {
    pub fn new(camera: Camera, config: CameraConfig, motion: ReducedMotion) -> Self {
        let base_position = camera.position;
        Self {
            camera,
            config,
            motion,
            transition: None,
            parallax: None,
            base_position,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    /// Linear progress of the active transition.
    pub fn transition_progress(&self) -> Option<f32> {
        self.transition.as_ref().map(|t| {
            if t.tween.duration.is_zero() {
                0.0
            } else {
                (t.tween.elapsed.as_secs_f32() / t.tween.duration.as_secs_f32()).min(1.0)
            }
        })
    }

    /// Destination of the active transition as `(position, target)`.
    pub fn transition_destination(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        self.transition
            .as_ref()
            .map(|t| (t.tween.to_position, t.tween.to_target))
    }

    /// Animate towards `position` looking at `target`.
    ///
    /// A transition that is still running resolves as [`TweenOutcome::Superseded`]
    /// and any parallax drift stops.
    pub fn transition_to(
        &mut self,
        position: Point3<f32>,
        target: Point3<f32>,
        options: TransitionOptions,
    ) -> TransitionHandle {
        if let Some(previous) = self.transition.take() {
            log::debug!("Superseding running camera transition");
            previous.finish(TweenOutcome::Superseded);
        }
        self.parallax = None;

        let duration = self
            .motion
            .adjusted_duration(options.duration.unwrap_or_else(|| self.config.transition_duration()));
        let (tx, rx) = oneshot::channel();
        let TransitionOptions {
            easing,
            on_start,
            on_update,
            on_complete,
            ..
        } = options;
        self.transition = Some(DirectedTransition {
            tween: Tween {
                from_position: self.camera.position,
                to_position: position,
                from_target: self.camera.target,
                to_target: target,
                duration,
                elapsed: Duration::ZERO,
                easing: easing.unwrap_or(self.config.easing),
            },
            on_update,
            on_complete,
            done: Some(tx),
        });
        log::debug!("Camera transition to {position:?} over {duration:?}");
        if let Some(on_start) = on_start {
            on_start();
        }
        TransitionHandle { rx }
    }

    /// Jump to `position`/`target` immediately, cancelling any animation.
    pub fn set_position(&mut self, position: Point3<f32>, target: Point3<f32>) {
        self.cancel();
        self.parallax = None;
        self.camera.position = position;
        self.camera.target = target;
        self.base_position = position;
    }

    /// Stop the active transition where it is. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.transition.take() {
            Some(transition) => {
                transition.finish(TweenOutcome::Cancelled);
                self.base_position = self.camera.position;
                true
            }
            None => false,
        }
    }

    /// Drift towards an offset proportional to the pointer position (NDC).
    ///
    /// Ignored while a directed transition runs. Replaces the previous drift.
    pub fn apply_parallax(&mut self, pointer_x: f32, pointer_y: f32, strength: f32) -> bool {
        if self.transition.is_some() {
            return false;
        }
        let goal = self.base_position + Vector3::new(pointer_x * strength, pointer_y * strength, 0.0);
        if self.parallax.as_ref().is_some_and(|p| p.to_position == goal) || self.camera.position == goal {
            return true;
        }
        self.parallax = Some(Tween {
            from_position: self.camera.position,
            to_position: goal,
            from_target: self.camera.target,
            to_target: self.camera.target,
            duration: self.motion.adjusted_duration(self.config.parallax_duration()),
            elapsed: Duration::ZERO,
            easing: Easing::EaseOut,
        });
        true
    }

    /// Advance animations by `dt`.
    pub fn update(&mut self, dt: Duration) {
        if let Some(transition) = self.transition.as_mut() {
            let t = transition.tween.advance(dt);
            let (position, target) = transition.tween.sample(t);
            self.camera.position = position;
            self.camera.target = target;
            if let Some(on_update) = transition.on_update.as_mut() {
                on_update(t);
            }
            if t >= 1.0
                && let Some(transition) = self.transition.take()
            {
                self.base_position = transition.tween.to_position;
                transition.finish(TweenOutcome::Completed);
            }
            return;
        }
        if let Some(parallax) = self.parallax.as_mut() {
            let t = parallax.advance(dt);
            self.camera.position = parallax.sample(t).0;
            if t >= 1.0 {
                self.parallax = None;
            }
        }
    }

    pub fn update_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.camera.aspect = width as f32 / height as f32;
        }
    }

    pub fn set_fov(&mut self, degrees: f32) {
        self.camera.fov = clamp_fov(degrees, &self.config);
    }

    pub fn parallax_strength(&self) -> f32 {
        self.config.parallax_strength
    }

    pub fn dispose(&mut self) {
        self.cancel();
        self.parallax = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easing_curves_hit_endpoints() {
        for easing in [Easing::Linear, Easing::EaseIn, Easing::EaseOut, Easing::EaseInOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert_eq!(easing.apply(1.0), 1.0);
        }
        assert_eq!("power2.inOut".parse::<Easing>().unwrap(), Easing::EaseInOut);
    }
}
