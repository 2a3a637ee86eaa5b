mod common;

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use cgmath::Point3;
use flow_folio::{
    camera::{Camera, CameraController, TransitionOptions, TweenOutcome},
    config::CameraConfig,
    motion::ReducedMotion,
};
use futures::FutureExt;

use crate::common::test_utils::{TestMotionQuery, full_motion};

fn controller(motion: ReducedMotion) -> CameraController {
    let config = CameraConfig::default();
    let camera = Camera::new(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0), &config);
    CameraController::new(camera, config, motion)
}

#[test]
fn transition_reaches_its_destination_and_completes() {
    let mut camera = controller(full_motion());
    let started = Rc::new(Cell::new(false));
    let completed = Rc::new(Cell::new(false));
    let updates = Rc::new(RefCell::new(Vec::new()));
    let options = {
        let (started, completed, updates) = (started.clone(), completed.clone(), updates.clone());
        TransitionOptions::default()
            .on_start(move || started.set(true))
            .on_update(move |t| updates.borrow_mut().push(t))
            .on_complete(move || completed.set(true))
    };

    let mut handle = camera.transition_to(Point3::new(10.0, 2.0, 10.0), Point3::new(10.0, 0.0, 0.0), options);
    assert!(started.get());
    assert!(camera.is_transitioning());

    camera.update(Duration::from_secs(1));
    assert_eq!(camera.transition_progress(), Some(0.5));
    assert!((&mut handle).now_or_never().is_none());
    assert!(!completed.get());

    camera.update(Duration::from_secs(1));
    assert_eq!(handle.now_or_never(), Some(TweenOutcome::Completed));
    assert!(completed.get());
    assert!(!camera.is_transitioning());
    assert_eq!(camera.camera().position, Point3::new(10.0, 2.0, 10.0));
    assert_eq!(camera.camera().target, Point3::new(10.0, 0.0, 0.0));
    assert_eq!(*updates.borrow(), vec![0.5, 1.0]);
}

#[test]
fn newer_transition_supersedes_the_running_one() {
    let mut camera = controller(full_motion());
    let first_completed = Rc::new(Cell::new(false));
    let first = {
        let first_completed = first_completed.clone();
        camera.transition_to(
            Point3::new(5.0, 0.0, 10.0),
            Point3::new(5.0, 0.0, 0.0),
            TransitionOptions::default().on_complete(move || first_completed.set(true)),
        )
    };
    camera.update(Duration::from_millis(500));

    let second = camera.transition_to(
        Point3::new(-5.0, 0.0, 10.0),
        Point3::new(-5.0, 0.0, 0.0),
        TransitionOptions::default().duration(Duration::from_millis(100)),
    );

    assert_eq!(first.now_or_never(), Some(TweenOutcome::Superseded));
    camera.update(Duration::from_millis(100));
    assert_eq!(second.now_or_never(), Some(TweenOutcome::Completed));
    assert!(!first_completed.get());
    assert_eq!(camera.camera().position, Point3::new(-5.0, 0.0, 10.0));
}

#[test]
fn cancel_stops_the_camera_where_it_is() {
    let mut camera = controller(full_motion());
    let handle = camera.transition_to(
        Point3::new(10.0, 0.0, 10.0),
        Point3::new(10.0, 0.0, 0.0),
        TransitionOptions::default(),
    );
    camera.update(Duration::from_millis(500));
    let midway = camera.camera().position;

    assert!(camera.cancel());
    assert!(!camera.cancel());
    camera.update(Duration::from_secs(2));

    assert_eq!(handle.now_or_never(), Some(TweenOutcome::Cancelled));
    assert_eq!(camera.camera().position, midway);
    assert!(midway.x > 0.0 && midway.x < 10.0);
}

#[test]
fn dropped_controller_resolves_handles_as_cancelled() {
    let mut camera = controller(full_motion());
    let handle = camera.transition_to(
        Point3::new(10.0, 0.0, 10.0),
        Point3::new(10.0, 0.0, 0.0),
        TransitionOptions::default(),
    );
    drop(camera);
    assert_eq!(handle.now_or_never(), Some(TweenOutcome::Cancelled));
}

#[test]
fn reduced_motion_shortens_transitions() {
    let query = TestMotionQuery::default();
    query.matches.set(true);
    let mut camera = controller(ReducedMotion::new(Box::new(query)));

    let handle = camera.transition_to(
        Point3::new(10.0, 0.0, 10.0),
        Point3::new(10.0, 0.0, 0.0),
        TransitionOptions::default(),
    );
    camera.update(Duration::from_millis(20));

    assert_eq!(handle.now_or_never(), Some(TweenOutcome::Completed));
    assert_eq!(camera.camera().position, Point3::new(10.0, 0.0, 10.0));
}

#[test]
fn parallax_drifts_towards_the_pointer_only_when_idle() {
    let mut camera = controller(full_motion());
    assert!(camera.apply_parallax(1.0, -1.0, 0.5));
    camera.update(Duration::from_secs(1));
    assert_eq!(camera.camera().position, Point3::new(0.5, -0.5, 10.0));

    // Offsets are relative to the resting position, not cumulative.
    assert!(camera.apply_parallax(1.0, -1.0, 0.5));
    camera.update(Duration::from_secs(1));
    assert_eq!(camera.camera().position, Point3::new(0.5, -0.5, 10.0));

    let _handle = camera.transition_to(
        Point3::new(10.0, 0.0, 10.0),
        Point3::new(10.0, 0.0, 0.0),
        TransitionOptions::default(),
    );
    assert!(!camera.apply_parallax(-1.0, 1.0, 0.5));
}

#[test]
fn field_of_view_is_clamped() {
    let mut camera = controller(full_motion());
    camera.set_fov(10.0);
    assert_eq!(camera.camera().fov, 30.0);
    camera.set_fov(120.0);
    assert_eq!(camera.camera().fov, 90.0);
    camera.update_aspect(1600, 800);
    assert_eq!(camera.camera().aspect, 2.0);
}
