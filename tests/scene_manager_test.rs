mod common;

use std::time::Duration;

use cgmath::Point3;
use flow_folio::{
    FolioError,
    config::FolioConfig,
    input::InputEvent,
    preferences::MemoryStore,
    scene::{Navigation, RejectReason, SceneId, SceneState},
};

use crate::common::test_utils::{Harness, MockSceneSpec, released};

const FRAME: Duration = Duration::from_millis(16);

fn started(harness: &mut Harness) {
    harness.manager.start("landing").unwrap();
    harness.step(FRAME);
    assert_eq!(harness.manager.state(), SceneState::Idle(Some(SceneId::new("landing"))));
}

fn current(harness: &Harness) -> Option<String> {
    harness.manager.current_scene().map(|scene| scene.id().as_str().to_string())
}

#[test]
fn start_initializes_and_mounts_the_first_scene() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());

    h.manager.start("landing").unwrap();
    assert_eq!(h.manager.state(), SceneState::Initializing(SceneId::new("landing")));
    assert_eq!(
        h.manager.transition_to("landing"),
        Navigation::Rejected(RejectReason::Initializing)
    );
    h.step(FRAME);

    assert_eq!(landing.init_invocations(), 1);
    assert_eq!(landing.mount_invocations(), 1);
    assert_eq!(h.manager.current_scene_id(), Some(&SceneId::new("landing")));
    assert_eq!(h.renderer.last_root.borrow().as_deref(), Some("landing.root"));
    assert!(h.manager.start("landing").is_err());
}

#[test]
fn transition_swaps_scenes_and_animates_the_camera() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    let about = h.register(MockSceneSpec::new("about", 20.0).init_delay(Duration::from_millis(50)));
    h.register(MockSceneSpec::new("contact", -20.0));
    started(&mut h);

    assert_eq!(h.manager.transition_to("about"), Navigation::Started);
    assert_eq!(
        h.manager.transition_to("contact"),
        Navigation::Rejected(RejectReason::AlreadyTransitioning)
    );
    assert!(h.manager.is_transitioning());

    let mut progress = vec![h.manager.transition_state().transition_progress];
    let mut frames = 0;
    while h.manager.is_transitioning() && frames < 200 {
        h.step(FRAME);
        frames += 1;
        progress.push(h.manager.transition_state().transition_progress);
    }

    // 50ms of init plus the 2s camera move.
    assert!(frames > 125, "finished after {frames} frames");
    assert!(!h.manager.is_transitioning());
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]), "{progress:?}");
    assert_eq!(progress.last().copied(), Some(1.0));

    let state = h.manager.transition_state();
    assert_eq!(state.current_scene_id, Some(SceneId::new("about")));
    assert_eq!(state.previous_scene_id, Some(SceneId::new("landing")));
    assert_eq!(current(&h).as_deref(), Some("about"));
    assert_eq!(h.manager.camera().camera().position, Point3::new(20.0, 0.0, 10.0));
    assert_eq!(h.manager.camera().camera().target, Point3::new(20.0, 0.0, 0.0));

    assert_eq!(landing.dispose_invocations(), 1);
    assert_eq!(about.init_invocations(), 1);
    assert_eq!(about.mount_invocations(), 1);
    let log = released(&h.log);
    assert_eq!(log.iter().filter(|label| label.starts_with("landing.body")).count(), 3);
    assert!(!log.iter().any(|label| label.starts_with("about")));
}

#[test]
fn navigation_to_the_current_or_an_unknown_scene_is_rejected() {
    let mut h = Harness::new();
    h.register(MockSceneSpec::new("landing", 0.0).landing());
    started(&mut h);

    assert_eq!(
        h.manager.transition_to("landing"),
        Navigation::Rejected(RejectReason::AlreadyActive)
    );
    assert_eq!(
        h.manager.transition_to("nowhere"),
        Navigation::Rejected(RejectReason::UnknownScene)
    );
    assert!(!h.manager.is_transitioning());
}

#[test]
fn failed_init_keeps_the_current_scene() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    let broken = h.register(MockSceneSpec::new("broken", 20.0).failing());
    started(&mut h);

    assert_eq!(h.manager.transition_to("broken"), Navigation::Started);
    h.step(FRAME);

    assert_eq!(h.manager.state(), SceneState::Idle(Some(SceneId::new("landing"))));
    assert_eq!(current(&h).as_deref(), Some("landing"));
    assert_eq!(landing.dispose_invocations(), 0);
    assert_eq!(broken.dispose_invocations(), 1);
    assert_eq!(broken.mount_invocations(), 0);

    let notices = h.manager.take_notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(&notices[0], FolioError::SceneInit { scene, .. } if scene.as_str() == "broken"));
    assert!(h.manager.take_notices().is_empty());
}

#[test]
fn cancel_before_the_swap_stays_on_the_current_scene() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    let about = h.register(MockSceneSpec::new("about", 20.0).init_delay(Duration::from_millis(50)));
    started(&mut h);

    h.manager.transition_to("about");
    h.step(FRAME);
    assert!(h.manager.cancel_transition());
    assert!(!h.manager.cancel_transition());

    assert_eq!(h.manager.state(), SceneState::Idle(Some(SceneId::new("landing"))));
    assert_eq!(about.init_invocations(), 1);
    assert_eq!(about.mount_invocations(), 0);
    assert_eq!(about.dispose_invocations(), 1);

    h.step(Duration::from_millis(100));
    assert_eq!(current(&h).as_deref(), Some("landing"));
    assert_eq!(landing.dispose_invocations(), 0);
    assert_eq!(h.manager.camera().camera().position, Point3::new(0.0, 0.0, 10.0));
}

#[test]
fn cancel_key_after_the_swap_jumps_to_the_destination() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    h.register(MockSceneSpec::new("about", 20.0));
    started(&mut h);

    h.manager.transition_to("about");
    h.step(FRAME);
    h.step(FRAME);
    assert!(h.manager.is_transitioning());
    assert_eq!(current(&h).as_deref(), Some("about"));
    assert_eq!(landing.dispose_invocations(), 1);
    assert_ne!(h.manager.camera().camera().position, Point3::new(20.0, 0.0, 10.0));

    assert!(h.manager.handle_input(&InputEvent::KeyPressed("Escape".into())));
    h.step(FRAME);

    assert!(!h.manager.is_transitioning());
    assert_eq!(h.manager.state(), SceneState::Idle(Some(SceneId::new("about"))));
    assert_eq!(h.manager.camera().camera().position, Point3::new(20.0, 0.0, 10.0));
    assert_eq!(h.manager.transition_state().transition_progress, 1.0);
}

#[test]
fn scenes_get_no_input_while_transitioning() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    h.register(MockSceneSpec::new("about", 20.0).init_delay(Duration::from_millis(50)));
    started(&mut h);
    assert_eq!(landing.updates_with_input(), 1);

    h.manager.transition_to("about");
    h.step(FRAME);
    h.step(FRAME);

    assert_eq!(landing.update_invocations(), 3);
    assert_eq!(landing.updates_with_input(), 1);
}

#[test]
fn resize_reaches_renderer_input_and_scene() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    started(&mut h);
    assert_eq!(landing.last_resize(), Some((1280, 720)));

    h.manager.resize(800, 400);
    h.manager.resize(0, 400);

    assert_eq!(*h.renderer.sizes.borrow(), vec![(800, 400)]);
    assert_eq!(landing.last_resize(), Some((800, 400)));
    assert_eq!(h.manager.camera().camera().aspect, 2.0);

    h.manager.handle_input(&InputEvent::PointerMoved { x: 800.0, y: 0.0 });
    assert_eq!(h.manager.input().pointer().x, 1.0);
    assert_eq!(h.manager.input().pointer().y, 1.0);
}

#[test]
fn hidden_manager_skips_frames() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    started(&mut h);

    h.manager.set_visible(false);
    h.step(FRAME);
    h.step(FRAME);
    assert_eq!(h.renderer.frames.get(), 1);
    assert_eq!(landing.update_invocations(), 1);

    h.manager.set_visible(true);
    h.step(FRAME);
    assert_eq!(h.renderer.frames.get(), 2);
}

#[test]
fn lost_context_suspends_rendering_until_restored() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    h.register(MockSceneSpec::new("about", 20.0));
    started(&mut h);

    h.renderer.lost.set(true);
    h.step(FRAME);
    assert!(h.manager.is_context_lost());
    assert!(matches!(h.manager.take_notices().as_slice(), [FolioError::ContextLost]));
    assert_eq!(
        h.manager.transition_to("about"),
        Navigation::Rejected(RejectReason::ContextLost)
    );

    let updates = landing.update_invocations();
    h.step(FRAME);
    assert_eq!(landing.update_invocations(), updates);

    h.renderer.lost.set(false);
    h.manager.on_context_restored(None);
    assert_eq!(h.manager.state(), SceneState::Initializing(SceneId::new("landing")));
    assert_eq!(landing.dispose_invocations(), 1);

    h.step(FRAME);
    assert_eq!(h.manager.state(), SceneState::Idle(Some(SceneId::new("landing"))));
    assert_eq!(landing.init_invocations(), 2);
    assert_eq!(landing.mount_invocations(), 2);
    assert_eq!(h.renderer.frames.get(), 2);
}

#[test]
fn visited_sections_are_remembered() {
    let mut h = Harness::with_store(Box::new(MemoryStore::default()));
    h.register(MockSceneSpec::new("landing", 0.0).landing());
    h.register(MockSceneSpec::new("about", 20.0));
    started(&mut h);

    h.manager.transition_to("about");
    h.settle(200);
    h.manager.set_reduced_motion_override(Some(true));

    let preferences = h.manager.preferences().unwrap();
    assert_eq!(preferences.visited_sections, vec!["landing", "about"]);
    assert!(preferences.last_visit.is_some());
    assert_eq!(preferences.reduced_motion_override, Some(true));
    assert!(h.manager.context().motion.prefers_reduced_motion());
}

#[test]
fn teardown_disposes_the_current_scene_and_listeners() {
    let mut h = Harness::new();
    let landing = h.register(MockSceneSpec::new("landing", 0.0).landing());
    started(&mut h);

    h.manager.teardown();

    assert_eq!(landing.dispose_invocations(), 1);
    assert_eq!(h.manager.input().listener_count(), 0);
    assert!(h.manager.current_scene().is_none());
}

#[test]
fn platform_motion_changes_reach_the_running_manager() {
    let mut h = Harness::new();
    h.register(MockSceneSpec::new("landing", 0.0).landing());
    started(&mut h);
    assert_eq!(h.motion.attaches.get(), 1);

    h.motion.change(true);
    assert!(h.manager.context().motion.prefers_reduced_motion());

    h.manager.teardown();
    assert_eq!(h.motion.detaches.get(), 1);
}

#[test]
fn invalid_config_is_rejected_before_the_manager_exists() {
    let err = FolioConfig::from_json(r#"{ "camera": { "min_fov_degrees": 90, "max_fov_degrees": 30 } }"#).unwrap_err();
    assert!(err.to_string().contains("max_fov_degrees"), "{err}");
}
