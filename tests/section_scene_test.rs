mod common;

use std::{rc::Rc, time::Duration};

use cgmath::Point3;
use flow_folio::{
    camera::Camera,
    config::CameraConfig,
    content::ContentDocument,
    resources::dispose::ResourceDisposer,
    scene::{
        FrameContext, Scene, SceneContext,
        section::{SectionScene, descriptors},
    },
};
use futures::executor::LocalPool;

use crate::common::test_utils::{FakeSource, full_motion, loader, manual_clock, release_log};

const DOCUMENT: &str = r#"{
    "sections": [
        { "id": "intro", "camera": { "position": [0, 0, 10], "target": [0, 0, 0] } },
        {
            "id": "work",
            "landing": true,
            "camera": { "position": [12, 1, 8], "target": [12, 0, 0] },
            "projects": [
                { "title": "Orbit", "thumbnail": "img/orbit.png", "model": "models/orbit.glb", "featured": true },
                { "title": "Relay", "thumbnail": "img/relay.png", "model": "models/relay.glb" },
                { "title": "Notes", "thumbnail": "img/notes.png" }
            ]
        }
    ]
}"#;

#[test]
fn descriptors_follow_the_document() {
    let document = ContentDocument::from_json(DOCUMENT).unwrap();
    let descriptors = descriptors(&document);

    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].id.as_str(), "intro");
    assert!(!descriptors[0].is_landing);
    assert!(descriptors[1].is_landing);
    assert_eq!(descriptors[1].camera_position, Point3::new(12.0, 1.0, 8.0));
    assert_eq!(descriptors[1].camera_target, Point3::new(12.0, 0.0, 0.0));
    assert_eq!((descriptors[1].factory)().id().as_str(), "work");
    assert_eq!(document.landing().map(|s| s.id.as_str()), Some("work"));
}

#[test]
fn init_places_cached_models_and_tolerates_missing_assets() {
    let (_time, clock) = manual_clock();
    let log = release_log();
    let source = Rc::new(FakeSource::new(&clock, &log));
    source.fail_always("models/relay.glb");
    let ctx = SceneContext {
        assets: loader(&source, &clock, 1),
        clock: clock.clone(),
        motion: full_motion(),
        gpu: None,
    };
    let document = ContentDocument::from_json(DOCUMENT).unwrap();
    let section = document.section("work").unwrap().clone();
    let mut scene = SectionScene::new(section);
    let mut pool = LocalPool::new();

    pool.run_until(scene.init(ctx.clone())).unwrap();
    pool.run_until(scene.init(ctx.clone())).unwrap();

    assert_eq!(source.fetch_count("models/orbit.glb"), 1);
    assert_eq!(source.fetch_count("img/notes.png"), 1);
    let showcase = scene.root().children.iter().find(|c| c.name == "showcase").unwrap();
    assert_eq!(showcase.children.len(), 1);
    assert_eq!(showcase.children[0].instances[0].url(), "models/orbit.glb");
    // Headless: no cards without a GPU.
    assert!(!scene.root().children.iter().any(|c| c.name == "cards"));

    scene.mount();
    assert!(scene.is_mounted());
    let camera = Camera::new(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0), &CameraConfig::default());
    scene.update(&FrameContext {
        delta: Duration::from_millis(16),
        total: Duration::from_secs(2),
        input: None,
        camera: &camera,
    });

    scene.dispose();
    ResourceDisposer::dispose(scene.root_mut());
    assert!(!scene.is_mounted());
    let model = ctx.assets.cached_model("models/orbit.glb").unwrap();
    assert!(!model.is_disposed());
}
