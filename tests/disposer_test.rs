mod common;

use std::rc::Rc;

use flow_folio::resources::{
    BASE_COLOR_MAP, Geometry, Material, MaterialProperty, Mesh, Model, Resource, SceneNode, dispose::ResourceDisposer,
};

use crate::common::test_utils::{MockHandle, mock_geometry, mock_node, mock_texture, release_log, released};

#[test]
fn children_are_released_before_their_parents() {
    let log = release_log();
    let mut grandchild = mock_node("grand", &log);
    grandchild.add_child(SceneNode::new("empty"));
    let mut child = mock_node("child", &log);
    child.add_child(grandchild);
    let mut root = mock_node("root", &log);
    root.add_child(child);

    ResourceDisposer::dispose(&mut root);

    assert_eq!(
        released(&log),
        vec![
            "grand.geom",
            "grand.tex",
            "grand.mat",
            "child.geom",
            "child.tex",
            "child.mat",
            "root.geom",
            "root.tex",
            "root.mat",
        ]
    );
    assert!(root.is_disposed());
    assert!(root.children.is_empty());
}

#[test]
fn disposing_twice_releases_nothing_new() {
    let log = release_log();
    let mut root = mock_node("root", &log);
    root.add_child(mock_node("child", &log));

    ResourceDisposer::dispose(&mut root);
    let first = released(&log).len();
    ResourceDisposer::dispose(&mut root);

    assert_eq!(first, 6);
    assert_eq!(released(&log).len(), first);
}

#[test]
fn texture_shared_by_two_materials_is_released_once() {
    let log = release_log();
    let texture = mock_texture("shared.tex", &log);
    let mut root = SceneNode::new("root");
    for name in ["left", "right"] {
        let material = Material::new(name).with_property(BASE_COLOR_MAP, MaterialProperty::Texture(texture.clone()));
        root.add_child(SceneNode::new(name).with_mesh(Mesh {
            geometry: mock_geometry(&format!("{name}.geom"), &log),
            material: Rc::new(material),
        }));
    }

    ResourceDisposer::dispose(&mut root);

    let log = released(&log);
    assert_eq!(log.iter().filter(|label| *label == "shared.tex").count(), 1);
    assert!(texture.is_disposed());
}

#[test]
fn cache_owned_textures_survive_their_material() {
    let log = release_log();
    let cached = mock_texture("cached.tex", &log);
    let material = Material::new("card").with_property(BASE_COLOR_MAP, MaterialProperty::SharedTexture(cached.clone()));
    let mut card = SceneNode::new("card").with_mesh(Mesh {
        geometry: mock_geometry("card.geom", &log),
        material: Rc::new(material),
    });

    ResourceDisposer::dispose(&mut card);

    assert_eq!(released(&log), vec!["card.geom"]);
    assert!(!cached.is_disposed());
}

#[test]
fn instanced_models_are_detached_not_freed() {
    let log = release_log();
    let model = Rc::new(Model::new("models/chair.glb", mock_node("chair", &log)));
    let mut holder = SceneNode::new("holder");
    holder.add_instance(model.clone());

    ResourceDisposer::dispose(&mut holder);

    assert!(released(&log).is_empty());
    assert!(holder.instances.is_empty());
    assert!(!model.is_disposed());

    ResourceDisposer::dispose_model(&model);
    assert!(model.is_disposed());
    assert_eq!(released(&log).len(), 3);
}

#[test]
fn failing_release_does_not_stop_the_walk() {
    let log = release_log();
    let broken = Geometry::new("broken", 1, vec![Box::new(MockHandle::failing("broken", &log))]);
    let mut root = SceneNode::new("root").with_resource(Resource::Geometry(broken));
    root.add_child(mock_node("sibling", &log));
    root.add_child(SceneNode::new("tail").with_resource(Resource::Texture(mock_texture("tail.tex", &log))));

    ResourceDisposer::dispose(&mut root);

    assert_eq!(
        released(&log),
        vec!["sibling.geom", "sibling.tex", "sibling.mat", "tail.tex", "broken"]
    );
    assert!(root.is_disposed());
}

#[test]
fn dispose_child_removes_only_the_named_child() {
    let log = release_log();
    let mut root = SceneNode::new("root");
    root.add_child(mock_node("keep", &log));
    root.add_child(mock_node("drop", &log));

    ResourceDisposer::dispose_child(&mut root, "drop");
    ResourceDisposer::dispose_child(&mut root, "missing");

    assert_eq!(released(&log), vec!["drop.geom", "drop.tex", "drop.mat"]);
    assert_eq!(root.children.len(), 1);
    assert_eq!(root.children[0].name, "keep");
}

#[test]
fn node_disposed_in_place_is_emptied_but_stays_attached() {
    let log = release_log();
    let mut root = SceneNode::new("root");
    let mut inner = mock_node("inner", &log);
    inner.add_child(mock_node("leaf", &log));
    root.add_child(inner);

    ResourceDisposer::dispose(&mut root.children[0]);
    assert_eq!(root.children.len(), 1);
    assert!(root.children[0].is_disposed());
    assert!(root.children[0].children.is_empty());

    ResourceDisposer::dispose_child(&mut root, "inner");
    assert!(root.children.is_empty());
    assert_eq!(
        released(&log),
        vec!["leaf.geom", "leaf.tex", "leaf.mat", "inner.geom", "inner.tex", "inner.mat"]
    );
}
