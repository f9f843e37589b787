//! Component editing through the write-back view.
//!
//! - Dropping `.` components and inserting before a named component
//! - `from_parts(root, components) == path` after every mutation
//! - Random edit sequences keep the storage normalized

use bufprims_path::{ComponentKind, ComponentView, FilePath};
use proptest::prelude::*;

fn assert_round_trip(path: &FilePath) {
    assert_eq!(&FilePath::from_parts(path.root(), path.components()), path);
}

#[test]
fn drop_current_dirs_then_insert_before_scripts() {
    let mut path = FilePath::try_from("/./home/./username/scripts/./tree").unwrap();
    assert_round_trip(&path);

    path.components_mut()
        .retain(|c| c.kind() != ComponentKind::CurrentDir);
    assert_eq!(path.to_string(), "/home/username/scripts/tree");
    assert_round_trip(&path);

    {
        let mut components = path.components_mut();
        let scripts = components
            .indices()
            .rev()
            .find(|&i| components.get(i).as_bytes() == b"scripts")
            .unwrap();
        components.insert(scripts, "bin");
    }
    assert_eq!(path.to_string(), "/home/username/bin/scripts/tree");
    assert_round_trip(&path);
}

#[test]
fn rootless_replacement_reattaches_root() {
    let mut path = FilePath::try_from("/etc/ssh").unwrap();
    {
        let mut components = path.components_mut();
        *components = ["var", "lib"].into_iter().collect::<ComponentView>();
    }
    assert_eq!(path.to_string(), "/var/lib");
    assert_round_trip(&path);
}

#[test]
fn emptied_view_keeps_root_or_becomes_empty() {
    let mut absolute = FilePath::try_from("/a/b/c").unwrap();
    absolute.components_mut().clear();
    assert_eq!(absolute.to_string(), "/");
    assert_round_trip(&absolute);

    let mut relative = FilePath::try_from("a/b").unwrap();
    relative.components_mut().clear();
    assert!(relative.is_empty());
    assert_round_trip(&relative);

    absolute.components_mut().extend(["usr", "share"]);
    assert_eq!(absolute.to_string(), "/usr/share");
}

#[test]
fn replace_middle_range() {
    let mut path = FilePath::try_from("/a/b/c/d").unwrap();
    {
        let mut components = path.components_mut();
        let b = components.index_after(components.start_index());
        let d = components.index_before(components.end_index());
        components.replace_range(b..d, ["x"]);
    }
    assert_eq!(path.to_string(), "/a/x/d");
    assert_round_trip(&path);
}

#[test]
fn remove_range_to_end() {
    let mut path = FilePath::try_from("docs/api/v1/index.html").unwrap();
    {
        let mut components = path.components_mut();
        let api = components.index_after(components.start_index());
        let end = components.end_index();
        components.remove_range(api..end);
    }
    assert_eq!(path.to_string(), "docs");
    assert_round_trip(&path);
}

#[derive(Clone, Debug)]
enum Edit {
    Push(String),
    Insert(usize, String),
    Remove(usize),
    Pop,
    ReplaceAll(Vec<String>),
}

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(".".to_string()),
        Just("..".to_string()),
        "[a-z]{1,6}",
        "[a-z]{1,3}\\.[a-z]{1,3}",
    ]
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        arb_name().prop_map(Edit::Push),
        (any::<usize>(), arb_name()).prop_map(|(i, n)| Edit::Insert(i, n)),
        any::<usize>().prop_map(Edit::Remove),
        Just(Edit::Pop),
        proptest::collection::vec(arb_name(), 0..4).prop_map(Edit::ReplaceAll),
    ]
}

fn apply(view: &mut ComponentView, edit: &Edit, model: &mut Vec<String>) {
    let indices: Vec<_> = view.indices().collect();
    match edit {
        Edit::Push(name) => {
            view.push(name);
            model.push(name.clone());
        }
        Edit::Insert(at, name) => {
            let slot = at % (indices.len() + 1);
            let index = indices.get(slot).copied().unwrap_or(view.end_index());
            view.insert(index, name);
            model.insert(slot, name.clone());
        }
        Edit::Remove(at) if !indices.is_empty() => {
            let slot = at % indices.len();
            view.remove(indices[slot]);
            model.remove(slot);
        }
        Edit::Remove(_) => {}
        Edit::Pop => {
            view.pop();
            model.pop();
        }
        Edit::ReplaceAll(names) => {
            let range = view.start_index()..view.end_index();
            view.replace_range(range, names);
            model.clone_from(names);
        }
    }
}

proptest! {
    #[test]
    fn edits_match_a_vector_model(
        absolute in any::<bool>(),
        seed in proptest::collection::vec(arb_name(), 0..5),
        edits in proptest::collection::vec(arb_edit(), 0..16),
    ) {
        let prefix = if absolute { "/" } else { "" };
        let mut path = FilePath::try_from(format!("{prefix}{}", seed.join("/")).as_str()).unwrap();
        let mut model = seed.clone();

        for edit in &edits {
            apply(&mut path.components_mut(), edit, &mut model);

            prop_assert_eq!(path.is_absolute(), absolute);
            let names: Vec<String> = path.components().iter().map(|c| c.to_string()).collect();
            prop_assert_eq!(&names, &model);
            prop_assert_eq!(
                &FilePath::from_parts(path.root(), path.components()),
                &path
            );
            prop_assert_eq!(path.to_string(), format!("{prefix}{}", model.join("/")));
        }
    }

    #[test]
    fn reverse_iteration_mirrors_forward(
        names in proptest::collection::vec(arb_name(), 0..8),
        runs in 1usize..4,
    ) {
        let separator = "/".repeat(runs);
        let raw = format!("{separator}{}{separator}", names.join(&separator));
        let view = FilePath::try_from(raw.as_str()).unwrap().components();

        let forward: Vec<String> = view.iter().map(|c| c.to_string()).collect();
        let mut backward: Vec<String> = view.iter().rev().map(|c| c.to_string()).collect();
        backward.reverse();
        prop_assert_eq!(&forward, &names);
        prop_assert_eq!(forward, backward);
    }
}
