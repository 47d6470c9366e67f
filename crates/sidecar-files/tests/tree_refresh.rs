use sidecar_core::projection::{PreservedState, Projection, ProjectionStore};
use sidecar_core::watch::{any_path, watch, SourceId, WatchMode, WatchSpec};
use sidecar_files::{FileTree, IgnoreRules, TreeOptions};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn watched_create_refreshes_tree_and_keeps_expansion() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical root");
    fs::create_dir_all(root.join("a/b")).expect("a/b");
    fs::write(root.join("a/c.txt"), "c").expect("c");
    fs::write(root.join("d.txt"), "d").expect("d");

    let rules = IgnoreRules::load(&root);
    let expanded: BTreeSet<PathBuf> = ["a", "a/b"].into_iter().map(PathBuf::from).collect();
    let store = ProjectionStore::new(
        FileTree::build(&root, TreeOptions::default(), &expanded, &rules).expect("build"),
    );
    let mut state = PreservedState {
        expanded: expanded.clone(),
        selected: Some(PathBuf::from("a/c.txt")),
        ..PreservedState::default()
    };
    state.reapply(store.snapshot().as_ref());

    let (tx, rx) = mpsc::channel();
    let mut handle = watch(
        SourceId::new("files"),
        WatchSpec {
            root: root.clone(),
            mode: WatchMode::Recursive,
            debounce: Duration::from_millis(100),
            predicate: any_path(),
        },
        move |signal| {
            let _ = tx.send(signal);
        },
    )
    .expect("watch");

    fs::write(root.join("a/b/new.txt"), "").expect("new file");
    rx.recv_timeout(Duration::from_secs(5))
        .expect("coalesced signal");

    let expanded_now = state.expanded.clone();
    store
        .rebuild(|previous| {
            FileTree::build(&root, previous.options(), &expanded_now, &rules)
        })
        .expect("rebuild");
    let tree = store.snapshot();
    state.reapply(tree.as_ref());
    handle.close();

    assert_eq!(state.expanded, expanded);
    assert!(tree.contains(&PathBuf::from("a/b/new.txt")));
    assert!(tree.index_of(&PathBuf::from("a/b/new.txt")).is_some());
    assert_eq!(state.selected, Some(PathBuf::from("a/c.txt")));
}
