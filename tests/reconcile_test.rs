//! Reconciliation against the real filesystem.
//!
//! Runs unprivileged: policies use the current owner, so only modes drift.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use ownkeeper::watcher::{HostFs, PathMatcher, PolicyFs, Reconciler, WatchSpec};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn mode(path: &Path) -> u32 {
    std::fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
}

fn set_mode(path: &Path, mode: u32) {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

fn spec_for(root: &Path) -> WatchSpec {
    let meta = std::fs::metadata(root).unwrap();
    WatchSpec::new(root, meta.uid(), meta.gid(), 0o640, 0o750)
}

#[test]
fn test_tree_converges_and_second_pass_is_quiet() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    std::fs::create_dir_all(root.join("tv/show")).unwrap();
    std::fs::write(root.join("tv/show/e01.mkv"), "x").unwrap();
    std::fs::write(root.join("notes.txt"), "x").unwrap();
    set_mode(&root.join("tv/show/e01.mkv"), 0o666);

    let spec = spec_for(root);
    let matcher = PathMatcher::from_spec(&spec);
    let reconciler = Reconciler::default();
    let cancel = CancellationToken::new();

    let first = reconciler.enforce_tree(&spec, &matcher, &cancel);
    assert_eq!(first.failed, 0);
    assert!(first.fixed > 0);
    assert_eq!(mode(&root.join("tv/show/e01.mkv")), 0o640);
    assert_eq!(mode(&root.join("tv/show")), 0o750);
    assert_eq!(mode(root), 0o750);

    let second = reconciler.enforce_tree(&spec, &matcher, &cancel);
    assert_eq!(second.fixed, 0);
    assert_eq!(second.skipped, first.total());
}

#[test]
fn test_excluded_subtree_and_symlinks_untouched() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    std::fs::create_dir_all(root.join(".cache")).unwrap();
    std::fs::write(root.join(".cache/blob"), "x").unwrap();
    std::fs::write(root.join("target.txt"), "x").unwrap();
    std::os::unix::fs::symlink(root.join("target.txt"), root.join("link")).unwrap();
    set_mode(&root.join(".cache/blob"), 0o600);
    set_mode(&root.join("target.txt"), 0o600);

    let spec = spec_for(root).with_exclude([".*", "target.txt"]);
    let matcher = PathMatcher::from_spec(&spec);
    let result = Reconciler::default().enforce_tree(&spec, &matcher, &CancellationToken::new());

    assert_eq!(result.failed, 0);
    assert_eq!(mode(&root.join(".cache/blob")), 0o600);
    // The link is skipped, so its excluded target keeps its mode
    assert_eq!(mode(&root.join("target.txt")), 0o600);
}

#[test]
fn test_single_entry_enforcement() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("x.txt");
    std::fs::write(&file, "x").unwrap();
    set_mode(&file, 0o777);

    let spec = spec_for(temp.path());
    let reconciler = Reconciler::default();

    assert!(reconciler.enforce_entry(&spec, &file).unwrap());
    assert_eq!(mode(&file), 0o640);
    assert!(!reconciler.enforce_entry(&spec, &file).unwrap());
    assert!(reconciler.enforce_entry(&spec, &temp.path().join("missing")).is_err());
}

#[test]
fn test_entry_swapped_for_symlink_is_not_followed() {
    let outside = TempDir::new().unwrap();
    let secret = outside.path().join("secret");
    std::fs::write(&secret, "x").unwrap();
    set_mode(&secret, 0o600);

    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("x");
    std::fs::write(&entry, "x").unwrap();
    set_mode(&entry, 0o600);
    let stale = HostFs.stat(&entry).unwrap();

    // A writer replaces the entry between inspection and correction
    std::fs::remove_file(&entry).unwrap();
    std::os::unix::fs::symlink(&secret, &entry).unwrap();

    let spec = spec_for(temp.path());
    let result = Reconciler::default().enforce_stat(&spec, &entry, stale);

    assert!(result.is_err());
    assert_eq!(mode(&secret), 0o600);
}
