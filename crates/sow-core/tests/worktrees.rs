//! Concurrent worktree isolation: each branch gets its own worktree and its
//! own `.sow/project/` state.

use sow_core::registry;
use sow_core::{Backend, Context, Error, ScopedFs, ShellHost, WorktreeManager, YamlStore};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
    ] {
        Command::new("git")
            .args(&args)
            .current_dir(dir.path())
            .output()
            .unwrap();
    }
    std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
    Command::new("git")
        .args(["add", "."])
        .current_dir(dir.path())
        .output()
        .unwrap();
    Command::new("git")
        .args(["commit", "-m", "Initial commit"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    dir
}

#[test]
fn concurrent_worktrees_have_isolated_project_state() {
    let dir = setup_test_repo();
    let host = ShellHost::default();
    let manager = WorktreeManager::new(&host, dir.path());
    let registry = registry::builtin();

    let path_a = manager.ensure("feat/a").unwrap();
    let path_b = manager.ensure("feat/b").unwrap();
    assert_ne!(path_a, path_b);

    // A project in each worktree, persisted under that worktree's .sow/.
    for (path, branch, name) in [
        (&path_a, "feat/a", "project-a"),
        (&path_b, "feat/b", "project-b"),
    ] {
        let fs = ScopedFs::new(path.join(".sow")).unwrap();
        let store = YamlStore::new(fs, &registry);
        let config = registry.get("standard").unwrap();
        let mut project = config.new_project(name, branch, "", None);
        store.create(&mut project).unwrap();
    }

    assert!(path_a.join(".sow/project/state.yaml").exists());
    assert!(path_b.join(".sow/project/state.yaml").exists());

    let fs_a = ScopedFs::new(path_a.join(".sow")).unwrap();
    let store_a = YamlStore::new(fs_a, &registry);
    assert_eq!(store_a.load().unwrap().name, "project-a");

    let fs_b = ScopedFs::new(path_b.join(".sow")).unwrap();
    let store_b = YamlStore::new(fs_b, &registry);
    assert_eq!(store_b.load().unwrap().name, "project-b");

    // A second ensure for an existing branch is a no-op and leaves the
    // project state alone.
    let again = manager.ensure("feat/a").unwrap();
    assert_eq!(again, path_a);
    assert_eq!(store_a.load().unwrap().name, "project-a");
}

#[test]
fn context_resolves_worktree_and_isolates_state() {
    let dir = setup_test_repo();
    let host = ShellHost::default();
    let manager = WorktreeManager::new(&host, dir.path());

    let worktree = manager.ensure("feat/ctx").unwrap();
    let nested = worktree.join("src");
    std::fs::create_dir_all(&nested).unwrap();

    let ctx = Context::resolve(&nested).unwrap();
    assert!(ctx.is_worktree);
    assert_eq!(ctx.root, worktree);
    assert_eq!(
        ctx.main_root.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );

    // State written through the resolved context lands in the worktree.
    let fs = ctx.sow_fs().unwrap();
    fs.write("project/state.yaml", "schema_version: 1").unwrap();
    assert!(worktree.join(".sow/project/state.yaml").exists());
    assert!(!dir.path().join(".sow/project/state.yaml").exists());
}

#[test]
fn ensure_conflicts_and_dirty_removal() {
    let dir = setup_test_repo();
    let host = ShellHost::default();
    let manager = WorktreeManager::new(&host, dir.path());

    // main is checked out in the primary worktree.
    assert!(matches!(
        manager.ensure("main"),
        Err(Error::BranchAlreadyCheckedOut(_))
    ));

    let path = manager.ensure("feat/dirty").unwrap();
    std::fs::write(path.join("wip.txt"), "uncommitted").unwrap();
    assert!(matches!(
        manager.remove("feat/dirty", false),
        Err(Error::UncommittedChanges(_))
    ));
    manager.remove("feat/dirty", true).unwrap();
    manager.prune().unwrap();
}
