//! Worktree manager: one working directory per branch under
//! `.sow/worktrees/`.
//!
//! Branch names keep their `/` nesting on disk (`feat/auth` lands at
//! `.sow/worktrees/feat/auth/`). Git itself enforces the one-worktree-per-
//! branch rule; its lock errors surface as `BranchAlreadyCheckedOut`.

use crate::error::{Error, Result};
use crate::fsys::FsError;
use crate::host::{GitHost, HostError, WorktreeInfo};
use std::path::{Component, Path, PathBuf};

pub const WORKTREES_DIR: &str = ".sow/worktrees";

pub struct WorktreeManager<'a> {
    git: &'a dyn GitHost,
    repo_root: PathBuf,
}

impl std::fmt::Debug for WorktreeManager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeManager")
            .field("repo_root", &self.repo_root)
            .finish_non_exhaustive()
    }
}

impl<'a> WorktreeManager<'a> {
    pub fn new(git: &'a dyn GitHost, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            git,
            repo_root: repo_root.into(),
        }
    }

    /// Expected on-disk location for a branch's worktree.
    pub fn path_for(&self, branch: &str) -> Result<PathBuf> {
        validate_branch(branch)?;
        Ok(self.repo_root.join(WORKTREES_DIR).join(branch))
    }

    /// Return the worktree for `branch`, creating it (and the branch, off
    /// the protected default branch) when missing. A second ensure for the
    /// same branch is a no-op.
    pub fn ensure(&self, branch: &str) -> Result<PathBuf> {
        let path = self.path_for(branch)?;
        if path.exists() {
            tracing::debug!(%branch, path = %path.display(), "worktree already present");
            return Ok(path);
        }

        if !self.git.branch_exists(&self.repo_root, branch)? {
            let base = self.git.default_branch(&self.repo_root)?;
            tracing::info!(%branch, %base, "creating branch off protected base");
            self.git.create_branch(&self.repo_root, branch, &base)?;
        }

        self.git
            .worktree_add(&self.repo_root, &path, branch)
            .map_err(|e| classify(branch, &path, e))?;
        tracing::info!(%branch, path = %path.display(), "worktree created");
        Ok(path)
    }

    pub fn list(&self) -> Result<Vec<WorktreeInfo>> {
        Ok(self.git.worktree_list(&self.repo_root)?)
    }

    /// Remove a branch's worktree. Without `force`, uncommitted changes in
    /// the worktree refuse the removal.
    pub fn remove(&self, branch: &str, force: bool) -> Result<()> {
        let path = self.path_for(branch)?;
        if !path.exists() {
            return Err(Error::NotFound(format!("worktree for branch {branch:?}")));
        }
        if !force && self.git.has_uncommitted_changes(&path)? {
            return Err(Error::UncommittedChanges(path.display().to_string()));
        }
        self.git
            .worktree_remove(&self.repo_root, &path, force)
            .map_err(|e| classify(branch, &path, e))?;
        tracing::info!(%branch, "worktree removed");
        Ok(())
    }

    pub fn prune(&self) -> Result<()> {
        Ok(self.git.worktree_prune(&self.repo_root)?)
    }
}

/// Branch names become relative paths; refuse anything that could wander
/// out of the worktrees directory.
fn validate_branch(branch: &str) -> Result<()> {
    let bad = branch.is_empty()
        || branch.starts_with('/')
        || branch.ends_with('/')
        || Path::new(branch)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if bad {
        return Err(Error::Fs(FsError::PathEscape(PathBuf::from(branch))));
    }
    Ok(())
}

/// Map git's worktree lock and dirty-tree refusals onto the engine's error
/// kinds; anything else stays a host error.
fn classify(branch: &str, path: &Path, err: HostError) -> Error {
    if let HostError::CommandFailed { stderr, .. } = &err {
        if stderr.contains("already checked out") || stderr.contains("already used by worktree") {
            return Error::BranchAlreadyCheckedOut(branch.to_string());
        }
        if stderr.contains("contains modified or untracked files") {
            return Error::UncommittedChanges(path.display().to_string());
        }
    }
    Error::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ShellHost;
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
    fn path_for_preserves_branch_nesting() {
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, "/repo");
        assert_eq!(
            manager.path_for("feat/auth").unwrap(),
            PathBuf::from("/repo/.sow/worktrees/feat/auth")
        );
    }

    #[test]
    fn path_for_rejects_traversal() {
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, "/repo");
        assert!(manager.path_for("../escape").is_err());
        assert!(manager.path_for("feat/../../escape").is_err());
        assert!(manager.path_for("/absolute").is_err());
        assert!(manager.path_for("").is_err());
    }

    #[test]
    fn ensure_creates_branch_and_worktree() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());

        let path = manager.ensure("feat/a").unwrap();
        assert!(path.exists());
        assert!(path.ends_with(".sow/worktrees/feat/a"));
        assert!(host.branch_exists(dir.path(), "feat/a").unwrap());

        // Second ensure is a no-op returning the same path.
        let again = manager.ensure("feat/a").unwrap();
        assert_eq!(path, again);
    }

    #[test]
    fn ensure_for_checked_out_branch_is_conflict() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());

        // `main` is checked out in the primary worktree.
        let err = manager.ensure("main").unwrap_err();
        assert!(matches!(err, Error::BranchAlreadyCheckedOut(branch) if branch == "main"));
    }

    #[test]
    fn remove_refuses_dirty_worktree_without_force() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());

        let path = manager.ensure("feat/dirty").unwrap();
        std::fs::write(path.join("scratch.txt"), "uncommitted").unwrap();

        assert!(matches!(
            manager.remove("feat/dirty", false),
            Err(Error::UncommittedChanges(_))
        ));
        assert!(path.exists());

        manager.remove("feat/dirty", true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn remove_missing_worktree_is_not_found() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());
        assert!(matches!(
            manager.remove("feat/none", false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn list_includes_created_worktrees() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());
        manager.ensure("feat/a").unwrap();
        manager.ensure("feat/b").unwrap();

        let list = manager.list().unwrap();
        let branches: Vec<Option<&str>> =
            list.iter().map(|w| w.branch.as_deref()).collect();
        assert!(branches.contains(&Some("main")));
        assert!(branches.contains(&Some("feat/a")));
        assert!(branches.contains(&Some("feat/b")));
    }

    #[test]
    fn prune_runs_clean() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let manager = WorktreeManager::new(&host, dir.path());
        manager.prune().unwrap();
    }
}
