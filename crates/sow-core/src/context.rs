//! Context resolver: find the repository root from the working directory
//! and scope a filesystem over its `.sow/` tree.
//!
//! A `.git` directory marks a primary checkout; a `.git` *file* marks an
//! auxiliary worktree and names the real gitdir inside the main repository.
//! Projects created under a worktree persist their state in that worktree,
//! which is the whole isolation story.

use crate::error::{Error, Result};
use crate::fsys::ScopedFs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Context {
    /// Root of the current checkout (main repo or auxiliary worktree).
    pub root: PathBuf,
    /// Root of the main repository; equals `root` outside a worktree.
    pub main_root: PathBuf,
    pub is_worktree: bool,
}

impl Context {
    /// Walk upward from `cwd` to the first `.git` entry.
    pub fn resolve(cwd: &Path) -> Result<Self> {
        for dir in cwd.ancestors() {
            let git_path = dir.join(".git");
            if git_path.is_dir() {
                return Ok(Self {
                    root: dir.to_path_buf(),
                    main_root: dir.to_path_buf(),
                    is_worktree: false,
                });
            }
            if git_path.is_file() {
                let main_root = main_root_from_git_file(&git_path, dir)
                    .unwrap_or_else(|| dir.to_path_buf());
                return Ok(Self {
                    root: dir.to_path_buf(),
                    main_root,
                    is_worktree: true,
                });
            }
        }
        Err(Error::NotFound(format!(
            "git repository above {}",
            cwd.display()
        )))
    }

    /// Scoped filesystem over this checkout's `.sow/` tree.
    pub fn sow_fs(&self) -> Result<ScopedFs> {
        Ok(ScopedFs::new(self.root.join(".sow"))?)
    }

    /// Scoped filesystem over the shared directories in the main repo
    /// (`knowledge/`, `sinks/`, `repos/`). Auxiliary worktrees get it
    /// read-only: shared state is written from the main repository only.
    pub fn shared_fs(&self) -> Result<ScopedFs> {
        let root = self.main_root.join(".sow");
        if self.is_worktree {
            Ok(ScopedFs::new_read_only(root))
        } else {
            Ok(ScopedFs::new(root)?)
        }
    }
}

/// A worktree's `.git` file holds `gitdir: <main>/.git/worktrees/<name>`.
/// The main repository root is the parent of that `.git` directory.
fn main_root_from_git_file(git_file: &Path, worktree_root: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(git_file).ok()?;
    let gitdir = contents
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)?;
    let gitdir = if Path::new(gitdir).is_absolute() {
        PathBuf::from(gitdir)
    } else {
        worktree_root.join(gitdir)
    };
    gitdir
        .ancestors()
        .find(|a| a.file_name().is_some_and(|n| n == ".git"))
        .and_then(Path::parent)
        .map(Path::to_path_buf)
}
