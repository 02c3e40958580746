//! Scoped filesystem rooted at an absolute path.
//!
//! All paths are relative to the root; anything that escapes after
//! normalization fails with `PathEscape`. Writes go through a sibling temp
//! file and are renamed into place, so readers never observe a half-written
//! file.

use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path escapes filesystem root: {0}")]
    PathEscape(PathBuf),
    #[error("filesystem is read-only: {0}")]
    ReadOnly(PathBuf),
}

pub type Result<T> = std::result::Result<T, FsError>;

fn io_err(path: &Path, source: std::io::Error) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A filesystem confined to a subtree.
#[derive(Debug, Clone)]
pub struct ScopedFs {
    root: PathBuf,
    read_only: bool,
}

impl ScopedFs {
    /// Create a scoped filesystem over `root`, creating the directory if
    /// needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self {
            root,
            read_only: false,
        })
    }

    /// Like [`ScopedFs::new`], but every mutating operation fails with
    /// `ReadOnly`. Used for shared directories visible from auxiliary
    /// worktrees.
    pub fn new_read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_only: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path against the root, rejecting absolute paths
    /// and any `..` traversal that would leave the subtree.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.is_absolute() {
            return Err(FsError::PathEscape(path.to_path_buf()));
        }
        let mut parts: Vec<std::ffi::OsString> = Vec::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(FsError::PathEscape(path.to_path_buf()));
                    }
                }
                Component::Normal(part) => parts.push(part.to_os_string()),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(FsError::PathEscape(path.to_path_buf()));
                }
            }
        }
        let mut resolved = self.root.clone();
        for part in parts {
            resolved.push(part);
        }
        Ok(resolved)
    }

    fn writable(&self, path: &Path) -> Result<()> {
        if self.read_only {
            return Err(FsError::ReadOnly(self.root.join(path)));
        }
        Ok(())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<File> {
        let full = self.resolve(&path)?;
        File::open(&full).map_err(|e| io_err(&full, e))
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Result<String> {
        let full = self.resolve(&path)?;
        fs::read_to_string(&full).map_err(|e| io_err(&full, e))
    }

    /// Atomic write: the content lands in a sibling temp file which is
    /// renamed over the destination. On failure the temp file is removed and
    /// the previous content stays intact.
    pub fn write(&self, path: impl AsRef<Path>, contents: &str) -> Result<()> {
        self.writable(path.as_ref())?;
        let full = self.resolve(&path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let tmp = full.with_file_name(format!(".{file_name}.tmp"));
        let result = fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e)).and_then(|()| {
            fs::rename(&tmp, &full).map_err(|e| io_err(&full, e))
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Append a line to a file, creating it (and parents) if missing.
    /// Append-only logs do not need the temp-file dance.
    pub fn append(&self, path: impl AsRef<Path>, line: &str) -> Result<()> {
        self.writable(path.as_ref())?;
        let full = self.resolve(&path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(|e| io_err(&full, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_err(&full, e))?;
        if !line.ends_with('\n') {
            file.write_all(b"\n").map_err(|e| io_err(&full, e))?;
        }
        Ok(())
    }

    pub fn mkdir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        self.writable(path.as_ref())?;
        let full = self.resolve(&path)?;
        fs::create_dir_all(&full).map_err(|e| io_err(&full, e))
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        self.writable(path.as_ref())?;
        let full = self.resolve(&path)?;
        fs::remove_file(&full).map_err(|e| io_err(&full, e))
    }

    pub fn remove_all(&self, path: impl AsRef<Path>) -> Result<()> {
        self.writable(path.as_ref())?;
        let full = self.resolve(&path)?;
        if full.exists() {
            fs::remove_dir_all(&full).map_err(|e| io_err(&full, e))?;
        }
        Ok(())
    }

    /// Rename within the subtree. Source and destination share the root, so
    /// this is the same-filesystem rename the atomic writes rely on.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        self.writable(from.as_ref())?;
        let from_full = self.resolve(&from)?;
        let to_full = self.resolve(&to)?;
        if let Some(parent) = to_full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::rename(&from_full, &to_full).map_err(|e| io_err(&from_full, e))
    }

    /// All files under `path`, as sorted root-relative paths.
    pub fn walk(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let full = self.resolve(&path)?;
        let mut files = Vec::new();
        if full.exists() {
            walk_dir(&full, &mut files)?;
        }
        let mut relative: Vec<PathBuf> = files
            .into_iter()
            .filter_map(|f| f.strip_prefix(&self.root).map(Path::to_path_buf).ok())
            .collect();
        relative.sort();
        Ok(relative)
    }

    /// Digest of a subtree: sha256 over sorted (relative path, content)
    /// pairs. Two trees with identical contents produce identical digests,
    /// which is what the read-only advance modes are checked against.
    pub fn digest(&self, path: impl AsRef<Path>) -> Result<String> {
        let mut hasher = Sha256::new();
        for rel in self.walk(&path)? {
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            let full = self.resolve(&rel)?;
            let contents = fs::read(&full).map_err(|e| io_err(&full, e))?;
            hasher.update(&contents);
            hasher.update([0u8]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Advisory lock file for multi-step operations. The core never takes it;
/// callers that need cross-process exclusion may.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    /// Acquire by exclusive creation; fails if the lock is already held.
    pub fn acquire(fs: &ScopedFs, name: &str) -> Result<Self> {
        let full = fs.resolve(name)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .map_err(|e| io_err(&full, e))?;
        Ok(Self { path: full })
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scoped() -> (TempDir, ScopedFs) {
        let dir = TempDir::new().unwrap();
        let fs = ScopedFs::new(dir.path().join("scope")).unwrap();
        (dir, fs)
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, fs) = scoped();
        fs.write("a/b/file.txt", "hello").unwrap();
        assert_eq!(fs.read("a/b/file.txt").unwrap(), "hello");
    }

    #[test]
    fn absolute_path_is_rejected() {
        let (_dir, fs) = scoped();
        let err = fs.read("/etc/passwd").unwrap_err();
        assert!(matches!(err, FsError::PathEscape(_)));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let (_dir, fs) = scoped();
        let err = fs.write("a/../../outside.txt", "x").unwrap_err();
        assert!(matches!(err, FsError::PathEscape(_)));
    }

    #[test]
    fn inner_parent_traversal_is_allowed() {
        let (_dir, fs) = scoped();
        fs.write("a/../b.txt", "x").unwrap();
        assert!(fs.exists("b.txt"));
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let (_dir, fs) = scoped();
        fs.write("state.yaml", "v: 1").unwrap();
        let files = fs.walk(".").unwrap();
        assert_eq!(files, vec![PathBuf::from("state.yaml")]);
    }

    #[test]
    fn write_replaces_existing_content() {
        let (_dir, fs) = scoped();
        fs.write("f", "old").unwrap();
        fs.write("f", "new").unwrap();
        assert_eq!(fs.read("f").unwrap(), "new");
    }

    #[test]
    fn append_creates_and_appends() {
        let (_dir, fs) = scoped();
        fs.append("log.md", "- one").unwrap();
        fs.append("log.md", "- two").unwrap();
        assert_eq!(fs.read("log.md").unwrap(), "- one\n- two\n");
    }

    #[test]
    fn walk_is_sorted_and_recursive() {
        let (_dir, fs) = scoped();
        fs.write("z.txt", "z").unwrap();
        fs.write("a/nested.txt", "n").unwrap();
        let files = fs.walk(".").unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("a/nested.txt"), PathBuf::from("z.txt")]
        );
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let (_dir, fs) = scoped();
        fs.write("a.txt", "one").unwrap();
        fs.write("b/c.txt", "two").unwrap();
        let d1 = fs.digest(".").unwrap();
        let d2 = fs.digest(".").unwrap();
        assert_eq!(d1, d2);
        fs.write("a.txt", "changed").unwrap();
        assert_ne!(fs.digest(".").unwrap(), d1);
    }

    #[test]
    fn remove_all_is_recursive_and_idempotent() {
        let (_dir, fs) = scoped();
        fs.write("sub/one.txt", "1").unwrap();
        fs.write("sub/deep/two.txt", "2").unwrap();
        fs.remove_all("sub").unwrap();
        assert!(!fs.exists("sub"));
        fs.remove_all("sub").unwrap();
    }

    #[test]
    fn rename_within_root() {
        let (_dir, fs) = scoped();
        fs.write("from.txt", "data").unwrap();
        fs.rename("from.txt", "moved/to.txt").unwrap();
        assert!(!fs.exists("from.txt"));
        assert_eq!(fs.read("moved/to.txt").unwrap(), "data");
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let rw = ScopedFs::new(dir.path()).unwrap();
        rw.write("shared.txt", "x").unwrap();
        let ro = ScopedFs::new_read_only(dir.path());
        assert_eq!(ro.read("shared.txt").unwrap(), "x");
        assert!(matches!(
            ro.write("shared.txt", "y").unwrap_err(),
            FsError::ReadOnly(_)
        ));
        assert!(matches!(
            ro.remove_all("shared.txt").unwrap_err(),
            FsError::ReadOnly(_)
        ));
    }

    #[test]
    fn lockfile_excludes_second_holder() {
        let (_dir, fs) = scoped();
        let lock = Lockfile::acquire(&fs, ".lock").unwrap();
        assert!(Lockfile::acquire(&fs, ".lock").is_err());
        drop(lock);
        let _relock = Lockfile::acquire(&fs, ".lock").unwrap();
    }
}
