//! Host tool ports: `git`, the GitHub CLI, and the AI agent.
//!
//! The core shells out for everything it does not own. These traits are the
//! seam; `ShellHost` is the production implementation over
//! `std::process::Command`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} {args} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        code: i32,
        stderr: String,
    },
    #[error("invalid utf-8 in {program} output")]
    InvalidUtf8 { program: String },
    #[error("invalid json from {program}: {message}")]
    InvalidJson { program: String, message: String },
    /// The subprocess died to a signal: the invocation was interrupted.
    #[error("{program} was interrupted")]
    Interrupted { program: String },
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Keep the last chunk of stderr for diagnostics; full output can be huge.
fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let start = trimmed.len() - STDERR_TAIL_BYTES;
    // Avoid splitting a UTF-8 sequence.
    let boundary = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(start);
    format!("…{}", &trimmed[boundary..])
}

/// A worktree as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: String,
}

/// Git operations the core depends on.
pub trait GitHost {
    fn current_branch(&self, cwd: &Path) -> Result<String>;
    /// Default (protected) branch: origin/HEAD, then `main`, then `master`.
    fn default_branch(&self, cwd: &Path) -> Result<String>;
    fn branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool>;
    fn create_branch(&self, cwd: &Path, branch: &str, base: &str) -> Result<()>;
    fn checkout(&self, cwd: &Path, branch: &str) -> Result<()>;
    fn has_uncommitted_changes(&self, cwd: &Path) -> Result<bool>;
    fn worktree_add(&self, cwd: &Path, path: &Path, branch: &str) -> Result<()>;
    fn worktree_remove(&self, cwd: &Path, path: &Path, force: bool) -> Result<()>;
    fn worktree_list(&self, cwd: &Path) -> Result<Vec<WorktreeInfo>>;
    fn worktree_prune(&self, cwd: &Path) -> Result<()>;
}

/// An issue as returned by the GitHub host.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// GitHub operations, backed by the `gh` CLI in production.
pub trait GithubHost {
    fn issue(&self, cwd: &Path, number: u64) -> Result<Issue>;
    fn list_issues(&self, cwd: &Path, labels: &[String]) -> Result<Vec<Issue>>;
    fn linked_branches(&self, cwd: &Path, issue: u64) -> Result<Vec<String>>;
    fn create_linked_branch(&self, cwd: &Path, issue: u64, branch: &str, base: &str)
        -> Result<()>;
    fn create_issue(&self, cwd: &Path, title: &str, body: &str, labels: &[String])
        -> Result<u64>;
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub exit_code: i32,
    /// Opaque resumable-conversation handle, when the agent reports one.
    pub session_id: Option<String>,
}

/// The AI coding agent, spawned as a subprocess with its output streamed
/// straight to the user's terminal.
pub trait AgentHost {
    fn spawn(&self, prompt: &str, cwd: &Path, session: Option<&str>) -> Result<AgentOutcome>;
}

/// Production host: shells out to `git`, `gh`, and the configured agent
/// binary.
#[derive(Debug, Clone)]
pub struct ShellHost {
    pub git_bin: String,
    pub gh_bin: String,
    pub agent_bin: String,
}

impl Default for ShellHost {
    fn default() -> Self {
        Self {
            git_bin: "git".to_string(),
            gh_bin: "gh".to_string(),
            agent_bin: std::env::var("SOW_AGENT").unwrap_or_else(|_| "claude".to_string()),
        }
    }
}

impl ShellHost {
    fn run(&self, program: &str, cwd: &Path, args: &[&str]) -> Result<Vec<u8>> {
        tracing::debug!(program, ?args, "exec");
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| HostError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        if !output.status.success() {
            let Some(code) = output.status.code() else {
                return Err(HostError::Interrupted {
                    program: program.to_string(),
                });
            };
            return Err(HostError::CommandFailed {
                program: program.to_string(),
                args: args.join(" "),
                code,
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(output.stdout)
    }

    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<Vec<u8>> {
        self.run(&self.git_bin, cwd, args)
    }

    fn git_stdout(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let stdout = self.run_git(cwd, args)?;
        String::from_utf8(stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| HostError::InvalidUtf8 {
                program: self.git_bin.clone(),
            })
    }
}

impl GitHost for ShellHost {
    fn current_branch(&self, cwd: &Path) -> Result<String> {
        self.git_stdout(cwd, &["branch", "--show-current"])
    }

    fn default_branch(&self, cwd: &Path) -> Result<String> {
        // Remote HEAD tracks the protected branch when a remote exists.
        let output = Command::new(&self.git_bin)
            .args(["symbolic-ref", "refs/remotes/origin/HEAD"])
            .current_dir(cwd)
            .output()
            .map_err(|e| HostError::Spawn {
                program: self.git_bin.clone(),
                source: e,
            })?;
        if output.status.success() {
            if let Ok(full_ref) = String::from_utf8(output.stdout) {
                if let Some(branch) = full_ref.trim().strip_prefix("refs/remotes/origin/") {
                    return Ok(branch.to_string());
                }
            }
        }

        for candidate in ["main", "master"] {
            if self.branch_exists(cwd, candidate)? {
                return Ok(candidate.to_string());
            }
        }

        Ok("main".to_string())
    }

    fn branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool> {
        let output = Command::new(&self.git_bin)
            .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| HostError::Spawn {
                program: self.git_bin.clone(),
                source: e,
            })?;
        Ok(output.success())
    }

    fn create_branch(&self, cwd: &Path, branch: &str, base: &str) -> Result<()> {
        self.run_git(cwd, &["branch", branch, base])?;
        Ok(())
    }

    fn checkout(&self, cwd: &Path, branch: &str) -> Result<()> {
        self.run_git(cwd, &["checkout", branch])?;
        Ok(())
    }

    fn has_uncommitted_changes(&self, cwd: &Path) -> Result<bool> {
        let status = self.git_stdout(cwd, &["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    fn worktree_add(&self, cwd: &Path, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run_git(cwd, &["worktree", "add", path_str.as_ref(), branch])?;
        Ok(())
    }

    fn worktree_remove(&self, cwd: &Path, path: &Path, force: bool) -> Result<()> {
        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str.as_ref());
        self.run_git(cwd, &args)?;
        Ok(())
    }

    fn worktree_list(&self, cwd: &Path) -> Result<Vec<WorktreeInfo>> {
        let stdout = self.git_stdout(cwd, &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&stdout))
    }

    fn worktree_prune(&self, cwd: &Path) -> Result<()> {
        self.run_git(cwd, &["worktree", "prune"])?;
        Ok(())
    }
}

/// Parse `git worktree list --porcelain` output into records.
pub fn parse_worktree_list(stdout: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch: Option<String> = None;

    for line in stdout.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            if let (Some(path), Some(head)) = (path.take(), head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    head,
                    branch: branch.take(),
                });
            }
            path = Some(PathBuf::from(p));
            branch = None;
        } else if let Some(h) = line.strip_prefix("HEAD ") {
            head = Some(h.to_string());
        } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
            branch = Some(b.to_string());
        }
    }
    if let (Some(path), Some(head)) = (path, head) {
        worktrees.push(WorktreeInfo { path, head, branch });
    }
    worktrees
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

impl From<GhIssue> for Issue {
    fn from(raw: GhIssue) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            state: raw.state,
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

impl ShellHost {
    fn gh_json<T: serde::de::DeserializeOwned>(&self, cwd: &Path, args: &[&str]) -> Result<T> {
        let stdout = self.run(&self.gh_bin, cwd, args)?;
        serde_json::from_slice(&stdout).map_err(|e| HostError::InvalidJson {
            program: self.gh_bin.clone(),
            message: e.to_string(),
        })
    }
}

impl GithubHost for ShellHost {
    fn issue(&self, cwd: &Path, number: u64) -> Result<Issue> {
        let raw: GhIssue = self.gh_json(
            cwd,
            &[
                "issue",
                "view",
                &number.to_string(),
                "--json",
                "number,title,state,labels",
            ],
        )?;
        Ok(raw.into())
    }

    fn list_issues(&self, cwd: &Path, labels: &[String]) -> Result<Vec<Issue>> {
        let mut args = vec![
            "issue".to_string(),
            "list".to_string(),
            "--json".to_string(),
            "number,title,state,labels".to_string(),
        ];
        for label in labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let raw: Vec<GhIssue> = self.gh_json(cwd, &arg_refs)?;
        Ok(raw.into_iter().map(Issue::from).collect())
    }

    fn linked_branches(&self, cwd: &Path, issue: u64) -> Result<Vec<String>> {
        #[derive(Debug, Deserialize)]
        struct Linked {
            #[serde(default)]
            #[serde(rename = "linkedBranches")]
            linked_branches: Vec<LinkedBranch>,
        }
        #[derive(Debug, Deserialize)]
        struct LinkedBranch {
            name: String,
        }
        let raw: Linked = self.gh_json(
            cwd,
            &[
                "issue",
                "view",
                &issue.to_string(),
                "--json",
                "linkedBranches",
            ],
        )?;
        Ok(raw.linked_branches.into_iter().map(|b| b.name).collect())
    }

    fn create_linked_branch(
        &self,
        cwd: &Path,
        issue: u64,
        branch: &str,
        base: &str,
    ) -> Result<()> {
        self.run(
            &self.gh_bin,
            cwd,
            &[
                "issue",
                "develop",
                &issue.to_string(),
                "--name",
                branch,
                "--base",
                base,
            ],
        )?;
        Ok(())
    }

    fn create_issue(
        &self,
        cwd: &Path,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64> {
        let mut args = vec![
            "issue".to_string(),
            "create".to_string(),
            "--title".to_string(),
            title.to_string(),
            "--body".to_string(),
            body.to_string(),
        ];
        for label in labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&self.gh_bin, cwd, &arg_refs)?;
        let text = String::from_utf8(stdout).map_err(|_| HostError::InvalidUtf8 {
            program: self.gh_bin.clone(),
        })?;
        // `gh issue create` prints the issue URL; the number is the last
        // path segment.
        text.trim()
            .rsplit('/')
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| HostError::InvalidJson {
                program: self.gh_bin.clone(),
                message: format!("could not parse issue number from: {}", text.trim()),
            })
    }
}

impl AgentHost for ShellHost {
    fn spawn(&self, prompt: &str, cwd: &Path, session: Option<&str>) -> Result<AgentOutcome> {
        let mut command = Command::new(&self.agent_bin);
        command.current_dir(cwd);
        if let Some(session) = session {
            command.args(["--resume", session]);
        }
        command.arg(prompt);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        tracing::info!(agent = %self.agent_bin, cwd = %cwd.display(), "launching agent");
        let status = command.status().map_err(|e| HostError::Spawn {
            program: self.agent_bin.clone(),
            source: e,
        })?;
        Ok(AgentOutcome {
            exit_code: status.code().unwrap_or(-1),
            session_id: session.map(ToString::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn setup_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        StdCommand::new("git")
            .args(["init"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "# Test").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn default_branch_falls_back_to_local() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let branch = host.default_branch(dir.path()).unwrap();
        assert!(branch == "main" || branch == "master");
    }

    #[test]
    fn branch_create_and_exists() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        assert!(!host.branch_exists(dir.path(), "feat/x").unwrap());
        host.create_branch(dir.path(), "feat/x", "HEAD").unwrap();
        assert!(host.branch_exists(dir.path(), "feat/x").unwrap());
    }

    #[test]
    fn uncommitted_changes_detected() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        assert!(!host.has_uncommitted_changes(dir.path()).unwrap());
        std::fs::write(dir.path().join("dirty.txt"), "x").unwrap();
        assert!(host.has_uncommitted_changes(dir.path()).unwrap());
    }

    #[test]
    fn command_failure_carries_stderr_tail() {
        let dir = setup_test_repo();
        let host = ShellHost::default();
        let err = host
            .checkout(dir.path(), "no-such-branch")
            .unwrap_err();
        match err {
            HostError::CommandFailed { code, stderr, .. } => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_worktree_list_porcelain() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.sow/worktrees/feat/x\nHEAD def456\nbranch refs/heads/feat/x\n\nworktree /repo/detached\nHEAD 999fff\ndetached\n";
        let list = parse_worktree_list(output);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].branch.as_deref(), Some("main"));
        assert_eq!(list[1].path, PathBuf::from("/repo/.sow/worktrees/feat/x"));
        assert_eq!(list[1].branch.as_deref(), Some("feat/x"));
        assert_eq!(list[2].branch, None);
        assert_eq!(list[2].head, "999fff");
    }

    #[test]
    fn stderr_tail_bounds_output() {
        let long = "e".repeat(10_000);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.len() <= STDERR_TAIL_BYTES + 4);
        assert!(tail.starts_with('…'));
    }
}
