//! Data model: projects, phases, tasks, artifacts.
//!
//! These are the in-memory entities the state machine and operations work
//! over. Persistence splits them across documents (see `store`), but in
//! memory a `Project` owns its phases and each phase owns its tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata maps stay YAML-native so documents round-trip without
/// conversion.
pub type Metadata = BTreeMap<String, serde_yaml::Value>;

/// First task id in a phase; subsequent ids are `max + TASK_ID_STRIDE`.
pub const FIRST_TASK_ID: u32 = 10;
pub const TASK_ID_STRIDE: u32 = 10;

/// Phase lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    InProgress,
    Completed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    NeedsReview,
    Completed,
    Abandoned,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::NeedsReview => "needs_review",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "needs_review" => Some(Self::NeedsReview),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Terminal for the purposes of "all tasks done" guards.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

/// A typed reference to a file produced or consumed by a phase or task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Phase-defined vocabulary (`task_list`, `review`, `summary`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Path relative to `.sow/`.
    pub path: String,
    #[serde(default)]
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
            approved: false,
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_yaml::Value::as_str)
    }
}

/// A unit of work inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Zero-padded numeric, unique within the phase (`010`, `020`, ...).
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    /// Role name from the agent registry.
    pub agent: String,
    #[serde(default)]
    pub description: String,
    pub iteration: u32,
    /// Opaque handle for a resumable agent conversation; never parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            agent: agent.into(),
            description: description.into(),
            iteration: 1,
            session_id: None,
            created_at: now,
            updated_at: now,
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: Metadata::new(),
        }
    }
}

/// A named subdivision of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub status: PhaseStatus,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            enabled: true,
            started_at: None,
            completed_at: None,
            iteration: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tasks: Vec::new(),
            metadata: Metadata::new(),
        }
    }
}

impl Phase {
    /// Next task id: `max(existing) + 10`, starting at `010`. Removals do
    /// not reopen holes.
    pub fn next_task_id(&self) -> String {
        let max = self
            .tasks
            .iter()
            .filter_map(|t| t.id.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let next = if max == 0 { FIRST_TASK_ID } else { max + TASK_ID_STRIDE };
        format!("{next:03}")
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn metadata_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(false)
    }

    /// Outputs of a kind, in append order.
    pub fn outputs_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Artifact> {
        self.outputs.iter().filter(move |a| a.kind == kind)
    }

    /// Most recently appended approved output of a kind.
    pub fn latest_approved_output(&self, kind: &str) -> Option<&Artifact> {
        self.outputs
            .iter()
            .rev()
            .find(|a| a.kind == kind && a.approved)
    }

    /// Mark the phase active; first activation stamps `started_at`.
    pub fn activate(&mut self) {
        self.status = PhaseStatus::Active;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Fail-back rewind: every completed task returns to pending with its
    /// iteration bumped; the phase iteration advances too.
    pub fn rewind_completed_tasks(&mut self) {
        let now = Utc::now();
        for task in &mut self.tasks {
            if task.status == TaskStatus::Completed {
                task.status = TaskStatus::Pending;
                task.iteration += 1;
                task.updated_at = now;
            }
        }
        self.iteration += 1;
    }
}

/// One project per worktree; the unit the state machine drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Kebab-case identifier.
    pub name: String,
    /// Registered project-type name.
    #[serde(rename = "type")]
    pub project_type: String,
    pub branch: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    pub current_state: String,
    #[serde(default)]
    pub phases: BTreeMap<String, Phase>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Project {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.get(name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Option<&mut Phase> {
        self.phases.get_mut(name)
    }

    /// Find a task by id, returning its phase name with it.
    pub fn find_task(&self, id: &str) -> Option<(&str, &Task)> {
        self.phases
            .iter()
            .find_map(|(name, phase)| phase.task(id).map(|t| (name.as_str(), t)))
    }
}

/// Turn free text into a kebab-case identifier.
pub fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(8)
        .collect::<Vec<_>>()
        .join("-")
}
