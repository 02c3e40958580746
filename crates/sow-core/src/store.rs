//! Persistent project state.
//!
//! One YAML document per project at `project/state.yaml` plus one per task
//! at `project/phases/<phase>/tasks/<id>/state.yaml`. The store is the only
//! writer; every save validates first, bumps `updated_at`, writes task
//! documents, and commits by atomically renaming the root document into
//! place last.

use crate::error::{Error, Result};
use crate::fsys::ScopedFs;
use crate::model::{Metadata, Phase, PhaseStatus, Project, Task};
use crate::registry::TypeRegistry;
use crate::schema::{self, SchemaError, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_FILE: &str = "project/state.yaml";
pub const LOG_FILE: &str = "project/log.md";

/// Abstract persistence boundary for a single project.
pub trait Backend {
    fn load(&self) -> Result<Project>;
    fn save(&self, project: &mut Project) -> Result<()>;
    fn create(&self, project: &mut Project) -> Result<()>;
    fn delete(&self) -> Result<()>;
    fn exists(&self) -> bool;
    /// Append one entry to the orchestrator log.
    fn append_log(&self, entry: &str) -> Result<()>;
}

/// Root document: the project with tasks reduced to id references.
#[derive(Debug, Serialize, Deserialize)]
struct RootDoc {
    schema_version: u32,
    name: String,
    #[serde(rename = "type")]
    project_type: String,
    branch: String,
    #[serde(default)]
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issue: Option<u64>,
    current_state: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(default)]
    phases: BTreeMap<String, PhaseDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PhaseDoc {
    status: PhaseStatus,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    iteration: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<crate::model::Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<crate::model::Artifact>,
    /// Ids of the tasks persisted under `phases/<phase>/tasks/`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

/// Per-task document; mirrors the task entity.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDoc {
    schema_version: u32,
    #[serde(flatten)]
    task: Task,
}

fn task_dir(phase: &str, id: &str) -> String {
    format!("project/phases/{phase}/tasks/{id}")
}

fn task_state_path(phase: &str, id: &str) -> String {
    format!("{}/state.yaml", task_dir(phase, id))
}

fn yaml_invalid(err: &serde_yaml::Error) -> Error {
    Error::SchemaInvalid(SchemaError::Yaml(err.to_string()))
}

/// YAML-backed store over a scoped filesystem rooted at `.sow/`.
#[derive(Debug)]
pub struct YamlStore<'r> {
    fs: ScopedFs,
    registry: &'r TypeRegistry,
}

impl<'r> YamlStore<'r> {
    pub fn new(fs: ScopedFs, registry: &'r TypeRegistry) -> Self {
        Self { fs, registry }
    }

    pub fn fs(&self) -> &ScopedFs {
        &self.fs
    }

    fn write_task(&self, phase: &str, task: &Task) -> Result<()> {
        let doc = TaskDoc {
            schema_version: SCHEMA_VERSION,
            task: task.clone(),
        };
        let yaml = serde_yaml::to_string(&doc).map_err(|e| yaml_invalid(&e))?;
        self.fs.write(task_state_path(phase, &task.id), &yaml)?;
        Ok(())
    }

    fn read_task(&self, phase: &str, id: &str) -> Result<Task> {
        let path = task_state_path(phase, id);
        if !self.fs.exists(&path) {
            return Err(Error::NotFound(format!("task {id} in phase {phase}")));
        }
        let raw = self.fs.read(&path)?;
        let doc: TaskDoc = serde_yaml::from_str(&raw).map_err(|e| yaml_invalid(&e))?;
        schema::check_version(doc.schema_version)?;
        Ok(doc.task)
    }

    fn write_all(&self, project: &Project) -> Result<()> {
        let mut phases = BTreeMap::new();
        for (name, phase) in &project.phases {
            for task in &phase.tasks {
                self.write_task(name, task)?;
            }
            phases.insert(
                name.clone(),
                PhaseDoc {
                    status: phase.status,
                    enabled: phase.enabled,
                    started_at: phase.started_at,
                    completed_at: phase.completed_at,
                    iteration: phase.iteration,
                    inputs: phase.inputs.clone(),
                    outputs: phase.outputs.clone(),
                    tasks: phase.tasks.iter().map(|t| t.id.clone()).collect(),
                    metadata: phase.metadata.clone(),
                },
            );
        }

        let root = RootDoc {
            schema_version: SCHEMA_VERSION,
            name: project.name.clone(),
            project_type: project.project_type.clone(),
            branch: project.branch.clone(),
            description: project.description.clone(),
            created_at: project.created_at,
            updated_at: project.updated_at,
            issue: project.issue,
            current_state: project.current_state.clone(),
            metadata: project.metadata.clone(),
            phases,
        };
        let yaml = serde_yaml::to_string(&root).map_err(|e| yaml_invalid(&e))?;
        // Root document last: its rename is the commit point.
        self.fs.write(STATE_FILE, &yaml)?;
        Ok(())
    }
}

impl Backend for YamlStore<'_> {
    fn load(&self) -> Result<Project> {
        if !self.fs.exists(STATE_FILE) {
            return Err(Error::NotFound("project".to_string()));
        }
        let raw = self.fs.read(STATE_FILE)?;
        let root: RootDoc = serde_yaml::from_str(&raw).map_err(|e| yaml_invalid(&e))?;
        schema::check_version(root.schema_version)?;

        let mut phases = BTreeMap::new();
        for (name, doc) in root.phases {
            let mut tasks = Vec::with_capacity(doc.tasks.len());
            for id in &doc.tasks {
                tasks.push(self.read_task(&name, id)?);
            }
            phases.insert(
                name,
                Phase {
                    status: doc.status,
                    enabled: doc.enabled,
                    started_at: doc.started_at,
                    completed_at: doc.completed_at,
                    iteration: doc.iteration,
                    inputs: doc.inputs,
                    outputs: doc.outputs,
                    tasks,
                    metadata: doc.metadata,
                },
            );
        }

        let project = Project {
            name: root.name,
            project_type: root.project_type,
            branch: root.branch,
            description: root.description,
            created_at: root.created_at,
            updated_at: root.updated_at,
            issue: root.issue,
            current_state: root.current_state,
            phases,
            metadata: root.metadata,
        };

        schema::validate_project(&project, self.registry)?;
        Ok(project)
    }

    fn save(&self, project: &mut Project) -> Result<()> {
        // Validation short-circuits before anything reaches disk.
        schema::validate_project(project, self.registry)?;
        project.updated_at = Utc::now();
        self.write_all(project)?;
        tracing::debug!(project = %project.name, state = %project.current_state, "saved");
        Ok(())
    }

    fn create(&self, project: &mut Project) -> Result<()> {
        if self.exists() {
            return Err(Error::AlreadyExists("project".to_string()));
        }
        self.fs.mkdir_all("project")?;
        self.save(project)?;
        self.append_log(&format!(
            "created project {} (type {})",
            project.name, project.project_type
        ))?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if !self.exists() {
            return Err(Error::NotFound("project".to_string()));
        }
        self.fs.remove_all("project")?;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.fs.exists(STATE_FILE)
    }

    fn append_log(&self, entry: &str) -> Result<()> {
        let line = format!("- {} {entry}", Utc::now().to_rfc3339());
        self.fs.append(LOG_FILE, &line)?;
        Ok(())
    }
}
