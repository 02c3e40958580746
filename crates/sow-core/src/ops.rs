//! Mutating operations the CLI commands translate into.
//!
//! Every operation is load, mutate in memory, validate, atomic save, then a
//! one-line entry in the orchestrator log. Field setters take dotted paths
//! against a whitelist; anything else is rejected before it can reach disk.

use crate::agents;
use crate::error::{Error, Result};
use crate::fsys::ScopedFs;
use crate::model::{Artifact, Metadata, PhaseStatus, Project, Task, TaskStatus};
use crate::registry::TypeRegistry;
use crate::schema::SchemaError;
use crate::store::Backend;
use chrono::Utc;

/// Which artifact sequence an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSeq {
    Inputs,
    Outputs,
}

impl ArtifactSeq {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
        }
    }
}

/// Parse a CLI value into YAML: `true` becomes a bool, `42` a number,
/// anything else a string.
pub fn parse_value(value: &str) -> serde_yaml::Value {
    serde_yaml::from_str(value).unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()))
}

fn unknown_field(field: &str) -> Error {
    Error::SchemaInvalid(SchemaError::UnknownField(field.to_string()))
}

fn field_value(field: &str, message: impl Into<String>) -> Error {
    Error::SchemaInvalid(SchemaError::FieldValue {
        field: field.to_string(),
        message: message.into(),
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    parse_value(value)
        .as_bool()
        .ok_or_else(|| field_value(field, format!("expected true or false, got {value:?}")))
}

/// Task/artifact operations over one project store.
pub struct Ops<'a> {
    store: &'a dyn Backend,
    fs: &'a ScopedFs,
    registry: &'a TypeRegistry,
}

impl std::fmt::Debug for Ops<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ops").finish_non_exhaustive()
    }
}

impl<'a> Ops<'a> {
    pub fn new(store: &'a dyn Backend, fs: &'a ScopedFs, registry: &'a TypeRegistry) -> Self {
        Self {
            store,
            fs,
            registry,
        }
    }

    /// The phase task commands operate on: the first declared phase that
    /// supports tasks and is currently active or in progress.
    fn active_tasks_phase(&self, project: &Project) -> Result<String> {
        let config = self.registry.lookup(&project.project_type)?;
        for name in config.phase_names() {
            let Some(spec) = config.phase_spec(name) else {
                continue;
            };
            if !spec.tasks {
                continue;
            }
            if let Some(phase) = project.phase(name) {
                if matches!(phase.status, PhaseStatus::Active | PhaseStatus::InProgress) {
                    return Ok(name.to_string());
                }
            }
        }
        Err(Error::NotFound(
            "active phase that supports tasks".to_string(),
        ))
    }

    fn check_artifact_kind(
        &self,
        project: &Project,
        phase: &str,
        seq: ArtifactSeq,
        kind: &str,
    ) -> Result<()> {
        let config = self.registry.lookup(&project.project_type)?;
        let Some(spec) = config.phase_spec(phase) else {
            return Err(Error::NotFound(format!("phase {phase:?}")));
        };
        let allowed = match seq {
            ArtifactSeq::Inputs => &spec.allowed_input_kinds,
            ArtifactSeq::Outputs => &spec.allowed_output_kinds,
        };
        // An empty vocabulary leaves the phase unrestricted.
        if !allowed.is_empty() && !allowed.iter().any(|k| k == kind) {
            return Err(field_value(
                "type",
                format!(
                    "artifact type {kind:?} is not allowed for {} of phase {phase}",
                    seq.as_str()
                ),
            ));
        }
        Ok(())
    }

    /// Allocate the next task id, create the task and its files.
    pub fn add_task(
        &self,
        name: &str,
        agent: &str,
        description: &str,
        metadata: Metadata,
    ) -> Result<Task> {
        if !agents::is_registered(agent) {
            return Err(Error::SchemaInvalid(SchemaError::UnknownAgent {
                id: "new".to_string(),
                agent: agent.to_string(),
            }));
        }
        let mut project = self.store.load()?;
        let phase_name = self.active_tasks_phase(&project)?;
        let phase = project
            .phase_mut(&phase_name)
            .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
        let id = phase.next_task_id();
        let mut task = Task::new(&id, name, agent, description);
        task.metadata = metadata;
        phase.tasks.push(task.clone());

        self.store.save(&mut project)?;

        let dir = format!("project/phases/{phase_name}/tasks/{id}");
        self.fs
            .write(format!("{dir}/description.md"), &format!("{description}\n"))?;
        self.fs.write(format!("{dir}/log.md"), "")?;
        let phase_log = format!("project/phases/{phase_name}/log.md");
        if !self.fs.exists(&phase_log) {
            self.fs.write(&phase_log, "")?;
        }

        self.store
            .append_log(&format!("task {id} ({name}) added to {phase_name}"))?;
        Ok(task)
    }

    /// Typed setter for task fields. Moving a completed task backwards bumps
    /// its iteration; iterations never decrease.
    pub fn set_task_field(&self, id: &str, field: &str, value: &str) -> Result<()> {
        let mut project = self.store.load()?;
        let phase_name = project
            .find_task(id)
            .map(|(phase, _)| phase.to_string())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let task = project
            .phase_mut(&phase_name)
            .and_then(|p| p.task_mut(id))
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        match field {
            "status" => {
                let new = TaskStatus::parse(value)
                    .ok_or_else(|| field_value(field, format!("unknown status {value:?}")))?;
                let backwards = task.status == TaskStatus::Completed
                    && !matches!(new, TaskStatus::Completed | TaskStatus::Abandoned);
                task.status = new;
                if backwards {
                    task.iteration += 1;
                }
            }
            "iteration" => {
                let new: u32 = value
                    .parse()
                    .map_err(|_| field_value(field, format!("expected an integer, got {value:?}")))?;
                if new < task.iteration {
                    return Err(field_value(field, "iteration may only increase"));
                }
                task.iteration = new;
            }
            "session_id" => {
                task.session_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "name" => task.name = value.to_string(),
            "description" => task.description = value.to_string(),
            "agent" => {
                if !agents::is_registered(value) {
                    return Err(Error::SchemaInvalid(SchemaError::UnknownAgent {
                        id: id.to_string(),
                        agent: value.to_string(),
                    }));
                }
                task.agent = value.to_string();
            }
            _ => {
                let Some(key) = field.strip_prefix("metadata.") else {
                    return Err(unknown_field(field));
                };
                task.metadata.insert(key.to_string(), parse_value(value));
            }
        }
        task.updated_at = Utc::now();

        if field == "description" {
            let dir = format!("project/phases/{phase_name}/tasks/{id}");
            self.fs
                .write(format!("{dir}/description.md"), &format!("{value}\n"))?;
        }

        self.store.save(&mut project)?;
        self.store
            .append_log(&format!("task {id} {field} = {value}"))?;
        Ok(())
    }

    pub fn add_task_artifact(
        &self,
        id: &str,
        seq: ArtifactSeq,
        kind: &str,
        path: &str,
        metadata: Metadata,
    ) -> Result<()> {
        let mut project = self.store.load()?;
        let phase_name = project
            .find_task(id)
            .map(|(phase, _)| phase.to_string())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        self.check_artifact_kind(&project, &phase_name, seq, kind)?;

        let task = project
            .phase_mut(&phase_name)
            .and_then(|p| p.task_mut(id))
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut task.inputs,
            ArtifactSeq::Outputs => &mut task.outputs,
        };
        if artifacts.iter().any(|a| a.path == path) {
            return Err(Error::AlreadyExists(format!(
                "artifact path {path:?} in task {id} {}",
                seq.as_str()
            )));
        }
        let mut artifact = Artifact::new(kind, path);
        artifact.metadata = metadata;
        artifacts.push(artifact);
        task.updated_at = Utc::now();

        self.store.save(&mut project)?;
        self.store.append_log(&format!(
            "task {id} {} += {kind} {path}",
            seq.as_str()
        ))?;
        Ok(())
    }

    pub fn set_task_artifact_field(
        &self,
        id: &str,
        seq: ArtifactSeq,
        index: usize,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let mut project = self.store.load()?;
        let phase_name = project
            .find_task(id)
            .map(|(phase, _)| phase.to_string())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let task = project
            .phase_mut(&phase_name)
            .and_then(|p| p.task_mut(id))
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut task.inputs,
            ArtifactSeq::Outputs => &mut task.outputs,
        };
        let scope = format!("task {id} {}", seq.as_str());
        set_artifact_field(artifacts, index, &scope, field, value)?;
        task.updated_at = Utc::now();

        self.store.save(&mut project)?;
        self.store
            .append_log(&format!("{scope}[{index}] {field} = {value}"))?;
        Ok(())
    }

    pub fn remove_task_artifact(&self, id: &str, seq: ArtifactSeq, index: usize) -> Result<()> {
        let mut project = self.store.load()?;
        let phase_name = project
            .find_task(id)
            .map(|(phase, _)| phase.to_string())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let task = project
            .phase_mut(&phase_name)
            .and_then(|p| p.task_mut(id))
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut task.inputs,
            ArtifactSeq::Outputs => &mut task.outputs,
        };
        if index >= artifacts.len() {
            return Err(Error::NotFound(format!(
                "artifact {index} in task {id} {}",
                seq.as_str()
            )));
        }
        let removed = artifacts.remove(index);
        task.updated_at = Utc::now();

        self.store.save(&mut project)?;
        self.store.append_log(&format!(
            "task {id} {} -= {}",
            seq.as_str(),
            removed.path
        ))?;
        Ok(())
    }

    pub fn add_phase_artifact(
        &self,
        phase_name: &str,
        seq: ArtifactSeq,
        kind: &str,
        path: &str,
        metadata: Metadata,
    ) -> Result<()> {
        let mut project = self.store.load()?;
        self.check_artifact_kind(&project, phase_name, seq, kind)?;
        let phase = project
            .phase_mut(phase_name)
            .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut phase.inputs,
            ArtifactSeq::Outputs => &mut phase.outputs,
        };
        if artifacts.iter().any(|a| a.path == path) {
            return Err(Error::AlreadyExists(format!(
                "artifact path {path:?} in phase {phase_name} {}",
                seq.as_str()
            )));
        }
        let mut artifact = Artifact::new(kind, path);
        artifact.metadata = metadata;
        artifacts.push(artifact);

        self.store.save(&mut project)?;
        self.store.append_log(&format!(
            "phase {phase_name} {} += {kind} {path}",
            seq.as_str()
        ))?;
        Ok(())
    }

    pub fn set_phase_artifact_field(
        &self,
        phase_name: &str,
        seq: ArtifactSeq,
        index: usize,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let mut project = self.store.load()?;
        let phase = project
            .phase_mut(phase_name)
            .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut phase.inputs,
            ArtifactSeq::Outputs => &mut phase.outputs,
        };
        let scope = format!("phase {phase_name} {}", seq.as_str());
        set_artifact_field(artifacts, index, &scope, field, value)?;

        self.store.save(&mut project)?;
        self.store
            .append_log(&format!("{scope}[{index}] {field} = {value}"))?;
        Ok(())
    }

    pub fn remove_phase_artifact(
        &self,
        phase_name: &str,
        seq: ArtifactSeq,
        index: usize,
    ) -> Result<()> {
        let mut project = self.store.load()?;
        let phase = project
            .phase_mut(phase_name)
            .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
        let artifacts = match seq {
            ArtifactSeq::Inputs => &mut phase.inputs,
            ArtifactSeq::Outputs => &mut phase.outputs,
        };
        if index >= artifacts.len() {
            return Err(Error::NotFound(format!(
                "artifact {index} in phase {phase_name} {}",
                seq.as_str()
            )));
        }
        let removed = artifacts.remove(index);

        self.store.save(&mut project)?;
        self.store.append_log(&format!(
            "phase {phase_name} {} -= {}",
            seq.as_str(),
            removed.path
        ))?;
        Ok(())
    }

    pub fn set_phase_metadata(&self, phase_name: &str, key: &str, value: &str) -> Result<()> {
        let mut project = self.store.load()?;
        let phase = project
            .phase_mut(phase_name)
            .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
        phase.metadata.insert(key.to_string(), parse_value(value));

        self.store.save(&mut project)?;
        self.store
            .append_log(&format!("phase {phase_name} metadata {key} = {value}"))?;
        Ok(())
    }

    /// Whitelisted phase fields: `enabled`, `status`, `metadata.<key>`.
    pub fn set_phase_field(&self, phase_name: &str, field: &str, value: &str) -> Result<()> {
        match field {
            "enabled" => {
                let enabled = parse_bool(field, value)?;
                let mut project = self.store.load()?;
                let phase = project
                    .phase_mut(phase_name)
                    .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
                phase.enabled = enabled;
                self.store.save(&mut project)?;
                self.store
                    .append_log(&format!("phase {phase_name} enabled = {value}"))?;
                Ok(())
            }
            "status" => {
                let status = PhaseStatus::parse(value)
                    .ok_or_else(|| field_value(field, format!("unknown status {value:?}")))?;
                let mut project = self.store.load()?;
                let phase = project
                    .phase_mut(phase_name)
                    .ok_or_else(|| Error::NotFound(format!("phase {phase_name:?}")))?;
                phase.status = status;
                self.store.save(&mut project)?;
                self.store
                    .append_log(&format!("phase {phase_name} status = {value}"))?;
                Ok(())
            }
            _ => match field.strip_prefix("metadata.") {
                Some(key) => self.set_phase_metadata(phase_name, key, value),
                None => Err(unknown_field(field)),
            },
        }
    }

    /// Whitelisted project fields: `description`, `issue`, `metadata.<key>`,
    /// and `phase[s].<phase>.metadata.<key>`.
    pub fn set_project_field(&self, field: &str, value: &str) -> Result<()> {
        if let Some(rest) = field
            .strip_prefix("phases.")
            .or_else(|| field.strip_prefix("phase."))
        {
            let Some((phase, phase_field)) = rest.split_once('.') else {
                return Err(unknown_field(field));
            };
            return self.set_phase_field(phase, phase_field, value);
        }

        let mut project = self.store.load()?;
        match field {
            "description" => project.description = value.to_string(),
            "issue" => {
                project.issue = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        field_value(field, format!("expected an issue number, got {value:?}"))
                    })?)
                };
            }
            _ => {
                let Some(key) = field.strip_prefix("metadata.") else {
                    return Err(unknown_field(field));
                };
                project.metadata.insert(key.to_string(), parse_value(value));
            }
        }

        self.store.save(&mut project)?;
        self.store.append_log(&format!("{field} = {value}"))?;
        Ok(())
    }
}

/// Whitelisted artifact fields: `approved` and `metadata.<key>`.
fn set_artifact_field(
    artifacts: &mut [Artifact],
    index: usize,
    scope: &str,
    field: &str,
    value: &str,
) -> Result<()> {
    let Some(artifact) = artifacts.get_mut(index) else {
        return Err(Error::NotFound(format!("artifact {index} in {scope}")));
    };
    match field {
        "approved" => artifact.approved = parse_bool(field, value)?,
        _ => {
            let Some(key) = field.strip_prefix("metadata.") else {
                return Err(unknown_field(field));
            };
            artifact.metadata.insert(key.to_string(), parse_value(value));
        }
    }
    Ok(())
}
