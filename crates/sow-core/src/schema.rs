//! Structural validation of persisted project documents.
//!
//! Applied after every load and before every save; a failed save
//! short-circuits before anything is renamed into place, so the on-disk
//! document is never corrupted by an invalid write.

use crate::model::Project;
use crate::registry::TypeRegistry;
use std::collections::BTreeSet;
use thiserror::Error;

/// Version written into every document. Loaders refuse anything newer.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unsupported schema version {found}; this build understands up to {supported}")]
    Version { found: u32, supported: u32 },
    #[error("invalid yaml: {0}")]
    Yaml(String),
    #[error("project name must be kebab-case: {0:?}")]
    Name(String),
    #[error("unknown project type: {0}")]
    UnknownType(String),
    #[error("state {state:?} is not part of project type {project_type:?}")]
    UnknownState {
        state: String,
        project_type: String,
    },
    #[error("phase {phase:?} is not declared by project type {project_type:?}")]
    UnknownPhase {
        phase: String,
        project_type: String,
    },
    #[error("invalid task id {id:?} in phase {phase:?}")]
    TaskId { phase: String, id: String },
    #[error("duplicate task id {id:?} in phase {phase:?}")]
    DuplicateTaskId { phase: String, id: String },
    #[error("unknown agent role {agent:?} on task {id:?}")]
    UnknownAgent { id: String, agent: String },
    #[error("duplicate artifact path {path:?} in {scope}")]
    DuplicateArtifactPath { scope: String, path: String },
    #[error("iteration must be at least 1 in {scope}")]
    Iteration { scope: String },
    #[error("field {0:?} is not writable")]
    UnknownField(String),
    #[error("invalid value for field {field:?}: {message}")]
    FieldValue { field: String, message: String },
}

pub fn is_kebab_case(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Reject documents written by a newer build.
pub fn check_version(found: u32) -> Result<(), SchemaError> {
    if found > SCHEMA_VERSION {
        return Err(SchemaError::Version {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}

fn check_artifacts(scope: &str, artifacts: &[crate::model::Artifact]) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for artifact in artifacts {
        if !seen.insert(artifact.path.as_str()) {
            return Err(SchemaError::DuplicateArtifactPath {
                scope: scope.to_string(),
                path: artifact.path.clone(),
            });
        }
    }
    Ok(())
}

/// Validate a project against the rules the persistence layer guarantees.
pub fn validate_project(project: &Project, registry: &TypeRegistry) -> Result<(), SchemaError> {
    if !is_kebab_case(&project.name) {
        return Err(SchemaError::Name(project.name.clone()));
    }

    let Some(config) = registry.get(&project.project_type) else {
        return Err(SchemaError::UnknownType(project.project_type.clone()));
    };

    if !config.states().contains(project.current_state.as_str()) {
        return Err(SchemaError::UnknownState {
            state: project.current_state.clone(),
            project_type: project.project_type.clone(),
        });
    }

    for (phase_name, phase) in &project.phases {
        if config.phase_spec(phase_name).is_none() {
            return Err(SchemaError::UnknownPhase {
                phase: phase_name.clone(),
                project_type: project.project_type.clone(),
            });
        }
        if phase.iteration < 1 {
            return Err(SchemaError::Iteration {
                scope: format!("phase {phase_name}"),
            });
        }
        check_artifacts(&format!("phase {phase_name} inputs"), &phase.inputs)?;
        check_artifacts(&format!("phase {phase_name} outputs"), &phase.outputs)?;

        let mut ids = BTreeSet::new();
        for task in &phase.tasks {
            if task.id.len() < 3 || task.id.parse::<u32>().is_err() {
                return Err(SchemaError::TaskId {
                    phase: phase_name.clone(),
                    id: task.id.clone(),
                });
            }
            if !ids.insert(task.id.as_str()) {
                return Err(SchemaError::DuplicateTaskId {
                    phase: phase_name.clone(),
                    id: task.id.clone(),
                });
            }
            if !crate::agents::is_registered(&task.agent) {
                return Err(SchemaError::UnknownAgent {
                    id: task.id.clone(),
                    agent: task.agent.clone(),
                });
            }
            if task.iteration < 1 {
                return Err(SchemaError::Iteration {
                    scope: format!("task {}", task.id),
                });
            }
            check_artifacts(&format!("task {} inputs", task.id), &task.inputs)?;
            check_artifacts(&format!("task {} outputs", task.id), &task.outputs)?;
        }
    }

    Ok(())
}
