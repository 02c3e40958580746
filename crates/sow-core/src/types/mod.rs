//! Shipping project types.
//!
//! Each submodule defines one project type with the DSL and registers it in
//! `registry::builtin()`. Shared guard predicates and phase actions live
//! here; they are the vocabulary the individual definitions compose.

use crate::dsl::ActionCtx;
use crate::error::Result;
use crate::model::{Project, TaskStatus};

pub mod breakdown;
pub mod design;
pub mod exploration;
pub mod standard;

/// True when the phase has at least one approved output of `kind`.
pub(crate) fn has_approved_output(project: &Project, phase: &str, kind: &str) -> bool {
    project
        .phase(phase)
        .map(|p| p.outputs_of_kind(kind).any(|a| a.approved))
        .unwrap_or(false)
}

/// True when the phase has at least one output of `kind` and every one of
/// them is approved.
pub(crate) fn all_outputs_approved(project: &Project, phase: &str, kind: &str) -> bool {
    project
        .phase(phase)
        .map(|p| {
            let mut any = false;
            for artifact in p.outputs_of_kind(kind) {
                any = true;
                if !artifact.approved {
                    return false;
                }
            }
            any
        })
        .unwrap_or(false)
}

/// Every task completed or abandoned, with at least one task present.
pub(crate) fn all_tasks_resolved(project: &Project, phase: &str) -> bool {
    project
        .phase(phase)
        .map(|p| !p.tasks.is_empty() && p.tasks.iter().all(|t| t.status.is_resolved()))
        .unwrap_or(false)
}

/// Every task resolved and at least one actually completed (a phase where
/// everything was abandoned did not produce work).
pub(crate) fn all_tasks_resolved_some_completed(project: &Project, phase: &str) -> bool {
    all_tasks_resolved(project, phase)
        && project
            .phase(phase)
            .map(|p| p.tasks.iter().any(|t| t.status == TaskStatus::Completed))
            .unwrap_or(false)
}

/// Every task completed; abandoned tasks do not count.
pub(crate) fn all_tasks_completed(project: &Project, phase: &str) -> bool {
    project
        .phase(phase)
        .map(|p| {
            !p.tasks.is_empty() && p.tasks.iter().all(|t| t.status == TaskStatus::Completed)
        })
        .unwrap_or(false)
}

/// Boolean metadata flag on a phase.
pub(crate) fn phase_flag(project: &Project, phase: &str, key: &str) -> bool {
    project
        .phase(phase)
        .map(|p| p.metadata_bool(key))
        .unwrap_or(false)
}

/// OnEntry action marking a phase active.
pub(crate) fn activate_phase(
    name: &'static str,
) -> impl Fn(&mut ActionCtx<'_>) -> Result<()> + Send + Sync + 'static {
    move |ctx| {
        if let Some(phase) = ctx.project.phase_mut(name) {
            phase.activate();
        }
        Ok(())
    }
}

/// OnExit action marking a phase completed.
pub(crate) fn complete_phase(
    name: &'static str,
) -> impl Fn(&mut ActionCtx<'_>) -> Result<()> + Send + Sync + 'static {
    move |ctx| {
        if let Some(phase) = ctx.project.phase_mut(name) {
            phase.complete();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, Phase, Task};

    fn project_with_phase(name: &str, phase: Phase) -> Project {
        let registry = crate::registry::builtin();
        let config = registry.get("standard").unwrap();
        let mut project = config.new_project("demo", "feat/x", "", None);
        project.phases.insert(name.to_string(), phase);
        project
    }

    #[test]
    fn has_approved_output_requires_approval() {
        let mut phase = Phase::default();
        phase.outputs.push(Artifact::new("review", "review/1.md"));
        let project = project_with_phase("review", phase);
        assert!(!has_approved_output(&project, "review", "review"));

        let mut phase = Phase::default();
        let mut artifact = Artifact::new("review", "review/1.md");
        artifact.approved = true;
        phase.outputs.push(artifact);
        let project = project_with_phase("review", phase);
        assert!(has_approved_output(&project, "review", "review"));
    }

    #[test]
    fn all_outputs_approved_requires_every_one() {
        let mut phase = Phase::default();
        let mut a = Artifact::new("summary", "s/1.md");
        a.approved = true;
        phase.outputs.push(a);
        phase.outputs.push(Artifact::new("summary", "s/2.md"));
        let project = project_with_phase("planning", phase);
        assert!(!all_outputs_approved(&project, "planning", "summary"));
    }

    #[test]
    fn all_outputs_approved_requires_at_least_one() {
        let project = project_with_phase("planning", Phase::default());
        assert!(!all_outputs_approved(&project, "planning", "summary"));
    }

    #[test]
    fn task_resolution_predicates() {
        let mut phase = Phase::default();
        let mut completed = Task::new("010", "a", "implementer", "");
        completed.status = TaskStatus::Completed;
        let mut abandoned = Task::new("020", "b", "implementer", "");
        abandoned.status = TaskStatus::Abandoned;
        phase.tasks.push(completed);
        phase.tasks.push(abandoned);
        let project = project_with_phase("implementation", phase);

        assert!(all_tasks_resolved(&project, "implementation"));
        assert!(all_tasks_resolved_some_completed(&project, "implementation"));
        // Abandoned tasks are not enough for the stricter predicate.
        assert!(!all_tasks_completed(&project, "implementation"));
    }

    #[test]
    fn empty_phase_has_no_resolved_tasks() {
        let project = project_with_phase("implementation", Phase::default());
        assert!(!all_tasks_resolved(&project, "implementation"));
        assert!(!all_tasks_completed(&project, "implementation"));
    }
}
