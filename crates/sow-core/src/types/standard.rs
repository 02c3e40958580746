//! The `standard` project type: planning, implementation, review, finalize.
//!
//! This is the full human-approved loop: plan the work, execute approved
//! tasks, review the result, and either finalize or fall back to
//! implementation planning with the completed tasks rewound.

use super::{
    activate_phase, all_tasks_resolved_some_completed, complete_phase, has_approved_output,
    phase_flag,
};
use crate::dsl::{Branch, PhaseSpec, ProjectTypeBuilder, ProjectTypeConfig, TransitionOpts};
use crate::model::{PhaseStatus, Project};

pub const TYPE_NAME: &str = "standard";

pub const NO_PROJECT: &str = "NoProject";
pub const PLANNING_ACTIVE: &str = "PlanningActive";
pub const IMPLEMENTATION_PLANNING: &str = "ImplementationPlanning";
pub const IMPLEMENTATION_EXECUTING: &str = "ImplementationExecuting";
pub const REVIEW_ACTIVE: &str = "ReviewActive";
pub const FINALIZE_DOCUMENTATION: &str = "FinalizeDocumentation";
pub const FINALIZE_CHECKS: &str = "FinalizeChecks";
pub const FINALIZE_DELETE: &str = "FinalizeDelete";

pub const PHASE_PLANNING: &str = "planning";
pub const PHASE_IMPLEMENTATION: &str = "implementation";
pub const PHASE_REVIEW: &str = "review";
pub const PHASE_FINALIZE: &str = "finalize";

/// Review verdict recorded on the latest approved review artifact.
fn review_assessment(project: &Project) -> Option<String> {
    project
        .phase(PHASE_REVIEW)
        .and_then(|p| p.latest_approved_output("review"))
        .and_then(|a| a.metadata_str("assessment"))
        .map(ToString::to_string)
}

pub fn config() -> ProjectTypeConfig {
    ProjectTypeBuilder::new(TYPE_NAME)
        .phase(
            PHASE_PLANNING,
            PhaseSpec::new().inputs(&["context"]).outputs(&["task_list", "context"]),
        )
        .phase(
            PHASE_IMPLEMENTATION,
            PhaseSpec::new()
                .inputs(&["feedback", "context"])
                .outputs(&["summary"])
                .with_tasks(),
        )
        .phase(
            PHASE_REVIEW,
            PhaseSpec::new().inputs(&["context"]).outputs(&["review"]),
        )
        .phase(PHASE_FINALIZE, PhaseSpec::new().outputs(&["summary"]))
        .initial_state(NO_PROJECT)
        .transition(
            NO_PROJECT,
            PLANNING_ACTIVE,
            "project_init",
            TransitionOpts::new()
                .description("start the project and activate planning")
                .on_entry(activate_phase(PHASE_PLANNING)),
        )
        .transition(
            PLANNING_ACTIVE,
            IMPLEMENTATION_PLANNING,
            "complete_planning",
            TransitionOpts::new()
                .guard(
                    "phase planning needs at least one approved task_list output",
                    |p| has_approved_output(p, PHASE_PLANNING, "task_list"),
                )
                .on_exit(complete_phase(PHASE_PLANNING))
                .on_entry(activate_phase(PHASE_IMPLEMENTATION)),
        )
        .transition(
            IMPLEMENTATION_PLANNING,
            IMPLEMENTATION_EXECUTING,
            "tasks_approved",
            TransitionOpts::new()
                .guard(
                    "phase implementation needs tasks_approved metadata and at least one task",
                    |p| {
                        phase_flag(p, PHASE_IMPLEMENTATION, "tasks_approved")
                            && p.phase(PHASE_IMPLEMENTATION)
                                .map(|phase| !phase.tasks.is_empty())
                                .unwrap_or(false)
                    },
                )
                .on_entry(|ctx| {
                    if let Some(phase) = ctx.project.phase_mut(PHASE_IMPLEMENTATION) {
                        phase.status = PhaseStatus::InProgress;
                    }
                    Ok(())
                }),
        )
        .transition(
            IMPLEMENTATION_EXECUTING,
            REVIEW_ACTIVE,
            "all_tasks_complete",
            TransitionOpts::new()
                .guard(
                    "every implementation task must be completed or abandoned, \
                     with at least one completed",
                    |p| all_tasks_resolved_some_completed(p, PHASE_IMPLEMENTATION),
                )
                .on_exit(complete_phase(PHASE_IMPLEMENTATION))
                .on_entry(activate_phase(PHASE_REVIEW)),
        )
        .branch(
            REVIEW_ACTIVE,
            review_assessment,
            vec![
                Branch::new("pass", "review_pass", FINALIZE_DOCUMENTATION).opts(
                    TransitionOpts::new()
                        .guard(
                            "latest approved review output must carry assessment \"pass\"",
                            |p| review_assessment(p).as_deref() == Some("pass"),
                        )
                        .on_exit(complete_phase(PHASE_REVIEW))
                        .on_entry(activate_phase(PHASE_FINALIZE)),
                ),
                Branch::new("fail", "review_fail", IMPLEMENTATION_PLANNING).opts(
                    TransitionOpts::new()
                        .guard(
                            "latest approved review output must carry assessment \"fail\"",
                            |p| review_assessment(p).as_deref() == Some("fail"),
                        )
                        .failed_phase(PHASE_IMPLEMENTATION)
                        .on_entry(|ctx| {
                            // Back to implementation planning: the task list
                            // needs re-approval and the review phase re-runs
                            // once the rework is done.
                            if let Some(phase) =
                                ctx.project.phase_mut(PHASE_IMPLEMENTATION)
                            {
                                phase.metadata.remove("tasks_approved");
                                phase.status = PhaseStatus::Active;
                                phase.completed_at = None;
                            }
                            if let Some(phase) = ctx.project.phase_mut(PHASE_REVIEW) {
                                phase.status = PhaseStatus::Pending;
                                phase.completed_at = None;
                                phase.iteration += 1;
                            }
                            Ok(())
                        }),
                ),
            ],
        )
        .transition(
            FINALIZE_DOCUMENTATION,
            FINALIZE_CHECKS,
            "documentation_done",
            TransitionOpts::new().guard(
                "phase finalize needs docs_updated metadata set to true",
                |p| phase_flag(p, PHASE_FINALIZE, "docs_updated"),
            ),
        )
        .transition(
            FINALIZE_CHECKS,
            FINALIZE_DELETE,
            "checks_done",
            TransitionOpts::new().guard(
                "phase finalize needs checks_passed metadata set to true",
                |p| phase_flag(p, PHASE_FINALIZE, "checks_passed"),
            ),
        )
        .transition(
            FINALIZE_DELETE,
            NO_PROJECT,
            "project_delete",
            TransitionOpts::new()
                .guard(
                    "phase finalize needs project_deleted metadata set to true",
                    |p| phase_flag(p, PHASE_FINALIZE, "project_deleted"),
                )
                .on_exit(complete_phase(PHASE_FINALIZE))
                .on_entry(|ctx| {
                    // Terminal transition removes the on-disk project tree.
                    ctx.fs.remove_all("project")?;
                    Ok(())
                }),
        )
        .prompt(PLANNING_ACTIVE, |p| {
            format!(
                "Project {name}: {description}\n\nPlan the work. Write a task list to \
                 `.sow/project/planning/tasks.md`, record it as a planning output of type \
                 `task_list`, and request approval.",
                name = p.name,
                description = p.description
            )
        })
        .prompt(IMPLEMENTATION_PLANNING, |p| {
            format!(
                "Project {name}: break the approved plan into implementation tasks with \
                 `sow task add`, then set the implementation phase's tasks_approved flag \
                 once a human signs off.",
                name = p.name
            )
        })
        .prompt(IMPLEMENTATION_EXECUTING, |p| {
            format!(
                "Project {name}: work the pending implementation tasks to completion, \
                 updating each task's status as you go.",
                name = p.name
            )
        })
        .prompt(REVIEW_ACTIVE, |p| {
            format!(
                "Project {name}: review the completed implementation. Record a review \
                 output with an `assessment` of pass or fail and request approval.",
                name = p.name
            )
        })
        .prompt(FINALIZE_DOCUMENTATION, |p| {
            format!(
                "Project {name}: update project documentation, then set the finalize \
                 phase's docs_updated flag.",
                name = p.name
            )
        })
        .prompt(FINALIZE_CHECKS, |p| {
            format!(
                "Project {name}: run the final checks, then set the finalize phase's \
                 checks_passed flag.",
                name = p.name
            )
        })
        .prompt(FINALIZE_DELETE, |p| {
            format!(
                "Project {name}: confirm deletion by setting the finalize phase's \
                 project_deleted flag, then advance.",
                name = p.name
            )
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, Task, TaskStatus};

    #[test]
    fn config_builds_with_expected_shape() {
        let config = config();
        assert_eq!(config.name(), TYPE_NAME);
        assert_eq!(config.initial_state(), NO_PROJECT);
        assert_eq!(config.transitions().len(), 9);
        assert_eq!(config.transitions_from(REVIEW_ACTIVE).count(), 2);
        // NoProject is both initial state and terminal sink.
        assert_eq!(config.transitions_from(NO_PROJECT).count(), 1);
        for phase in [
            PHASE_PLANNING,
            PHASE_IMPLEMENTATION,
            PHASE_REVIEW,
            PHASE_FINALIZE,
        ] {
            assert!(config.phase_spec(phase).is_some(), "missing phase {phase}");
        }
    }

    #[test]
    fn every_non_terminal_state_has_a_prompt() {
        let config = config();
        for state in [
            PLANNING_ACTIVE,
            IMPLEMENTATION_PLANNING,
            IMPLEMENTATION_EXECUTING,
            REVIEW_ACTIVE,
            FINALIZE_DOCUMENTATION,
            FINALIZE_CHECKS,
            FINALIZE_DELETE,
        ] {
            assert!(config.prompt(state).is_some(), "missing prompt for {state}");
        }
    }

    #[test]
    fn review_discriminator_follows_latest_approved_review() {
        let config = config();
        let mut project = config.new_project("demo", "feat/x", "", None);
        project.current_state = REVIEW_ACTIVE.to_string();
        assert_eq!(review_assessment(&project), None);

        let phase = project.phase_mut(PHASE_REVIEW).unwrap();
        let mut review = Artifact::new("review", "review/1.md");
        review.approved = true;
        review.metadata.insert(
            "assessment".to_string(),
            serde_yaml::Value::String("fail".to_string()),
        );
        phase.outputs.push(review);
        assert_eq!(review_assessment(&project).as_deref(), Some("fail"));

        let determiner = config.determiner(REVIEW_ACTIVE).expect("branch determiner");
        assert_eq!(determiner(&project).unwrap(), "review_fail");
    }

    #[test]
    fn tasks_approved_guard_needs_flag_and_tasks() {
        let config = config();
        let mut project = config.new_project("demo", "feat/x", "", None);
        project.current_state = IMPLEMENTATION_PLANNING.to_string();
        let transition = config
            .transition(IMPLEMENTATION_PLANNING, "tasks_approved")
            .unwrap();
        let guard = transition.guard.as_ref().unwrap();

        assert!(!(guard.check)(&project));

        let phase = project.phase_mut(PHASE_IMPLEMENTATION).unwrap();
        phase
            .metadata
            .insert("tasks_approved".to_string(), serde_yaml::Value::Bool(true));
        assert!(!(guard.check)(&project), "still no tasks");

        let phase = project.phase_mut(PHASE_IMPLEMENTATION).unwrap();
        phase.tasks.push(Task::new("010", "t", "implementer", ""));
        assert!((guard.check)(&project));
    }

    #[test]
    fn all_tasks_complete_guard_rejects_all_abandoned() {
        let config = config();
        let mut project = config.new_project("demo", "feat/x", "", None);
        project.current_state = IMPLEMENTATION_EXECUTING.to_string();
        let transition = config
            .transition(IMPLEMENTATION_EXECUTING, "all_tasks_complete")
            .unwrap();
        let guard = transition.guard.as_ref().unwrap();

        let phase = project.phase_mut(PHASE_IMPLEMENTATION).unwrap();
        let mut task = Task::new("010", "t", "implementer", "");
        task.status = TaskStatus::Abandoned;
        phase.tasks.push(task);
        assert!(!(guard.check)(&project));

        let phase = project.phase_mut(PHASE_IMPLEMENTATION).unwrap();
        phase.tasks[0].status = TaskStatus::Completed;
        assert!((guard.check)(&project));
    }
}
