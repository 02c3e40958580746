//! The `exploration` project type: a linear investigate → summarize →
//! finalize chain.

use super::{
    activate_phase, all_outputs_approved, all_tasks_completed, all_tasks_resolved,
    complete_phase,
};
use crate::dsl::{PhaseSpec, ProjectTypeBuilder, ProjectTypeConfig, TransitionOpts};

pub const TYPE_NAME: &str = "exploration";

pub const ACTIVE: &str = "Active";
pub const SUMMARIZING: &str = "Summarizing";
pub const FINALIZING: &str = "Finalizing";
pub const COMPLETED: &str = "Completed";

pub const PHASE_EXPLORATION: &str = "exploration";
pub const PHASE_FINALIZATION: &str = "finalization";

pub fn config() -> ProjectTypeConfig {
    ProjectTypeBuilder::new(TYPE_NAME)
        .phase(
            PHASE_EXPLORATION,
            PhaseSpec::new()
                .inputs(&["context"])
                .outputs(&["summary"])
                .with_tasks(),
        )
        .phase(PHASE_FINALIZATION, PhaseSpec::new().with_tasks())
        .initial_state(ACTIVE)
        .transition(
            ACTIVE,
            SUMMARIZING,
            "complete_exploration",
            TransitionOpts::new()
                .guard(
                    "every exploration task must be completed or abandoned, \
                     with at least one task present",
                    |p| all_tasks_resolved(p, PHASE_EXPLORATION),
                )
                .description("all exploration tasks resolved; move to summarizing"),
        )
        .transition(
            SUMMARIZING,
            FINALIZING,
            "approve_summaries",
            TransitionOpts::new()
                .guard(
                    "the exploration phase needs at least one summary output, all approved",
                    |p| all_outputs_approved(p, PHASE_EXPLORATION, "summary"),
                )
                .on_exit(complete_phase(PHASE_EXPLORATION))
                .on_entry(activate_phase(PHASE_FINALIZATION)),
        )
        .transition(
            FINALIZING,
            COMPLETED,
            "complete_finalization",
            TransitionOpts::new()
                .guard(
                    "every finalization task must be completed (abandoned is not enough)",
                    |p| all_tasks_completed(p, PHASE_FINALIZATION),
                )
                .on_exit(complete_phase(PHASE_FINALIZATION)),
        )
        .prompt(ACTIVE, |p| {
            format!(
                "Exploration {name}: {description}\n\nInvestigate with exploration tasks; \
                 resolve every task before moving on.",
                name = p.name,
                description = p.description
            )
        })
        .prompt(SUMMARIZING, |p| {
            format!(
                "Exploration {name}: write up your findings as summary outputs of the \
                 exploration phase and request approval.",
                name = p.name
            )
        })
        .prompt(FINALIZING, |p| {
            format!(
                "Exploration {name}: complete the finalization tasks to wrap up.",
                name = p.name
            )
        })
        .build()
}
