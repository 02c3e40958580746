//! The `design` project type: produce design documents, then a finalization
//! pass, both gated on artifact approvals.

use super::{activate_phase, all_outputs_approved, complete_phase};
use crate::dsl::{PhaseSpec, ProjectTypeBuilder, ProjectTypeConfig, TransitionOpts};

pub const TYPE_NAME: &str = "design";

pub const ACTIVE: &str = "Active";
pub const FINALIZING: &str = "Finalizing";
pub const COMPLETED: &str = "Completed";

pub const PHASE_DESIGN: &str = "design";
pub const PHASE_FINALIZATION: &str = "finalization";

pub fn config() -> ProjectTypeConfig {
    ProjectTypeBuilder::new(TYPE_NAME)
        .phase(
            PHASE_DESIGN,
            PhaseSpec::new()
                .inputs(&["context"])
                .outputs(&["design_doc"])
                .with_tasks(),
        )
        .phase(PHASE_FINALIZATION, PhaseSpec::new().outputs(&["summary"]))
        .initial_state(ACTIVE)
        .transition(
            ACTIVE,
            FINALIZING,
            "approve_design",
            TransitionOpts::new()
                .guard(
                    "the design phase needs at least one design_doc output, all approved",
                    |p| all_outputs_approved(p, PHASE_DESIGN, "design_doc"),
                )
                .on_exit(complete_phase(PHASE_DESIGN))
                .on_entry(activate_phase(PHASE_FINALIZATION)),
        )
        .transition(
            FINALIZING,
            COMPLETED,
            "approve_finalization",
            TransitionOpts::new()
                .guard(
                    "the finalization phase needs at least one summary output, all approved",
                    |p| all_outputs_approved(p, PHASE_FINALIZATION, "summary"),
                )
                .on_exit(complete_phase(PHASE_FINALIZATION)),
        )
        .prompt(ACTIVE, |p| {
            format!(
                "Design {name}: {description}\n\nProduce design documents as design_doc \
                 outputs and request approval.",
                name = p.name,
                description = p.description
            )
        })
        .prompt(FINALIZING, |p| {
            format!(
                "Design {name}: summarize the approved design as a finalization summary \
                 output and request approval.",
                name = p.name
            )
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Artifact;

    #[test]
    fn both_transitions_are_approval_gated() {
        let config = config();
        assert_eq!(config.transitions().len(), 2);
        for transition in config.transitions() {
            assert!(transition.guard.is_some());
        }
    }

    #[test]
    fn design_approval_unlocks_finalizing() {
        let config = config();
        let mut project = config.new_project("schema-redesign", "design/x", "", None);
        let guard = config
            .transition(ACTIVE, "approve_design")
            .unwrap()
            .guard
            .as_ref()
            .unwrap();
        assert!(!(guard.check)(&project));

        let phase = project.phase_mut(PHASE_DESIGN).unwrap();
        let mut doc = Artifact::new("design_doc", "design/overview.md");
        doc.approved = true;
        phase.outputs.push(doc);
        assert!((guard.check)(&project));
    }
}
