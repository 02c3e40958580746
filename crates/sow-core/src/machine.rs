//! Per-project finite-state machine.
//!
//! A `Machine` combines a frozen `ProjectTypeConfig` with a loaded project.
//! Firing an event runs guard check, OnExit, state change, OnEntry and the
//! failed-phase rewind in that order; any error aborts the remaining steps.
//! State changes are in-memory only, persistence belongs to the caller.

use crate::dsl::{ActionCtx, ProjectTypeConfig, TransitionConfig};
use crate::error::{Error, Result};
use crate::model::Project;

/// One outgoing transition as reported by `permitted_transitions`.
#[derive(Debug, Clone)]
pub struct PermittedTransition {
    pub event: String,
    pub to: String,
    pub guard_satisfied: bool,
    pub description: Option<String>,
    /// `Some(true)` when this is the branch the discriminator currently
    /// selects; `Some(false)` for its unselected siblings; `None` for
    /// non-branching transitions.
    pub selected: Option<bool>,
}

/// State machine over one project type.
#[derive(Debug)]
pub struct Machine<'a> {
    config: &'a ProjectTypeConfig,
}

impl<'a> Machine<'a> {
    /// Build the machine, rejecting projects whose cursor names a state the
    /// type does not know.
    pub fn new(config: &'a ProjectTypeConfig, project: &Project) -> Result<Self> {
        if !config.states().contains(project.current_state.as_str()) {
            return Err(Error::NotFound(format!(
                "state {:?} in project type {:?}",
                project.current_state,
                config.name()
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProjectTypeConfig {
        self.config
    }

    /// Current state of the project; the machine never caches it.
    pub fn state<'p>(&self, project: &'p Project) -> &'p str {
        &project.current_state
    }

    fn find(&self, project: &Project, event: &str) -> Result<&'a TransitionConfig> {
        self.config
            .transition(&project.current_state, event)
            .ok_or_else(|| Error::EventNotConfigured {
                state: project.current_state.clone(),
                event: event.to_string(),
            })
    }

    /// Whether a matching transition exists with a satisfied guard.
    pub fn can_fire(&self, project: &Project, event: &str) -> Result<bool> {
        let transition = self.find(project, event)?;
        Ok(guard_satisfied(transition, project))
    }

    /// Every outgoing transition of the current state, with guard status and
    /// branch selection evaluated against the project.
    pub fn permitted_transitions(&self, project: &Project) -> Vec<PermittedTransition> {
        let outgoing: Vec<&TransitionConfig> = self
            .config
            .transitions_from(&project.current_state)
            .collect();

        // Evaluate each discriminator once; selection is reported per
        // branch arm.
        let mut selections: Vec<Option<bool>> = Vec::with_capacity(outgoing.len());
        for transition in &outgoing {
            let selected = transition.branch_group.and_then(|group| {
                let discriminator = self.config.discriminator(group)?;
                let choice = discriminator(project);
                Some(choice.as_deref() == transition.branch_when.as_deref())
            });
            selections.push(selected);
        }

        outgoing
            .into_iter()
            .zip(selections)
            .map(|(transition, selected)| PermittedTransition {
                event: transition.event.clone(),
                to: transition.to.clone(),
                guard_satisfied: guard_satisfied(transition, project),
                description: transition
                    .description
                    .clone()
                    .or_else(|| transition.guard.as_ref().map(|g| g.description.clone())),
                selected,
            })
            .collect()
    }

    /// Execute a transition: guard, OnExit, state change, OnEntry,
    /// failed-phase rewind. Returns the new state name.
    pub fn fire(&self, ctx: &mut ActionCtx<'_>, event: &str) -> Result<String> {
        let transition = self.find(ctx.project, event)?;

        if let Some(guard) = &transition.guard {
            if !(guard.check)(ctx.project) {
                return Err(Error::GuardBlocked {
                    description: guard.description.clone(),
                    unmet: Vec::new(),
                });
            }
        }

        let from = ctx.project.current_state.clone();

        if let Some(on_exit) = &transition.on_exit {
            on_exit(ctx).map_err(|e| Error::ActionFailed(format!(
                "on_exit of {from} --{event}--> {}: {e}",
                transition.to
            )))?;
        }

        ctx.project.current_state = transition.to.clone();

        if let Some(on_entry) = &transition.on_entry {
            on_entry(ctx).map_err(|e| Error::ActionFailed(format!(
                "on_entry of {from} --{event}--> {}: {e}",
                transition.to
            )))?;
        }

        if let Some(phase_name) = &transition.failed_phase {
            if let Some(phase) = ctx.project.phase_mut(phase_name) {
                phase.rewind_completed_tasks();
            }
        }

        tracing::info!(
            project = %ctx.project.name,
            %from,
            to = %transition.to,
            %event,
            "transition fired"
        );
        Ok(transition.to.clone())
    }
}

fn guard_satisfied(transition: &TransitionConfig, project: &Project) -> bool {
    transition
        .guard
        .as_ref()
        .map_or(true, |guard| (guard.check)(project))
}
