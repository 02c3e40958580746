//! The advance engine: drive one transition per invocation.
//!
//! Four modes: auto (determiner picks the event), list (report outgoing
//! transitions), dry-run (validate an event without executing), explicit
//! (fire a named event). List and dry-run never run actions and never save;
//! the engine is the only component that persists state.

use crate::dsl::ActionCtx;
use crate::error::{Error, Result};
use crate::fsys::ScopedFs;
use crate::host::GithubHost;
use crate::machine::{Machine, PermittedTransition};
use crate::model::Project;
use crate::registry::TypeRegistry;
use crate::store::Backend;

/// A completed advance.
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub from: String,
    pub event: String,
    pub to: String,
    /// True when the transition removed the on-disk project (terminal
    /// delete); nothing was saved afterwards.
    pub deleted: bool,
}

/// Outgoing transitions of the current state (list mode).
#[derive(Debug, Clone)]
pub struct ListReport {
    pub state: String,
    pub transitions: Vec<PermittedTransition>,
}

/// Result of a dry run: would the event fire?
#[derive(Debug, Clone)]
pub struct DryRunReport {
    pub state: String,
    pub event: String,
    pub to: String,
    pub guard_satisfied: bool,
    pub description: Option<String>,
}

/// One advance invocation over a loaded store.
pub struct Engine<'a> {
    store: &'a dyn Backend,
    fs: &'a ScopedFs,
    registry: &'a TypeRegistry,
    github: &'a dyn GithubHost,
}

impl std::fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl<'a> Engine<'a> {
    pub fn new(
        store: &'a dyn Backend,
        fs: &'a ScopedFs,
        registry: &'a TypeRegistry,
        github: &'a dyn GithubHost,
    ) -> Self {
        Self {
            store,
            fs,
            registry,
            github,
        }
    }

    /// Auto mode. Returns `None` when the current state is terminal.
    pub fn auto(&self) -> Result<Option<AdvanceOutcome>> {
        let project = self.store.load()?;
        let config = self.registry.lookup(&project.project_type)?;
        let machine = Machine::new(config, &project)?;
        let state = project.current_state.clone();

        let event = if let Some(determiner) = config.determiner(&state) {
            determiner(&project).map_err(|e| enrich_guard_error(&machine, &project, e))?
        } else {
            let mut outgoing = config.transitions_from(&state);
            let Some(first) = outgoing.next() else {
                // Terminal state: advancing is a no-op.
                return Ok(None);
            };
            if outgoing.next().is_some() {
                return Err(Error::AmbiguousAdvance {
                    state: state.clone(),
                    reason: "several outgoing transitions and no determiner".to_string(),
                });
            }
            first.event.clone()
        };

        self.fire_and_save(&machine, project, &event, true)
            .map(Some)
    }

    /// List mode: read-only report of every outgoing transition.
    pub fn list(&self) -> Result<ListReport> {
        let project = self.store.load()?;
        let config = self.registry.lookup(&project.project_type)?;
        let machine = Machine::new(config, &project)?;
        Ok(ListReport {
            state: project.current_state.clone(),
            transitions: machine.permitted_transitions(&project),
        })
    }

    /// Dry-run mode: validate the event and report its guard, executing
    /// nothing.
    pub fn dry_run(&self, event: &str) -> Result<DryRunReport> {
        let project = self.store.load()?;
        let config = self.registry.lookup(&project.project_type)?;
        let machine = Machine::new(config, &project)?;
        let transition = config
            .transition(&project.current_state, event)
            .ok_or_else(|| Error::EventNotConfigured {
                state: project.current_state.clone(),
                event: event.to_string(),
            })?;
        Ok(DryRunReport {
            state: project.current_state.clone(),
            event: event.to_string(),
            to: transition.to.clone(),
            guard_satisfied: machine.can_fire(&project, event)?,
            description: transition
                .description
                .clone()
                .or_else(|| transition.guard.as_ref().map(|g| g.description.clone())),
        })
    }

    /// Explicit mode: fire a named event.
    pub fn explicit(&self, event: &str) -> Result<AdvanceOutcome> {
        let project = self.store.load()?;
        let config = self.registry.lookup(&project.project_type)?;
        let machine = Machine::new(config, &project)?;
        self.fire_and_save(&machine, project, event, false)
    }

    fn fire_and_save(
        &self,
        machine: &Machine<'_>,
        mut project: Project,
        event: &str,
        enrich: bool,
    ) -> Result<AdvanceOutcome> {
        let from = project.current_state.clone();
        let fired = {
            let mut ctx = ActionCtx {
                project: &mut project,
                fs: self.fs,
                github: self.github,
            };
            machine.fire(&mut ctx, event)
        };
        let to = match fired {
            Ok(to) => to,
            Err(e) if enrich => return Err(enrich_guard_error(machine, &project, e)),
            Err(e) => return Err(e),
        };

        // A terminal delete removed the project tree; there is nothing left
        // to save and the log directory is gone with it.
        let deleted = !self.store.exists();
        if !deleted {
            self.store.save(&mut project)?;
            self.store
                .append_log(&format!("advance: {from} --{event}--> {to}"))?;
        }

        Ok(AdvanceOutcome {
            from,
            event: event.to_string(),
            to,
            deleted,
        })
    }
}

/// Wrap a guard failure with the full list of outgoing transitions so the
/// diagnostic names every option and its missing precondition. The error
/// kind is preserved.
fn enrich_guard_error(machine: &Machine<'_>, project: &Project, err: Error) -> Error {
    match err {
        Error::GuardBlocked { description, .. } => {
            let unmet = machine
                .permitted_transitions(project)
                .into_iter()
                .map(|t| {
                    let status = if t.guard_satisfied { "ready" } else { "blocked" };
                    match t.description {
                        Some(desc) => format!("{} -> {} [{status}]: {desc}", t.event, t.to),
                        None => format!("{} -> {} [{status}]", t.event, t.to),
                    }
                })
                .collect();
            Error::GuardBlocked { description, unmet }
        }
        other => other,
    }
}
