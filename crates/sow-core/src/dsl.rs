//! Declarative project-type definitions.
//!
//! A project type is built once by a fluent builder and frozen into a
//! `ProjectTypeConfig`; the per-project state machine is derived from it at
//! load time. Guards, determiners, discriminators and prompt generators are
//! pure functions of the project; only OnExit/OnEntry actions mutate, and
//! they receive an `ActionCtx` so the terminal delete and host-publishing
//! transitions can reach the filesystem and GitHub.
//!
//! `build()` validation failures are programming errors in a type
//! definition and panic.

use crate::error::{Error, Result};
use crate::fsys::ScopedFs;
use crate::host::GithubHost;
use crate::model::{Phase, Project};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

pub type GuardFn = Arc<dyn Fn(&Project) -> bool + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(&mut ActionCtx<'_>) -> Result<()> + Send + Sync>;
pub type DeterminerFn = Arc<dyn Fn(&Project) -> Result<String> + Send + Sync>;
pub type DiscriminatorFn = Arc<dyn Fn(&Project) -> Option<String> + Send + Sync>;
pub type PromptFn = Arc<dyn Fn(&Project) -> String + Send + Sync>;

/// Context handed to OnExit/OnEntry actions. The scoped filesystem is
/// rooted at `.sow/`.
pub struct ActionCtx<'a> {
    pub project: &'a mut Project,
    pub fs: &'a ScopedFs,
    pub github: &'a dyn GithubHost,
}

impl fmt::Debug for ActionCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCtx")
            .field("project", &self.project.name)
            .field("state", &self.project.current_state)
            .finish_non_exhaustive()
    }
}

/// A pure predicate gating a transition, with the human-readable
/// description surfaced when it blocks.
#[derive(Clone)]
pub struct Guard {
    pub check: GuardFn,
    pub description: String,
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// One configured transition.
#[derive(Clone)]
pub struct TransitionConfig {
    pub from: String,
    pub to: String,
    pub event: String,
    pub guard: Option<Guard>,
    pub on_exit: Option<ActionFn>,
    pub on_entry: Option<ActionFn>,
    pub description: Option<String>,
    /// Phase whose completed tasks are rewound when this transition fires.
    pub failed_phase: Option<String>,
    /// Transitions sharing a discriminator carry the same group id.
    pub branch_group: Option<usize>,
    /// Discriminator output selecting this transition within its group.
    pub branch_when: Option<String>,
}

impl fmt::Debug for TransitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionConfig")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("event", &self.event)
            .field("branch_when", &self.branch_when)
            .finish_non_exhaustive()
    }
}

/// Per-phase declaration: artifact vocabularies and task support.
#[derive(Debug, Clone, Default)]
pub struct PhaseSpec {
    pub allowed_input_kinds: Vec<String>,
    pub allowed_output_kinds: Vec<String>,
    pub tasks: bool,
}

impl PhaseSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(mut self, kinds: &[&str]) -> Self {
        self.allowed_input_kinds = kinds.iter().map(ToString::to_string).collect();
        self
    }

    pub fn outputs(mut self, kinds: &[&str]) -> Self {
        self.allowed_output_kinds = kinds.iter().map(ToString::to_string).collect();
        self
    }

    pub fn with_tasks(mut self) -> Self {
        self.tasks = true;
        self
    }
}

/// Immutable configuration of one project type.
#[derive(Clone)]
pub struct ProjectTypeConfig {
    name: String,
    phases: Vec<(String, PhaseSpec)>,
    initial_state: String,
    transitions: Vec<TransitionConfig>,
    determiners: HashMap<String, DeterminerFn>,
    discriminators: HashMap<usize, DiscriminatorFn>,
    prompts: HashMap<String, PromptFn>,
}

impl fmt::Debug for ProjectTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectTypeConfig")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("transitions", &self.transitions.len())
            .finish_non_exhaustive()
    }
}

impl ProjectTypeConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn transitions(&self) -> &[TransitionConfig] {
        &self.transitions
    }

    pub fn transitions_from<'a>(
        &'a self,
        state: &'a str,
    ) -> impl Iterator<Item = &'a TransitionConfig> {
        self.transitions.iter().filter(move |t| t.from == state)
    }

    pub fn transition(&self, state: &str, event: &str) -> Option<&TransitionConfig> {
        self.transitions
            .iter()
            .find(|t| t.from == state && t.event == event)
    }

    /// Every state mentioned by the type.
    pub fn states(&self) -> BTreeSet<&str> {
        let mut states = BTreeSet::new();
        states.insert(self.initial_state.as_str());
        for transition in &self.transitions {
            states.insert(transition.from.as_str());
            states.insert(transition.to.as_str());
        }
        states
    }

    pub fn determiner(&self, state: &str) -> Option<&DeterminerFn> {
        self.determiners.get(state)
    }

    pub fn discriminator(&self, group: usize) -> Option<&DiscriminatorFn> {
        self.discriminators.get(&group)
    }

    pub fn prompt(&self, state: &str) -> Option<&PromptFn> {
        self.prompts.get(state)
    }

    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|(name, _)| name.as_str())
    }

    pub fn phase_spec(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases
            .iter()
            .find(|(phase, _)| phase == name)
            .map(|(_, spec)| spec)
    }

    /// Seed a fresh project in the type's initial state with every declared
    /// phase pending.
    pub fn new_project(
        &self,
        name: &str,
        branch: &str,
        description: &str,
        issue: Option<u64>,
    ) -> Project {
        let now = Utc::now();
        let phases = self
            .phases
            .iter()
            .map(|(phase_name, _)| (phase_name.clone(), Phase::default()))
            .collect();
        Project {
            name: name.to_string(),
            project_type: self.name.clone(),
            branch: branch.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            issue,
            current_state: self.initial_state.clone(),
            phases,
            metadata: crate::model::Metadata::new(),
        }
    }
}

/// Options attached to a single transition.
#[derive(Clone, Default)]
pub struct TransitionOpts {
    guard: Option<Guard>,
    on_exit: Option<ActionFn>,
    on_entry: Option<ActionFn>,
    description: Option<String>,
    failed_phase: Option<String>,
}

impl fmt::Debug for TransitionOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionOpts")
            .field("description", &self.description)
            .field("failed_phase", &self.failed_phase)
            .finish_non_exhaustive()
    }
}

impl TransitionOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(
        mut self,
        description: impl Into<String>,
        check: impl Fn(&Project) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guard = Some(Guard {
            check: Arc::new(check),
            description: description.into(),
        });
        self
    }

    pub fn on_exit(
        mut self,
        action: impl Fn(&mut ActionCtx<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_exit = Some(Arc::new(action));
        self
    }

    pub fn on_entry(
        mut self,
        action: impl Fn(&mut ActionCtx<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_entry = Some(Arc::new(action));
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Rewind every completed task in `phase` when this transition fires.
    pub fn failed_phase(mut self, phase: impl Into<String>) -> Self {
        self.failed_phase = Some(phase.into());
        self
    }
}

/// One arm of a branching state.
#[derive(Debug, Clone)]
pub struct Branch {
    when: String,
    event: String,
    to: String,
    opts: TransitionOpts,
}

impl Branch {
    pub fn new(when: impl Into<String>, event: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            when: when.into(),
            event: event.into(),
            to: to.into(),
            opts: TransitionOpts::default(),
        }
    }

    pub fn opts(mut self, opts: TransitionOpts) -> Self {
        self.opts = opts;
        self
    }
}

/// Fluent builder for a `ProjectTypeConfig`.
pub struct ProjectTypeBuilder {
    name: String,
    phases: Vec<(String, PhaseSpec)>,
    initial_state: Option<String>,
    transitions: Vec<TransitionConfig>,
    determiners: HashMap<String, DeterminerFn>,
    discriminators: HashMap<usize, DiscriminatorFn>,
    prompts: HashMap<String, PromptFn>,
    next_group: usize,
}

impl fmt::Debug for ProjectTypeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectTypeBuilder")
            .field("name", &self.name)
            .field("transitions", &self.transitions.len())
            .finish_non_exhaustive()
    }
}

impl ProjectTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: Vec::new(),
            initial_state: None,
            transitions: Vec::new(),
            determiners: HashMap::new(),
            discriminators: HashMap::new(),
            prompts: HashMap::new(),
            next_group: 0,
        }
    }

    pub fn phase(mut self, name: impl Into<String>, spec: PhaseSpec) -> Self {
        let name = name.into();
        assert!(
            !self.phases.iter().any(|(existing, _)| *existing == name),
            "project type {}: phase {name:?} declared twice",
            self.name
        );
        self.phases.push((name, spec));
        self
    }

    pub fn initial_state(mut self, state: impl Into<String>) -> Self {
        assert!(
            self.initial_state.is_none(),
            "project type {}: initial state set twice",
            self.name
        );
        self.initial_state = Some(state.into());
        self
    }

    pub fn transition(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        event: impl Into<String>,
        opts: TransitionOpts,
    ) -> Self {
        self.transitions.push(TransitionConfig {
            from: from.into(),
            to: to.into(),
            event: event.into(),
            guard: opts.guard,
            on_exit: opts.on_exit,
            on_entry: opts.on_entry,
            description: opts.description,
            failed_phase: opts.failed_phase,
            branch_group: None,
            branch_when: None,
        });
        self
    }

    /// Install the determiner auto mode uses for `state`.
    pub fn on_advance(
        mut self,
        state: impl Into<String>,
        determiner: impl Fn(&Project) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.determiners.insert(state.into(), Arc::new(determiner));
        self
    }

    /// Install the prompt generator for `state`; the core only stores the
    /// reference.
    pub fn prompt(
        mut self,
        state: impl Into<String>,
        generator: impl Fn(&Project) -> String + Send + Sync + 'static,
    ) -> Self {
        self.prompts.insert(state.into(), Arc::new(generator));
        self
    }

    /// Sugar for a state with several outgoing events picked by a runtime
    /// discriminator. Expands to one transition per branch, all sharing a
    /// group id, and synthesizes the determiner that evaluates the
    /// discriminator and picks the matching branch.
    pub fn branch(
        mut self,
        from: impl Into<String>,
        discriminator: impl Fn(&Project) -> Option<String> + Send + Sync + 'static,
        branches: Vec<Branch>,
    ) -> Self {
        let from = from.into();
        assert!(
            !branches.is_empty(),
            "project type {}: branch from {from:?} has no arms",
            self.name
        );
        let group = self.next_group;
        self.next_group += 1;
        self.discriminators.insert(group, Arc::new(discriminator));

        for branch in branches {
            self.transitions.push(TransitionConfig {
                from: from.clone(),
                to: branch.to,
                event: branch.event,
                guard: branch.opts.guard,
                on_exit: branch.opts.on_exit,
                on_entry: branch.opts.on_entry,
                description: branch.opts.description,
                failed_phase: branch.opts.failed_phase,
                branch_group: Some(group),
                branch_when: Some(branch.when),
            });
        }
        self
    }

    /// Freeze into an immutable config, validating the definition.
    /// Definition mistakes panic; they are bugs in the type, not runtime
    /// conditions.
    pub fn build(mut self) -> ProjectTypeConfig {
        let name = self.name.clone();
        let initial = self
            .initial_state
            .unwrap_or_else(|| panic!("project type {name}: initial state never set"));

        assert!(
            self.transitions.iter().any(|t| t.from == initial),
            "project type {name}: initial state {initial:?} has no outgoing transition"
        );

        // Duplicate (from, event) pairs are only legal inside one branch
        // group.
        for (i, a) in self.transitions.iter().enumerate() {
            for b in &self.transitions[i + 1..] {
                if a.from == b.from && a.event == b.event {
                    let same_group =
                        a.branch_group.is_some() && a.branch_group == b.branch_group;
                    assert!(
                        same_group,
                        "project type {name}: duplicate transition ({}, {})",
                        a.from, a.event
                    );
                }
            }
        }

        // Every state must be reachable from the initial state.
        let mut reachable: BTreeSet<&str> = BTreeSet::new();
        reachable.insert(initial.as_str());
        let mut frontier = vec![initial.as_str()];
        while let Some(state) = frontier.pop() {
            for transition in self.transitions.iter().filter(|t| t.from == state) {
                if reachable.insert(transition.to.as_str()) {
                    frontier.push(transition.to.as_str());
                }
            }
        }
        for transition in &self.transitions {
            assert!(
                reachable.contains(transition.from.as_str()),
                "project type {name}: state {:?} is unreachable from {initial:?}",
                transition.from
            );
        }

        // Phases named by failed_phase must be declared.
        for transition in &self.transitions {
            if let Some(phase) = &transition.failed_phase {
                assert!(
                    self.phases.iter().any(|(p, _)| p == phase),
                    "project type {name}: failed_phase {phase:?} is not a declared phase"
                );
            }
        }

        // Synthesize determiners for branch groups, then demand coverage:
        // any state with several outgoing transitions needs a determiner.
        let mut froms: BTreeSet<String> = BTreeSet::new();
        for transition in &self.transitions {
            froms.insert(transition.from.clone());
        }
        for from in &froms {
            let outgoing: Vec<&TransitionConfig> =
                self.transitions.iter().filter(|t| t.from == *from).collect();
            if outgoing.len() <= 1 || self.determiners.contains_key(from) {
                continue;
            }
            let group = outgoing[0].branch_group;
            let all_one_group =
                group.is_some() && outgoing.iter().all(|t| t.branch_group == group);
            assert!(
                all_one_group,
                "project type {name}: state {from:?} has several outgoing transitions \
                 but no determiner or discriminator"
            );
            let group = group.unwrap_or_default();
            let discriminator = Arc::clone(
                self.discriminators
                    .get(&group)
                    .unwrap_or_else(|| panic!("branch group {group} has no discriminator")),
            );
            let arms: Vec<(String, String)> = outgoing
                .iter()
                .map(|t| {
                    (
                        t.branch_when.clone().unwrap_or_default(),
                        t.event.clone(),
                    )
                })
                .collect();
            let state = from.clone();
            self.determiners.insert(
                from.clone(),
                Arc::new(move |project: &Project| match discriminator(project) {
                    Some(key) => arms
                        .iter()
                        .find(|(when, _)| *when == key)
                        .map(|(_, event)| event.clone())
                        .ok_or_else(|| Error::AmbiguousAdvance {
                            state: state.clone(),
                            reason: format!("discriminator chose {key:?}, which matches no branch"),
                        }),
                    None => Err(Error::GuardBlocked {
                        description: format!(
                            "no branch selectable from {state}: preconditions not met"
                        ),
                        unmet: Vec::new(),
                    }),
                }),
            );
        }

        ProjectTypeConfig {
            name: self.name,
            phases: self.phases,
            initial_state: initial,
            transitions: self.transitions,
            determiners: self.determiners,
            discriminators: self.discriminators,
            prompts: self.prompts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_type() -> ProjectTypeConfig {
        ProjectTypeBuilder::new("linear")
            .phase("work", PhaseSpec::new().with_tasks())
            .initial_state("Start")
            .transition("Start", "Middle", "go", TransitionOpts::new())
            .transition("Middle", "End", "finish", TransitionOpts::new())
            .build()
    }

    #[test]
    fn linear_type_builds_and_reports_states() {
        let config = linear_type();
        assert_eq!(config.initial_state(), "Start");
        let states = config.states();
        assert!(states.contains("Start"));
        assert!(states.contains("Middle"));
        assert!(states.contains("End"));
        assert_eq!(config.transitions_from("Start").count(), 1);
        assert_eq!(config.transitions_from("End").count(), 0);
    }

    #[test]
    fn new_project_seeds_phases_and_initial_state() {
        let config = linear_type();
        let project = config.new_project("demo", "feat/x", "a demo", Some(7));
        assert_eq!(project.current_state, "Start");
        assert_eq!(project.issue, Some(7));
        assert!(project.phases.contains_key("work"));
        assert_eq!(project.phases["work"].iteration, 1);
    }

    #[test]
    #[should_panic(expected = "initial state never set")]
    fn build_requires_initial_state() {
        let _ = ProjectTypeBuilder::new("broken")
            .transition("A", "B", "go", TransitionOpts::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "has no outgoing transition")]
    fn build_requires_outgoing_from_initial() {
        let _ = ProjectTypeBuilder::new("broken")
            .initial_state("A")
            .transition("B", "C", "go", TransitionOpts::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "duplicate transition")]
    fn build_rejects_duplicate_from_event() {
        let _ = ProjectTypeBuilder::new("broken")
            .initial_state("A")
            .transition("A", "B", "go", TransitionOpts::new())
            .transition("A", "C", "go", TransitionOpts::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "unreachable")]
    fn build_rejects_unreachable_states() {
        let _ = ProjectTypeBuilder::new("broken")
            .initial_state("A")
            .transition("A", "B", "go", TransitionOpts::new())
            .transition("X", "Y", "stray", TransitionOpts::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "no determiner or discriminator")]
    fn build_rejects_ambiguous_multi_outgoing_state() {
        let _ = ProjectTypeBuilder::new("broken")
            .initial_state("A")
            .transition("A", "B", "left", TransitionOpts::new())
            .transition("A", "C", "right", TransitionOpts::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "initial state set twice")]
    fn initial_state_twice_panics() {
        let _ = ProjectTypeBuilder::new("broken")
            .initial_state("A")
            .initial_state("B");
    }

    #[test]
    fn branch_expands_to_grouped_transitions() {
        let config = ProjectTypeBuilder::new("branchy")
            .initial_state("Deciding")
            .branch(
                "Deciding",
                |project: &Project| {
                    project
                        .metadata
                        .get("verdict")
                        .and_then(serde_yaml::Value::as_str)
                        .map(ToString::to_string)
                },
                vec![
                    Branch::new("pass", "accept", "Accepted"),
                    Branch::new("fail", "reject", "Rejected"),
                ],
            )
            .build();

        let outgoing: Vec<_> = config.transitions_from("Deciding").collect();
        assert_eq!(outgoing.len(), 2);
        assert_eq!(outgoing[0].branch_group, outgoing[1].branch_group);
        assert!(outgoing[0].branch_group.is_some());

        let determiner = config.determiner("Deciding").expect("synthesized");
        let mut project = config.new_project("demo", "b", "", None);
        project.metadata.insert(
            "verdict".to_string(),
            serde_yaml::Value::String("fail".to_string()),
        );
        assert_eq!(determiner(&project).unwrap(), "reject");
    }

    #[test]
    fn branch_determiner_reports_unmatched_key() {
        let config = ProjectTypeBuilder::new("branchy")
            .initial_state("Deciding")
            .branch(
                "Deciding",
                |project: &Project| {
                    project
                        .metadata
                        .get("verdict")
                        .and_then(serde_yaml::Value::as_str)
                        .map(ToString::to_string)
                },
                vec![
                    Branch::new("pass", "accept", "Accepted"),
                    Branch::new("fail", "reject", "Rejected"),
                ],
            )
            .build();

        let determiner = config.determiner("Deciding").unwrap();
        let mut project = config.new_project("demo", "b", "", None);

        // No discriminator output yet.
        assert!(matches!(
            determiner(&project),
            Err(Error::GuardBlocked { .. })
        ));

        // Output that matches no branch.
        project.metadata.insert(
            "verdict".to_string(),
            serde_yaml::Value::String("maybe".to_string()),
        );
        assert!(matches!(
            determiner(&project),
            Err(Error::AmbiguousAdvance { .. })
        ));
    }

    #[test]
    fn determiner_purity_on_unchanged_state() {
        let config = ProjectTypeBuilder::new("branchy")
            .initial_state("Deciding")
            .branch(
                "Deciding",
                |project: &Project| {
                    project
                        .metadata
                        .get("verdict")
                        .and_then(serde_yaml::Value::as_str)
                        .map(ToString::to_string)
                },
                vec![
                    Branch::new("pass", "accept", "Accepted"),
                    Branch::new("fail", "reject", "Rejected"),
                ],
            )
            .build();
        let determiner = config.determiner("Deciding").unwrap();
        let mut project = config.new_project("demo", "b", "", None);
        project.metadata.insert(
            "verdict".to_string(),
            serde_yaml::Value::String("pass".to_string()),
        );
        assert_eq!(determiner(&project).unwrap(), determiner(&project).unwrap());
    }
}
