//! Project engine for the sow orchestrator.
//!
//! Everything the CLI does goes through here: the scoped filesystem, the
//! host ports, the persisted project model, the declarative project-type
//! DSL and its derived state machine, the advance engine, and the worktree
//! manager.

pub mod advance;
pub mod agents;
pub mod context;
pub mod dsl;
pub mod error;
pub mod fsys;
pub mod host;
pub mod machine;
pub mod model;
pub mod ops;
pub mod registry;
pub mod schema;
pub mod store;
pub mod types;
pub mod worktree;

pub use advance::{AdvanceOutcome, DryRunReport, Engine, ListReport};
pub use context::Context;
pub use dsl::{
    ActionCtx, Branch, PhaseSpec, ProjectTypeBuilder, ProjectTypeConfig, TransitionOpts,
};
pub use error::{Error, Result};
pub use fsys::ScopedFs;
pub use host::{AgentHost, GitHost, GithubHost, ShellHost};
pub use machine::{Machine, PermittedTransition};
pub use model::{Artifact, Metadata, Phase, PhaseStatus, Project, Task, TaskStatus};
pub use ops::{ArtifactSeq, Ops};
pub use registry::TypeRegistry;
pub use store::{Backend, YamlStore};
pub use worktree::WorktreeManager;
