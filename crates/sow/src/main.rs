//! sow - project-lifecycle orchestrator for AI-assisted development.
//!
//! The CLI is a thin translation layer: each command resolves the current
//! repository context, loads project state through the core engine, applies
//! one operation, and exits.

mod commands;
mod render;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "sow")]
#[command(about = "Drive human-approved, multi-phase AI development projects")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create, inspect and edit the project in the current worktree
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Advance the project state machine by one transition
    Advance {
        /// Event to fire explicitly; omit for auto mode
        #[arg(conflicts_with = "list")]
        event: Option<String>,

        /// List outgoing transitions of the current state (read-only)
        #[arg(long, conflicts_with = "dry_run")]
        list: bool,

        /// Validate an event without executing it (read-only)
        #[arg(long, value_name = "EVENT", conflicts_with = "event")]
        dry_run: Option<String>,
    },

    /// Manage tasks in the active phase
    #[command(subcommand)]
    Task(TaskCommand),

    /// Manage phase input artifacts
    #[command(subcommand)]
    Input(PhaseArtifactCommand),

    /// Manage phase output artifacts
    #[command(subcommand)]
    Output(PhaseArtifactCommand),

    /// Edit phase fields and metadata
    #[command(subcommand)]
    Phase(PhaseCommand),

    /// Manage per-branch worktrees
    #[command(subcommand)]
    Worktree(WorktreeCommand),
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Create a project on a branch (worktree is created as needed)
    New {
        /// Branch the project lives on
        #[arg(long)]
        branch: String,

        /// Project type to instantiate
        #[arg(long = "type", default_value = "standard")]
        project_type: String,

        /// Linked issue number
        #[arg(long)]
        issue: Option<u64>,

        /// Create state only; do not launch the agent
        #[arg(long)]
        no_launch: bool,

        /// Project description
        description: String,
    },

    /// Re-launch the agent against the current project state
    Continue,

    /// Show project state and permitted transitions
    Status,

    /// Edit a whitelisted project field
    Set {
        /// Dotted field path (description, issue, metadata.<key>, ...)
        field: String,
        value: String,
    },

    /// Remove the project state directory
    Delete,
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    /// Create a task in the active phase
    Add {
        /// Task name
        name: String,

        /// Agent role responsible for the task
        #[arg(long)]
        agent: String,

        /// Longer task description
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Edit a whitelisted task field
    Set {
        #[arg(long)]
        id: String,
        field: String,
        value: String,
    },

    /// Manage task input artifacts
    #[command(subcommand)]
    Input(TaskArtifactCommand),

    /// Manage task output artifacts
    #[command(subcommand)]
    Output(TaskArtifactCommand),
}

#[derive(Debug, Subcommand)]
enum TaskArtifactCommand {
    Add {
        #[arg(long)]
        id: String,
        /// Artifact type from the phase vocabulary
        #[arg(long = "type")]
        kind: String,
        /// Path relative to .sow/
        #[arg(long)]
        path: String,
    },
    Remove {
        #[arg(long)]
        id: String,
        /// Position in the artifact sequence
        #[arg(long)]
        index: usize,
    },
    Set {
        #[arg(long)]
        id: String,
        #[arg(long)]
        index: usize,
        field: String,
        value: String,
    },
}

#[derive(Debug, Subcommand)]
enum PhaseArtifactCommand {
    Add {
        #[arg(long)]
        phase: String,
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        path: String,
    },
    Remove {
        #[arg(long)]
        phase: String,
        #[arg(long)]
        index: usize,
    },
    Set {
        #[arg(long)]
        phase: String,
        #[arg(long)]
        index: usize,
        field: String,
        value: String,
    },
}

#[derive(Debug, Subcommand)]
enum PhaseCommand {
    /// Edit a whitelisted phase field (enabled, status, metadata.<key>)
    Set {
        #[arg(long)]
        phase: String,
        field: String,
        value: String,
    },
}

#[derive(Debug, Subcommand)]
enum WorktreeCommand {
    /// Create the worktree for a branch if it does not exist
    Ensure { branch: String },
    /// List worktrees known to the repository
    List,
    /// Remove the worktree for a branch
    Remove {
        branch: String,
        /// Remove even with uncommitted changes
        #[arg(long)]
        force: bool,
    },
    /// Prune stale worktree bookkeeping
    Prune,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SOW_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Project(command) => match command {
            ProjectCommand::New {
                branch,
                project_type,
                issue,
                no_launch,
                description,
            } => commands::project_new(&branch, &project_type, issue, no_launch, &description),
            ProjectCommand::Continue => commands::project_continue(),
            ProjectCommand::Status => commands::project_status(),
            ProjectCommand::Set { field, value } => commands::project_set(&field, &value),
            ProjectCommand::Delete => commands::project_delete(),
        },
        Command::Advance {
            event,
            list,
            dry_run,
        } => {
            if list {
                commands::advance_list()
            } else if let Some(event) = dry_run {
                commands::advance_dry_run(&event)
            } else if let Some(event) = event {
                commands::advance_explicit(&event)
            } else {
                commands::advance_auto()
            }
        }
        Command::Task(command) => match command {
            TaskCommand::Add {
                name,
                agent,
                description,
            } => commands::task_add(&name, &agent, &description),
            TaskCommand::Set { id, field, value } => commands::task_set(&id, &field, &value),
            TaskCommand::Input(artifact) => {
                commands::task_artifact(sow_core::ArtifactSeq::Inputs, artifact)
            }
            TaskCommand::Output(artifact) => {
                commands::task_artifact(sow_core::ArtifactSeq::Outputs, artifact)
            }
        },
        Command::Input(artifact) => {
            commands::phase_artifact(sow_core::ArtifactSeq::Inputs, artifact)
        }
        Command::Output(artifact) => {
            commands::phase_artifact(sow_core::ArtifactSeq::Outputs, artifact)
        }
        Command::Phase(PhaseCommand::Set {
            phase,
            field,
            value,
        }) => commands::phase_set(&phase, &field, &value),
        Command::Worktree(command) => match command {
            WorktreeCommand::Ensure { branch } => commands::worktree_ensure(&branch),
            WorktreeCommand::List => commands::worktree_list(),
            WorktreeCommand::Remove { branch, force } => {
                commands::worktree_remove(&branch, force)
            }
            WorktreeCommand::Prune => commands::worktree_prune(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn advance_flags_are_mutually_exclusive() {
        // --list with --dry-run
        assert!(Cli::try_parse_from(["sow", "advance", "--list", "--dry-run", "x"]).is_err());
        // --list with an event argument
        assert!(Cli::try_parse_from(["sow", "advance", "some_event", "--list"]).is_err());
        // --dry-run with an event argument
        assert!(Cli::try_parse_from(["sow", "advance", "some_event", "--dry-run", "x"]).is_err());
        // --dry-run requires an event value
        assert!(Cli::try_parse_from(["sow", "advance", "--dry-run"]).is_err());

        assert!(Cli::try_parse_from(["sow", "advance"]).is_ok());
        assert!(Cli::try_parse_from(["sow", "advance", "--list"]).is_ok());
        assert!(Cli::try_parse_from(["sow", "advance", "--dry-run", "x"]).is_ok());
        assert!(Cli::try_parse_from(["sow", "advance", "some_event"]).is_ok());
    }

    #[test]
    fn project_new_parses_flags() {
        let cli = Cli::try_parse_from([
            "sow",
            "project",
            "new",
            "--branch",
            "feat/x",
            "--issue",
            "12",
            "--no-launch",
            "demo project",
        ])
        .unwrap();
        match cli.command {
            Command::Project(ProjectCommand::New {
                branch,
                project_type,
                issue,
                no_launch,
                description,
            }) => {
                assert_eq!(branch, "feat/x");
                assert_eq!(project_type, "standard");
                assert_eq!(issue, Some(12));
                assert!(no_launch);
                assert_eq!(description, "demo project");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn task_artifact_commands_parse() {
        assert!(Cli::try_parse_from([
            "sow", "task", "input", "add", "--id", "010", "--type", "feedback", "--path",
            "phases/implementation/tasks/010/feedback/1.md",
        ])
        .is_ok());
        assert!(Cli::try_parse_from([
            "sow", "output", "set", "--phase", "planning", "--index", "0", "approved", "true",
        ])
        .is_ok());
    }
}
