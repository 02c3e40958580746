//! Command implementations: resolve context, run one core operation, exit.

use crate::render;
use crate::{PhaseArtifactCommand, TaskArtifactCommand};
use sow_core::registry;
use sow_core::{
    AgentHost, ArtifactSeq, Backend, Context, Engine, Error, GitHost, GithubHost, Metadata,
    Ops, ScopedFs, ShellHost, TypeRegistry, WorktreeManager, YamlStore,
};

/// Everything a command needs about the current checkout.
struct Session {
    context: Context,
    fs: ScopedFs,
    registry: &'static TypeRegistry,
    host: ShellHost,
}

fn session() -> eyre::Result<Session> {
    let cwd = std::env::current_dir()?;
    let context = Context::resolve(&cwd)?;
    let fs = context.sow_fs()?;
    Ok(Session {
        context,
        fs,
        registry: registry::global(),
        host: ShellHost::default(),
    })
}

/// Launch the agent with the prompt for the project's current state.
fn launch_agent(
    session: &Session,
    store: &YamlStore<'_>,
    cwd: &std::path::Path,
) -> eyre::Result<()> {
    let project = store.load()?;
    let config = session.registry.lookup(&project.project_type)?;
    let prompt = match config.prompt(&project.current_state) {
        Some(generator) => generator(&project),
        None => format!(
            "Project {} is in state {}. Inspect `sow project status` and continue the work.",
            project.name, project.current_state
        ),
    };
    let resume = project
        .metadata
        .get("session_id")
        .and_then(serde_yaml::Value::as_str)
        .map(ToString::to_string);

    let outcome = session.host.spawn(&prompt, cwd, resume.as_deref())?;
    if outcome.exit_code != 0 {
        tracing::warn!(code = outcome.exit_code, "agent exited non-zero");
    }
    Ok(())
}

pub fn project_new(
    branch: &str,
    project_type: &str,
    issue: Option<u64>,
    no_launch: bool,
    description: &str,
) -> eyre::Result<()> {
    let session = session()?;
    let config = session.registry.lookup(project_type)?;

    // The worktree is managed from the main repository; project state lands
    // in the worktree's own `.sow/`.
    let manager = WorktreeManager::new(&session.host, &session.context.main_root);
    let worktree_path = manager.ensure(branch)?;

    // Best effort: link the branch to the issue on the host.
    if let Some(issue) = issue {
        let base = session.host.default_branch(&session.context.main_root)?;
        if let Err(e) = session.host.create_linked_branch(
            &session.context.main_root,
            issue,
            branch,
            &base,
        ) {
            tracing::warn!(issue, %branch, error = %e, "could not link branch to issue");
        }
    }
    let fs = ScopedFs::new(worktree_path.join(".sow"))?;
    let store = YamlStore::new(fs.clone(), session.registry);

    let mut name = sow_core::model::slugify(description);
    if name.is_empty() {
        name = "project".to_string();
    }
    let mut project = config.new_project(&name, branch, description, issue);
    store.create(&mut project)?;

    // Types whose initial state is a pure entry point (no guard) advance
    // immediately; working initial states stay put until their guards pass.
    let engine = Engine::new(&store, &fs, session.registry, &session.host);
    match engine.auto() {
        Ok(_) | Err(Error::GuardBlocked { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let project = store.load()?;
    render::print_project_created(&project, &worktree_path);

    if !no_launch {
        launch_agent(&session, &store, &worktree_path)?;
    }
    Ok(())
}

pub fn project_continue() -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    launch_agent(&session, &store, &session.context.root)
}

pub fn project_status() -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let project = store.load()?;
    let engine = Engine::new(&store, &session.fs, session.registry, &session.host);
    let report = engine.list()?;
    render::print_status(&project, &report);
    Ok(())
}

pub fn project_set(field: &str, value: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    ops.set_project_field(field, value)?;
    println!("{field} = {value}");
    Ok(())
}

pub fn project_delete() -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    store.delete()?;
    println!("Project state removed.");
    Ok(())
}

pub fn advance_auto() -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let engine = Engine::new(&store, &session.fs, session.registry, &session.host);
    match engine.auto()? {
        Some(outcome) => render::print_outcome(&outcome),
        None => println!("Current state is terminal; nothing to do."),
    }
    Ok(())
}

pub fn advance_list() -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let engine = Engine::new(&store, &session.fs, session.registry, &session.host);
    let report = engine.list()?;
    render::print_transitions(&report);
    Ok(())
}

pub fn advance_dry_run(event: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let engine = Engine::new(&store, &session.fs, session.registry, &session.host);
    let report = engine.dry_run(event)?;
    render::print_dry_run(&report);
    Ok(())
}

pub fn advance_explicit(event: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let engine = Engine::new(&store, &session.fs, session.registry, &session.host);
    let outcome = engine.explicit(event)?;
    render::print_outcome(&outcome);
    Ok(())
}

pub fn task_add(name: &str, agent: &str, description: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    let task = ops.add_task(name, agent, description, Metadata::new())?;
    println!("Created task {} ({})", task.id, task.name);
    Ok(())
}

pub fn task_set(id: &str, field: &str, value: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    ops.set_task_field(id, field, value)?;
    println!("task {id}: {field} = {value}");
    Ok(())
}

pub fn task_artifact(seq: ArtifactSeq, command: TaskArtifactCommand) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    match command {
        TaskArtifactCommand::Add { id, kind, path } => {
            ops.add_task_artifact(&id, seq, &kind, &path, Metadata::new())?;
            println!("task {id} {} += {kind} {path}", seq.as_str());
        }
        TaskArtifactCommand::Remove { id, index } => {
            ops.remove_task_artifact(&id, seq, index)?;
            println!("task {id} {}[{index}] removed", seq.as_str());
        }
        TaskArtifactCommand::Set {
            id,
            index,
            field,
            value,
        } => {
            ops.set_task_artifact_field(&id, seq, index, &field, &value)?;
            println!("task {id} {}[{index}]: {field} = {value}", seq.as_str());
        }
    }
    Ok(())
}

pub fn phase_artifact(seq: ArtifactSeq, command: PhaseArtifactCommand) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    match command {
        PhaseArtifactCommand::Add { phase, kind, path } => {
            ops.add_phase_artifact(&phase, seq, &kind, &path, Metadata::new())?;
            println!("phase {phase} {} += {kind} {path}", seq.as_str());
        }
        PhaseArtifactCommand::Remove { phase, index } => {
            ops.remove_phase_artifact(&phase, seq, index)?;
            println!("phase {phase} {}[{index}] removed", seq.as_str());
        }
        PhaseArtifactCommand::Set {
            phase,
            index,
            field,
            value,
        } => {
            ops.set_phase_artifact_field(&phase, seq, index, &field, &value)?;
            println!("phase {phase} {}[{index}]: {field} = {value}", seq.as_str());
        }
    }
    Ok(())
}

pub fn phase_set(phase: &str, field: &str, value: &str) -> eyre::Result<()> {
    let session = session()?;
    let store = YamlStore::new(session.fs.clone(), session.registry);
    let ops = Ops::new(&store, &session.fs, session.registry);
    ops.set_phase_field(phase, field, value)?;
    println!("phase {phase}: {field} = {value}");
    Ok(())
}

pub fn worktree_ensure(branch: &str) -> eyre::Result<()> {
    let session = session()?;
    let manager = WorktreeManager::new(&session.host, &session.context.main_root);
    let path = manager.ensure(branch)?;
    println!("{}", path.display());
    Ok(())
}

pub fn worktree_list() -> eyre::Result<()> {
    let session = session()?;
    let manager = WorktreeManager::new(&session.host, &session.context.main_root);
    render::print_worktrees(&manager.list()?);
    Ok(())
}

pub fn worktree_remove(branch: &str, force: bool) -> eyre::Result<()> {
    let session = session()?;
    let manager = WorktreeManager::new(&session.host, &session.context.main_root);
    manager.remove(branch, force)?;
    println!("Removed worktree for {branch}");
    Ok(())
}

pub fn worktree_prune() -> eyre::Result<()> {
    let session = session()?;
    let manager = WorktreeManager::new(&session.host, &session.context.main_root);
    manager.prune()?;
    println!("Pruned stale worktrees.");
    Ok(())
}
