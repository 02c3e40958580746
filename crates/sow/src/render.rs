//! Terminal output for sow commands.

use chrono::{DateTime, Utc};
use sow_core::host::WorktreeInfo;
use sow_core::{AdvanceOutcome, DryRunReport, ListReport, Project};
use std::path::Path;

pub fn print_project_created(project: &Project, worktree_path: &Path) {
    println!("Created project: {}", project.name);
    println!("  Type:     {}", project.project_type);
    println!("  Branch:   {}", project.branch);
    println!("  State:    {}", project.current_state);
    if let Some(issue) = project.issue {
        println!("  Issue:    #{issue}");
    }
    println!("  Worktree: {}", worktree_path.display());
}

pub fn print_status(project: &Project, report: &ListReport) {
    println!("Project: {}", project.name);
    println!();
    println!("  Type:        {}", project.project_type);
    println!("  Branch:      {}", project.branch);
    println!("  State:       {}", project.current_state);
    if let Some(issue) = project.issue {
        println!("  Issue:       #{issue}");
    }
    if !project.description.is_empty() {
        println!("  Description: {}", project.description);
    }
    println!("  Created:     {}", format_time(&project.created_at));
    println!("  Updated:     {}", format_time(&project.updated_at));

    println!();
    println!("  Phases:");
    println!(
        "    {:<16}  {:<12}  {:<5}  {:<6}  {:<7}  {:<7}",
        "PHASE", "STATUS", "ITER", "TASKS", "INPUTS", "OUTPUTS"
    );
    println!("    {}", "-".repeat(64));
    for (name, phase) in &project.phases {
        println!(
            "    {:<16}  {:<12}  {:<5}  {:<6}  {:<7}  {:<7}",
            name,
            phase.status.as_str(),
            phase.iteration,
            phase.tasks.len(),
            phase.inputs.len(),
            phase.outputs.len(),
        );
    }

    println!();
    print_transitions(report);
}

pub fn print_transitions(report: &ListReport) {
    if report.transitions.is_empty() {
        println!("State {} is terminal; no outgoing transitions.", report.state);
        return;
    }
    println!("Transitions out of {}:", report.state);
    for transition in &report.transitions {
        let marker = match transition.selected {
            Some(true) => "*",
            _ => " ",
        };
        let guard = if transition.guard_satisfied {
            "ready"
        } else {
            "blocked"
        };
        match &transition.description {
            Some(description) => println!(
                "  {marker} {:<22} -> {:<24} [{guard}] {description}",
                transition.event, transition.to
            ),
            None => println!(
                "  {marker} {:<22} -> {:<24} [{guard}]",
                transition.event, transition.to
            ),
        }
    }
}

pub fn print_outcome(outcome: &AdvanceOutcome) {
    println!(
        "Advanced: {} --{}--> {}",
        outcome.from, outcome.event, outcome.to
    );
    if outcome.deleted {
        println!("Project state has been removed.");
    }
}

pub fn print_dry_run(report: &DryRunReport) {
    let guard = if report.guard_satisfied {
        "would fire"
    } else {
        "blocked"
    };
    println!(
        "Dry run: {} --{}--> {} [{guard}]",
        report.state, report.event, report.to
    );
    if let Some(description) = &report.description {
        println!("  {description}");
    }
}

pub fn print_worktrees(worktrees: &[WorktreeInfo]) {
    if worktrees.is_empty() {
        println!("No worktrees found.");
        return;
    }
    println!("{:<48}  {:<24}  {:<12}", "PATH", "BRANCH", "HEAD");
    println!("{}", "-".repeat(88));
    for worktree in worktrees {
        let head: String = worktree.head.chars().take(12).collect();
        println!(
            "{:<48}  {:<24}  {:<12}",
            worktree.path.display(),
            worktree.branch.as_deref().unwrap_or("(detached)"),
            head,
        );
    }
    println!();
    println!("{} worktree(s)", worktrees.len());
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
