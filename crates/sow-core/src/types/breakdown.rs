//! The `breakdown` project type: split work into units and publish them as
//! issues through the GitHub host.
//!
//! The publishing side effect is an OnEntry action; the engine only sees a
//! transition whose action talks to the host.

use super::{all_outputs_approved, complete_phase, phase_flag};
use crate::dsl::{ActionCtx, PhaseSpec, ProjectTypeBuilder, ProjectTypeConfig, TransitionOpts};
use crate::error::Result;

pub const TYPE_NAME: &str = "breakdown";

pub const ACTIVE: &str = "Active";
pub const PUBLISHING: &str = "Publishing";
pub const COMPLETED: &str = "Completed";

pub const PHASE_BREAKDOWN: &str = "breakdown";

/// Label attached to every published work-unit issue.
const WORK_UNIT_LABEL: &str = "sow:work-unit";

/// Publish every approved work_unit output as a GitHub issue and record the
/// issue numbers in the phase metadata.
fn publish_work_units(ctx: &mut ActionCtx<'_>) -> Result<()> {
    // gh runs from the repository root, one level above `.sow/`.
    let repo_root = ctx
        .fs
        .root()
        .parent()
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(|| ctx.fs.root().to_path_buf());

    let units: Vec<(String, String)> = ctx
        .project
        .phase(PHASE_BREAKDOWN)
        .map(|phase| {
            phase
                .outputs_of_kind("work_unit")
                .filter(|a| a.approved)
                .map(|artifact| {
                    let title = artifact
                        .metadata_str("title")
                        .unwrap_or(artifact.path.as_str())
                        .to_string();
                    (title, artifact.path.clone())
                })
                .collect()
        })
        .unwrap_or_default();

    let labels = vec![WORK_UNIT_LABEL.to_string()];
    let mut published = Vec::new();
    for (title, path) in units {
        let body = ctx
            .fs
            .read(&path)
            .unwrap_or_else(|_| format!("Work unit: {path}"));
        let number = ctx.github.create_issue(&repo_root, &title, &body, &labels)?;
        tracing::info!(issue = number, %title, "published work unit");
        published.push(serde_yaml::Value::Number(number.into()));
    }

    if let Some(phase) = ctx.project.phase_mut(PHASE_BREAKDOWN) {
        phase.metadata.insert(
            "published_issues".to_string(),
            serde_yaml::Value::Sequence(published),
        );
        phase
            .metadata
            .insert("published".to_string(), serde_yaml::Value::Bool(true));
    }
    Ok(())
}

pub fn config() -> ProjectTypeConfig {
    ProjectTypeBuilder::new(TYPE_NAME)
        .phase(
            PHASE_BREAKDOWN,
            PhaseSpec::new()
                .inputs(&["context"])
                .outputs(&["work_unit"])
                .with_tasks(),
        )
        .initial_state(ACTIVE)
        .transition(
            ACTIVE,
            PUBLISHING,
            "units_ready",
            TransitionOpts::new()
                .guard(
                    "the breakdown phase needs at least one work_unit output, all approved",
                    |p| all_outputs_approved(p, PHASE_BREAKDOWN, "work_unit"),
                )
                .on_entry(publish_work_units),
        )
        .transition(
            PUBLISHING,
            COMPLETED,
            "published",
            TransitionOpts::new()
                .guard("work units must have been published as issues", |p| {
                    phase_flag(p, PHASE_BREAKDOWN, "published")
                })
                .on_exit(complete_phase(PHASE_BREAKDOWN)),
        )
        .prompt(ACTIVE, |p| {
            format!(
                "Breakdown {name}: {description}\n\nSplit the work into units, one \
                 work_unit output per issue to publish, and request approval.",
                name = p.name,
                description = p.description
            )
        })
        .prompt(PUBLISHING, |p| {
            format!(
                "Breakdown {name}: work units are being published; advance once the \
                 issues exist.",
                name = p.name
            )
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsys::ScopedFs;
    use crate::host::{GithubHost, Issue};
    use crate::model::Artifact;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records created issues and hands out sequential numbers.
    #[derive(Debug, Default)]
    struct RecordingGithub {
        created: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    impl GithubHost for RecordingGithub {
        fn issue(&self, _: &Path, _: u64) -> crate::host::Result<Issue> {
            unimplemented!()
        }
        fn list_issues(&self, _: &Path, _: &[String]) -> crate::host::Result<Vec<Issue>> {
            unimplemented!()
        }
        fn linked_branches(&self, _: &Path, _: u64) -> crate::host::Result<Vec<String>> {
            unimplemented!()
        }
        fn create_linked_branch(
            &self,
            _: &Path,
            _: u64,
            _: &str,
            _: &str,
        ) -> crate::host::Result<()> {
            unimplemented!()
        }
        fn create_issue(
            &self,
            _: &Path,
            title: &str,
            body: &str,
            labels: &[String],
        ) -> crate::host::Result<u64> {
            let mut created = self.created.lock().unwrap();
            created.push((title.to_string(), body.to_string(), labels.to_vec()));
            Ok(100 + created.len() as u64)
        }
    }

    #[test]
    fn publishing_creates_one_issue_per_approved_unit() {
        let config = config();
        let mut project = config.new_project("split-work", "breakdown/x", "", None);
        let dir = TempDir::new().unwrap();
        let fs = ScopedFs::new(dir.path().join(".sow")).unwrap();
        fs.write("project/breakdown/unit-a.md", "First unit body").unwrap();

        {
            let phase = project.phase_mut(PHASE_BREAKDOWN).unwrap();
            let mut unit_a = Artifact::new("work_unit", "project/breakdown/unit-a.md");
            unit_a.approved = true;
            unit_a.metadata.insert(
                "title".to_string(),
                serde_yaml::Value::String("Unit A".to_string()),
            );
            let mut unit_b = Artifact::new("work_unit", "project/breakdown/unit-b.md");
            unit_b.approved = true;
            phase.outputs.push(unit_a);
            phase.outputs.push(unit_b);
        }

        let github = RecordingGithub::default();
        let mut ctx = ActionCtx {
            project: &mut project,
            fs: &fs,
            github: &github,
        };
        publish_work_units(&mut ctx).unwrap();

        let created = github.created.lock().unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].0, "Unit A");
        assert_eq!(created[0].1, "First unit body");
        assert_eq!(created[0].2, vec![WORK_UNIT_LABEL.to_string()]);
        // Missing body file falls back to a stub.
        assert!(created[1].1.contains("unit-b.md"));

        let phase = project.phase(PHASE_BREAKDOWN).unwrap();
        assert!(phase.metadata_bool("published"));
        let issues = phase.metadata.get("published_issues").unwrap();
        assert_eq!(issues.as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn published_guard_follows_metadata_flag() {
        let config = config();
        let mut project = config.new_project("split-work", "breakdown/x", "", None);
        project.current_state = PUBLISHING.to_string();
        let guard = config
            .transition(PUBLISHING, "published")
            .unwrap()
            .guard
            .as_ref()
            .unwrap();
        assert!(!(guard.check)(&project));
        project
            .phase_mut(PHASE_BREAKDOWN)
            .unwrap()
            .metadata
            .insert("published".to_string(), serde_yaml::Value::Bool(true));
        assert!((guard.check)(&project));
    }
}
