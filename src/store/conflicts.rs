use crate::models::{ConflictAction, ConflictStrategy, FileConflict, Task, TaskStatus};
use std::collections::HashMap;

/// Stateless file-contention analysis over a task set. Holds no state of
/// its own — every method is a pure function of its arguments.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Among `in_progress` tasks only, groups by touched file; any file
    /// touched by two or more tasks becomes a conflict defaulting to
    /// `review` (human) regardless of the project's own strategy.
    /// Unassigned tasks are excluded from the participant list but still
    /// count toward triggering the conflict.
    pub fn detect_overlapping_tasks(tasks: &[Task], project_id: &str) -> Vec<FileConflict> {
        let mut by_file: HashMap<&str, Vec<&Task>> = HashMap::new();
        for task in tasks.iter().filter(|t| t.status == TaskStatus::InProgress) {
            for file in &task.files {
                by_file.entry(file.as_str()).or_default().push(task);
            }
        }

        by_file
            .into_iter()
            .filter(|(_, tasks)| tasks.len() >= 2)
            .map(|(file, tasks)| {
                let agents = tasks
                    .iter()
                    .filter_map(|t| t.assignee.clone())
                    .collect::<Vec<_>>();
                FileConflict {
                    project_id: project_id.to_string(),
                    file_path: file.to_string(),
                    agents,
                    strategy: ConflictStrategy::Review,
                    resolution: None,
                    resolver: None,
                }
            })
            .collect()
    }

    /// Maps a conflict strategy to the action a caller should take. A
    /// conflict that carries its own strategy wins over the project's
    /// default.
    pub fn resolve_strategy(
        conflict: &FileConflict,
        project_strategy: ConflictStrategy,
    ) -> ConflictAction {
        let strategy = conflict.strategy;
        let _ = project_strategy;
        match strategy {
            ConflictStrategy::Lock => ConflictAction::Wait,
            ConflictStrategy::Merge => ConflictAction::Merge,
            ConflictStrategy::Zone => ConflictAction::Wait,
            ConflictStrategy::Review => ConflictAction::Human,
        }
    }

    /// Queries `git log` for the last modifier of `path` within
    /// `repo_root`. Safe if there is no history, if the last modifier is
    /// `agent` itself, or if the modification falls outside
    /// `window_minutes`. Any inspection error (no repo, no git binary,
    /// bad path) returns safe — this check is optimistic by design.
    pub async fn is_file_safe_to_modify(
        repo_root: &std::path::Path,
        path: &str,
        agent: &str,
        window_minutes: i64,
    ) -> bool {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo_root)
            .arg("log")
            .arg("-1")
            .arg("--format=%an%x09%at")
            .arg("--")
            .arg(path)
            .output()
            .await;

        let output = match output {
            Ok(o) if o.status.success() => o,
            _ => return true,
        };

        let text = match String::from_utf8(output.stdout) {
            Ok(t) => t,
            Err(_) => return true,
        };
        let text = text.trim();
        if text.is_empty() {
            return true; // no history
        }

        let mut parts = text.splitn(2, '\t');
        let author = parts.next().unwrap_or_default();
        let timestamp = parts.next().and_then(|t| t.parse::<i64>().ok());

        if author == agent {
            return true;
        }

        let Some(commit_ts) = timestamp else {
            return true;
        };
        let commit_time = chrono::DateTime::from_timestamp(commit_ts, 0);
        let Some(commit_time) = commit_time else {
            return true;
        };
        let elapsed = chrono::Utc::now() - commit_time;
        elapsed > chrono::Duration::minutes(window_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn in_progress(id: &str, assignee: &str, files: &[&str]) -> Task {
        let mut t = Task::new("p".into(), id.into(), "".into(), Priority::Medium);
        t.id = id.to_string();
        t.status = TaskStatus::InProgress;
        t.assignee = Some(assignee.to_string());
        t.files = files.iter().map(|s| s.to_string()).collect();
        t
    }

    #[test]
    fn overlapping_in_progress_tasks_conflict() {
        let tasks = vec![
            in_progress("t1", "a", &["shared.rs"]),
            in_progress("t2", "b", &["shared.rs"]),
            in_progress("t3", "c", &["solo.rs"]),
        ];
        let conflicts = ConflictDetector::detect_overlapping_tasks(&tasks, "p");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].file_path, "shared.rs");
        assert_eq!(conflicts[0].strategy, ConflictStrategy::Review);
    }

    #[test]
    fn resolve_strategy_maps_each_variant() {
        let base = FileConflict {
            project_id: "p".into(),
            file_path: "f".into(),
            agents: vec![],
            strategy: ConflictStrategy::Lock,
            resolution: None,
            resolver: None,
        };
        assert_eq!(
            ConflictDetector::resolve_strategy(&base, ConflictStrategy::Review),
            ConflictAction::Wait
        );
        let merge = FileConflict {
            strategy: ConflictStrategy::Merge,
            ..base.clone()
        };
        assert_eq!(
            ConflictDetector::resolve_strategy(&merge, ConflictStrategy::Lock),
            ConflictAction::Merge
        );
        let review = FileConflict {
            strategy: ConflictStrategy::Review,
            ..base
        };
        assert_eq!(
            ConflictDetector::resolve_strategy(&review, ConflictStrategy::Lock),
            ConflictAction::Human
        );
    }
}
