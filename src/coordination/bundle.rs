use crate::models::{ProjectOnboarding, Task, TaskStatus};
use serde::Serialize;

/// Briefing handed to an agent on claim and on `refresh_context`. Most
/// fields are pulled verbatim from the project's onboarding config; only
/// `taskContext` and `isFirstTask` are computed per call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    pub project_name: String,
    pub current_focus: Option<String>,
    pub project_goals: Vec<String>,
    pub agent_instructions: Option<String>,
    pub style_guide: Option<String>,
    pub checkpoint_rules: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
    pub relevant_patterns: Vec<String>,
    pub task_context: TaskContext,
    pub is_first_task: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub expected_files: Vec<String>,
    pub related_tasks: Vec<String>,
}

/// `relatedTasks` = the claimed task's own dependencies, union other
/// in-progress/claimed tasks that touch any of the same files. The
/// current task is always excluded, and the result is deduplicated.
pub fn related_tasks(task: &Task, all_tasks: &[Task]) -> Vec<String> {
    let mut related: Vec<String> = task.dependencies.clone();

    for other in all_tasks {
        if other.id == task.id {
            continue;
        }
        if !matches!(other.status, TaskStatus::InProgress | TaskStatus::Claimed) {
            continue;
        }
        if other.files.iter().any(|f| task.files.contains(f)) {
            related.push(other.id.clone());
        }
    }

    related.sort();
    related.dedup();
    related
}

pub fn build_context_bundle(
    project_name: &str,
    onboarding: Option<&ProjectOnboarding>,
    task: &Task,
    all_tasks: &[Task],
    is_first_task: bool,
) -> ContextBundle {
    let onboarding = onboarding.cloned().unwrap_or_default();
    ContextBundle {
        project_name: project_name.to_string(),
        current_focus: onboarding.welcome_message.clone(),
        project_goals: onboarding.project_goals,
        agent_instructions: onboarding.agent_instructions,
        style_guide: onboarding.style_guide,
        checkpoint_rules: onboarding.checkpoint_rules,
        allowed_paths: onboarding.allowed_paths,
        denied_paths: onboarding.denied_paths,
        relevant_patterns: onboarding
            .zones
            .iter()
            .map(|z| z.pattern.clone())
            .collect(),
        task_context: TaskContext {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            expected_files: task.files.clone(),
            related_tasks: related_tasks(task, all_tasks),
        },
        is_first_task,
    }
}

/// Markdown rendering used by the `claim_task` / `refresh_context` tool
/// responses — the wire protocol returns text, not raw JSON.
pub fn render_markdown(bundle: &ContextBundle, checkpoint_marker: bool) -> String {
    let mut out = String::new();

    if bundle.is_first_task {
        if let Some(welcome) = &bundle.current_focus {
            out.push_str(&format!("# Welcome to {}\n\n{}\n\n", bundle.project_name, welcome));
        }
    }

    if checkpoint_marker {
        out.push_str("**Checkpoint**: periodically summarize your progress.\n\n");
    }

    out.push_str(&format!("## Task: {}\n\n{}\n\n", bundle.task_context.title, bundle.task_context.description));

    if !bundle.project_goals.is_empty() {
        out.push_str("### Project goals\n");
        for goal in &bundle.project_goals {
            out.push_str(&format!("- {goal}\n"));
        }
        out.push('\n');
    }

    if let Some(instructions) = &bundle.agent_instructions {
        out.push_str(&format!("### Agent instructions\n{instructions}\n\n"));
    }

    if let Some(style_guide) = &bundle.style_guide {
        out.push_str(&format!("### Style guide\n{style_guide}\n\n"));
    }

    if !bundle.task_context.expected_files.is_empty() {
        out.push_str("### Expected files\n");
        for file in &bundle.task_context.expected_files {
            out.push_str(&format!("- `{file}`\n"));
        }
        out.push('\n');
    }

    if !bundle.task_context.related_tasks.is_empty() {
        out.push_str("### Related tasks\n");
        for id in &bundle.task_context.related_tasks {
            out.push_str(&format!("- {id}\n"));
        }
        out.push('\n');
    }

    if !bundle.denied_paths.is_empty() {
        out.push_str("### Do not touch\n");
        for path in &bundle.denied_paths {
            out.push_str(&format!("- `{path}`\n"));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Task};

    fn task_with_files(id: &str, status: TaskStatus, files: &[&str]) -> Task {
        let mut t = Task::new("p".into(), id.into(), "".into(), Priority::Medium);
        t.id = id.to_string();
        t.status = status;
        t.files = files.iter().map(|s| s.to_string()).collect();
        t
    }

    #[test]
    fn related_tasks_includes_dependencies_and_shared_files() {
        let mut current = task_with_files("t1", TaskStatus::Claimed, &["a.rs"]);
        current.dependencies = vec!["dep1".into()];
        let other = task_with_files("t2", TaskStatus::InProgress, &["a.rs"]);
        let unrelated = task_with_files("t3", TaskStatus::Pending, &["a.rs"]);

        let related = related_tasks(&current, &[current.clone(), other.clone(), unrelated]);
        assert_eq!(related, vec!["dep1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn related_tasks_excludes_current_and_dedupes() {
        let mut current = task_with_files("t1", TaskStatus::Claimed, &["a.rs"]);
        current.dependencies = vec!["t1".into()];
        let related = related_tasks(&current, &[current.clone()]);
        assert_eq!(related, vec!["t1".to_string()]);
    }
}
