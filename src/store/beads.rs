use super::StateStore;
use crate::models::{Priority, Task, TaskStatus};
use crate::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct BeadFile {
    bead_id: String,
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    convoy_id: Option<String>,
    #[serde(default)]
    convoy_name: Option<String>,
}

fn map_bead_status(status: &str) -> TaskStatus {
    match status {
        "complete" => TaskStatus::Completed,
        "in_progress" => TaskStatus::InProgress,
        "blocked" => TaskStatus::Blocked,
        _ => TaskStatus::Pending,
    }
}

/// Outcome of a directory import: `skipped` counts bead ids already
/// present as a task's `metadata.bead_id` in this project.
#[derive(Debug, Default, serde::Serialize)]
pub struct BeadImportResult {
    pub imported: u64,
    pub skipped: u64,
}

impl StateStore {
    /// Reads every `*.json` file under `dir` as a bead, deduping on
    /// `metadata.bead_id` against tasks already in `project_id`.
    /// Dependencies that reference bead ids not yet seen in this import
    /// batch or the existing task set are left unresolved (recorded in
    /// the task's `dependencies` list only when the corresponding task
    /// id is known).
    pub async fn import_beads(&self, project_id: &str, dir: &Path) -> Result<BeadImportResult> {
        let existing = self.list_tasks(project_id, &Default::default()).await?;
        let mut known_bead_ids: HashMap<String, String> = existing
            .iter()
            .filter_map(|t| {
                t.metadata
                    .get("bead_id")
                    .and_then(|v| v.as_str())
                    .map(|id| (id.to_string(), t.id.clone()))
            })
            .collect();

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut beads = Vec::new();
        for path in paths {
            let raw = tokio::fs::read_to_string(&path).await?;
            if let Ok(bead) = serde_json::from_str::<BeadFile>(&raw) {
                beads.push(bead);
            }
        }

        let mut result = BeadImportResult::default();
        for bead in beads {
            if known_bead_ids.contains_key(&bead.bead_id) {
                result.skipped += 1;
                continue;
            }

            let priority = bead
                .priority
                .as_deref()
                .and_then(|p| p.parse::<Priority>().ok())
                .unwrap_or(Priority::Medium);

            let description = if bead.acceptance_criteria.is_empty() {
                String::new()
            } else {
                bead.acceptance_criteria.join("\n")
            };

            let mut task = Task::new(project_id.to_string(), bead.title.clone(), description, priority);
            task.status = map_bead_status(&bead.status);
            task.dependencies = bead
                .depends_on
                .iter()
                .filter_map(|dep| known_bead_ids.get(dep).cloned())
                .collect();
            task.metadata
                .insert("bead_id".to_string(), serde_json::json!(bead.bead_id));
            if let Some(convoy_id) = &bead.convoy_id {
                task.metadata
                    .insert("convoy_id".to_string(), serde_json::json!(convoy_id));
            }
            if let Some(convoy_name) = &bead.convoy_name {
                task.metadata
                    .insert("convoy_name".to_string(), serde_json::json!(convoy_name));
            }

            self.create_task(&task).await?;
            known_bead_ids.insert(bead.bead_id, task.id);
            result.imported += 1;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Project;
    use std::io::Write;

    async fn seeded() -> (StateStore, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();
        (store, project.id)
    }

    fn write_bead(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn second_import_of_same_directory_skips_everything() {
        let (store, project_id) = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        write_bead(
            dir.path(),
            "b1.json",
            r#"{"bead_id":"b1","title":"First bead","status":"complete","priority":"high","acceptance_criteria":["works"]}"#,
        );

        let first = store.import_beads(&project_id, dir.path()).await.unwrap();
        assert_eq!(first.imported, 1);
        assert_eq!(first.skipped, 0);

        let second = store.import_beads(&project_id, dir.path()).await.unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 1);

        let tasks = store.list_tasks(&project_id, &Default::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn dependency_resolves_to_task_id_when_known() {
        let (store, project_id) = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        write_bead(
            dir.path(),
            "a.json",
            r#"{"bead_id":"bead-a","title":"A","status":"pending"}"#,
        );
        write_bead(
            dir.path(),
            "b.json",
            r#"{"bead_id":"bead-b","title":"B","status":"pending","depends_on":["bead-a"]}"#,
        );

        store.import_beads(&project_id, dir.path()).await.unwrap();
        let tasks = store.list_tasks(&project_id, &Default::default()).await.unwrap();
        let a = tasks.iter().find(|t| t.title == "A").unwrap();
        let b = tasks.iter().find(|t| t.title == "B").unwrap();
        assert_eq!(b.dependencies, vec![a.id.clone()]);
    }
}
