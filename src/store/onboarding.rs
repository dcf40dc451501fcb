use super::{json_list, parse_json_list, StateStore};
use crate::models::{ProjectOnboarding, Zone};
use crate::Result;
use sqlx::Row;

impl StateStore {
    pub async fn get_onboarding(&self, project_id: &str) -> Result<Option<ProjectOnboarding>> {
        let row = sqlx::query("SELECT * FROM project_onboarding WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| ProjectOnboarding {
            welcome_message: row.get("welcome_message"),
            project_goals: parse_json_list(&row.get::<String, _>("project_goals")),
            agent_instructions: row.get("agent_instructions"),
            style_guide: row.get("style_guide"),
            checkpoint_rules: parse_json_list(&row.get::<String, _>("checkpoint_rules")),
            allowed_paths: parse_json_list(&row.get::<String, _>("allowed_paths")),
            denied_paths: parse_json_list(&row.get::<String, _>("denied_paths")),
            zones: serde_json::from_str::<Vec<Zone>>(&row.get::<String, _>("zones")).unwrap_or_default(),
        }))
    }

    pub async fn set_onboarding(&self, project_id: &str, config: &ProjectOnboarding) -> Result<()> {
        sqlx::query(
            "INSERT INTO project_onboarding (project_id, welcome_message, project_goals,
                agent_instructions, style_guide, checkpoint_rules, allowed_paths, denied_paths, zones)
             VALUES (?,?,?,?,?,?,?,?,?)
             ON CONFLICT(project_id) DO UPDATE SET
                welcome_message=excluded.welcome_message,
                project_goals=excluded.project_goals,
                agent_instructions=excluded.agent_instructions,
                style_guide=excluded.style_guide,
                checkpoint_rules=excluded.checkpoint_rules,
                allowed_paths=excluded.allowed_paths,
                denied_paths=excluded.denied_paths,
                zones=excluded.zones",
        )
        .bind(project_id)
        .bind(&config.welcome_message)
        .bind(json_list(&config.project_goals))
        .bind(&config.agent_instructions)
        .bind(&config.style_guide)
        .bind(json_list(&config.checkpoint_rules))
        .bind(json_list(&config.allowed_paths))
        .bind(json_list(&config.denied_paths))
        .bind(serde_json::to_string(&config.zones).unwrap_or_else(|_| "[]".to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Project;

    #[tokio::test]
    async fn onboarding_round_trips_and_upserts() {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();

        assert!(store.get_onboarding(&project.id).await.unwrap().is_none());

        let config = ProjectOnboarding {
            welcome_message: Some("welcome".into()),
            project_goals: vec!["ship it".into()],
            agent_instructions: Some("be terse".into()),
            style_guide: None,
            checkpoint_rules: vec!["checkpoint every 3".into()],
            allowed_paths: vec!["src/**".into()],
            denied_paths: vec!["secrets/**".into()],
            zones: vec![Zone {
                pattern: "src/auth/**".into(),
                owner: Some("claude".into()),
                readonly: false,
            }],
        };
        store.set_onboarding(&project.id, &config).await.unwrap();
        let fetched = store.get_onboarding(&project.id).await.unwrap().unwrap();
        assert_eq!(fetched.welcome_message.as_deref(), Some("welcome"));
        assert_eq!(fetched.zones.len(), 1);

        let mut updated = config;
        updated.welcome_message = Some("updated".into());
        store.set_onboarding(&project.id, &updated).await.unwrap();
        let fetched = store.get_onboarding(&project.id).await.unwrap().unwrap();
        assert_eq!(fetched.welcome_message.as_deref(), Some("updated"));
    }
}
