//! Persistent per-project preferences.
//!
//! Projects themselves are rediscovered from disk on every refresh; only the
//! operator's overrides (display name, hidden flag) survive restarts. Stored
//! in a single SQLite table keyed by project id.

use std::collections::HashMap;
use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open preference database: {0}")]
    ConnectionError(#[source] sqlx::Error),
    #[error("failed to create preference schema: {0}")]
    SetupError(#[source] sqlx::Error),
    #[error("preference query failed: {0}")]
    QueryError(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProjectPreference {
    pub project_id: String,
    pub display_name: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    db: SqlitePool,
}

impl PreferenceStore {
    /// Opens (creating if missing) the database at `path` and ensures the
    /// schema exists.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(Error::ConnectionError)?;

        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS project_preferences (
    project_id   TEXT PRIMARY KEY,
    display_name TEXT,
    hidden       INTEGER NOT NULL DEFAULT 0
)
"#,
        )
        .execute(&db)
        .await
        .map_err(Error::SetupError)?;

        Ok(Self { db })
    }

    pub async fn get_preference(&self, project_id: &str) -> Result<Option<ProjectPreference>> {
        let preference = sqlx::query_as::<_, ProjectPreference>(
            "SELECT project_id, display_name, hidden FROM project_preferences WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(preference)
    }

    pub async fn get_all_preferences(&self) -> Result<HashMap<String, ProjectPreference>> {
        let rows = sqlx::query_as::<_, ProjectPreference>(
            "SELECT project_id, display_name, hidden FROM project_preferences",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|p| (p.project_id.clone(), p))
            .collect())
    }

    /// Sets or clears the display name, creating the row when absent.
    pub async fn set_display_name(
        &self,
        project_id: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO project_preferences (project_id, display_name) VALUES (?, ?)
ON CONFLICT(project_id) DO UPDATE SET display_name = excluded.display_name
"#,
        )
        .bind(project_id)
        .bind(display_name)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn set_hidden(&self, project_id: &str, hidden: bool) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO project_preferences (project_id, hidden) VALUES (?, ?)
ON CONFLICT(project_id) DO UPDATE SET hidden = excluded.hidden
"#,
        )
        .bind(project_id)
        .bind(hidden)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn delete_preference(&self, project_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM project_preferences WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> PreferenceStore {
        PreferenceStore::connect(&dir.path().join("prefs.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        assert!(store.get_preference("abc123").await.unwrap().is_none());

        store
            .set_display_name("abc123", Some("My Stack"))
            .await
            .unwrap();
        let preference = store.get_preference("abc123").await.unwrap().unwrap();
        assert_eq!(preference.display_name.as_deref(), Some("My Stack"));
        assert!(!preference.hidden);

        store.set_display_name("abc123", None).await.unwrap();
        let preference = store.get_preference("abc123").await.unwrap().unwrap();
        assert_eq!(preference.display_name, None);
    }

    #[tokio::test]
    async fn test_set_hidden_keeps_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store
            .set_display_name("abc123", Some("My Stack"))
            .await
            .unwrap();
        store.set_hidden("abc123", true).await.unwrap();

        let preference = store.get_preference("abc123").await.unwrap().unwrap();
        assert!(preference.hidden);
        assert_eq!(preference.display_name.as_deref(), Some("My Stack"));
    }

    #[tokio::test]
    async fn test_get_all_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.set_hidden("a", true).await.unwrap();
        store.set_hidden("b", false).await.unwrap();

        let all = store.get_all_preferences().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all["a"].hidden);

        store.delete_preference("a").await.unwrap();
        assert!(store.get_preference("a").await.unwrap().is_none());
        assert_eq!(store.get_all_preferences().await.unwrap().len(), 1);
    }
}
