//! Script persistence: JSON blobs in SQLite, keyed by script name.
//!
//! Scripts are immutable once saved; an update is delete-then-save.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::Script;

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("Could not find data directory"))?;
    let db_path = data_dir.join("webpilot").join("scripts.db");

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(db_path)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSummary {
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub created_at: DateTime<Utc>,
}

pub struct ScriptStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScriptStore {
    pub fn open_default() -> Result<Self> {
        Self::open(&default_db_path()?)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets observers read while a save is in flight.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scripts (
                name TEXT PRIMARY KEY,
                description TEXT NOT NULL DEFAULT '',
                step_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scripts_created_at ON scripts(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    /// Save a new script. Fails when the name is taken.
    pub fn save(&self, script: &Script) -> Result<()> {
        let json = serde_json::to_string(script)?;
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO scripts (name, description, step_count, created_at, json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                script.name,
                script.description,
                script.steps.len() as i64,
                script.created_at.to_rfc3339(),
                json
            ],
        )?;
        if inserted == 0 {
            return Err(anyhow!("Script '{}' already exists", script.name));
        }
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Option<Script>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let json: Option<String> = conn
            .query_row(
                "SELECT json FROM scripts WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a script was actually removed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let deleted = conn.execute("DELETE FROM scripts WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    pub fn list(&self) -> Result<Vec<ScriptSummary>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT name, description, step_count, created_at FROM scripts
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (name, description, step_count, created_at) = row?;
            summaries.push(ScriptSummary {
                name,
                description,
                step_count: step_count as usize,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, ScriptStep, Variable};

    fn sample_script(name: &str) -> Script {
        let mut script = Script::new(name, "Sample");
        script.start_url = "https://a.test/".to_string();
        script.steps.push(ScriptStep {
            instruction: "Navigate to https://a.test".to_string(),
            action: Action::navigate("a.test"),
            timestamp: script.created_at,
            screenshot_base64: None,
        });
        script.variables.push(Variable::new("EMAIL", "a@b.test"));
        script
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = ScriptStore::open_in_memory().unwrap();
        let script = sample_script("login");
        store.save(&script).unwrap();

        let loaded = store.load("login").unwrap().unwrap();
        assert_eq!(loaded, script);
    }

    #[test]
    fn saving_a_taken_name_fails() {
        let store = ScriptStore::open_in_memory().unwrap();
        store.save(&sample_script("dup")).unwrap();
        assert!(store.save(&sample_script("dup")).is_err());
    }

    #[test]
    fn update_is_delete_then_save() {
        let store = ScriptStore::open_in_memory().unwrap();
        store.save(&sample_script("flow")).unwrap();

        assert!(store.delete("flow").unwrap());
        let mut updated = sample_script("flow");
        updated.description = "Updated".to_string();
        store.save(&updated).unwrap();

        let loaded = store.load("flow").unwrap().unwrap();
        assert_eq!(loaded.description, "Updated");
    }

    #[test]
    fn delete_missing_returns_false() {
        let store = ScriptStore::open_in_memory().unwrap();
        assert!(!store.delete("ghost").unwrap());
    }

    #[test]
    fn list_returns_summaries() {
        let store = ScriptStore::open_in_memory().unwrap();
        store.save(&sample_script("one")).unwrap();
        store.save(&sample_script("two")).unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.step_count == 1));
    }

    #[test]
    fn load_missing_is_none() {
        let store = ScriptStore::open_in_memory().unwrap();
        assert!(store.load("nope").unwrap().is_none());
    }
}
