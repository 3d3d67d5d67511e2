use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub query: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Like,
    Dislike,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionCounts {
    pub likes: i64,
    pub dislikes: i64,
}

/// Submitted queries and per-message reactions in one SQLite file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn default_path() -> PathBuf {
        Config::get_config_dir().join("history.sqlite")
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let store = HistoryStore { path: path.to_path_buf() };
        store.init()?;
        Ok(store)
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))
    }

    fn init(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS reactions (
                message_id TEXT PRIMARY KEY,
                likes INTEGER NOT NULL DEFAULT 0,
                dislikes INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(())
    }

    pub fn add_query(&self, query: &str) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO queries (query, created_at) VALUES (?1, ?2)",
            params![query, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn list_queries(&self, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT query, created_at
             FROM queries
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let secs: i64 = row.get(1)?;
            Ok(HistoryEntry {
                query: row.get(0)?,
                created_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            })
        })?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM queries", [])?;
        Ok(())
    }

    /// Records one reaction and returns the updated counts.
    pub fn react(&self, message_id: Uuid, reaction: Reaction) -> anyhow::Result<ReactionCounts> {
        let (like, dislike) = match reaction {
            Reaction::Like => (1, 0),
            Reaction::Dislike => (0, 1),
        };
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO reactions (message_id, likes, dislikes) VALUES (?1, ?2, ?3)
             ON CONFLICT(message_id) DO UPDATE SET
                likes = likes + excluded.likes,
                dislikes = dislikes + excluded.dislikes",
            params![message_id.to_string(), like, dislike],
        )?;
        drop(conn);
        self.reactions(message_id)
    }

    pub fn reactions(&self, message_id: Uuid) -> anyhow::Result<ReactionCounts> {
        let conn = self.connect()?;
        let counts = conn
            .query_row(
                "SELECT likes, dislikes FROM reactions WHERE message_id = ?1",
                params![message_id.to_string()],
                |row| Ok(ReactionCounts { likes: row.get(0)?, dislikes: row.get(1)? }),
            )
            .optional()?;
        Ok(counts.unwrap_or_default())
    }
}
