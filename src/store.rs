//! SessionStore — SQLite persistence for the session-scoped turn log.
//!
//! One table, `turns`, keyed by `(session_key, seq)`. Sequence numbers are
//! assigned inside the INSERT itself, so concurrent appends to the same
//! session can neither duplicate a number nor leave a gap, and readers never
//! observe a half-written turn.

use crate::error::{Error, Result};
use crate::types::Turn;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Reject empty or whitespace-only session keys before any I/O.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::InvalidSessionKey(
            "session key must be non-empty".into(),
        ));
    }
    Ok(())
}

/// SQLite-backed session store.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) a session store at the given path.
    pub async fn from_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // Enable WAL for read/write concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Session store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for tests and ephemeral deployments).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        debug!("In-memory session store initialized");
        Ok(store)
    }

    /// Default on-disk location: `<data dir>/mneme/memory.db`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mneme")
            .join("memory.db")
    }

    /// Open the store at [`SessionStore::default_path`].
    pub async fn from_default_path() -> Result<Self> {
        Self::from_path(&Self::default_path()).await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id          TEXT PRIMARY KEY,
                session_key TEXT NOT NULL,
                seq         INTEGER NOT NULL,
                input       TEXT NOT NULL,
                output      TEXT,
                created_at  TEXT NOT NULL,
                UNIQUE (session_key, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_session
             ON turns(session_key, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Open a handle scoped to one session.
    ///
    /// Validates the key; does not touch storage (sessions are created
    /// lazily on first append).
    pub fn open_session(&self, key: &str) -> Result<SessionHandle> {
        validate_key(key)?;
        Ok(SessionHandle {
            store: self.clone(),
            key: key.to_string(),
        })
    }

    /// Append a turn, assigning the next sequence number for the session.
    ///
    /// Fails with [`Error::InvalidSessionKey`] for empty keys and
    /// [`Error::Validation`] when both texts are empty.
    pub async fn append(
        &self,
        key: &str,
        input_text: &str,
        output_text: Option<&str>,
    ) -> Result<Turn> {
        validate_key(key)?;
        if input_text.is_empty() && output_text.map_or(true, str::is_empty) {
            return Err(Error::Validation(
                "turn needs input text or output text".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        // The subselect runs inside the same statement as the insert, so the
        // sequence number is assigned atomically under SQLite's single-writer
        // lock. The UNIQUE constraint backstops the invariant.
        sqlx::query(
            "INSERT INTO turns (id, session_key, seq, input, output, created_at)
             VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(seq) + 1, 0) FROM turns WHERE session_key = ?2),
                ?3, ?4, ?5
             )",
        )
        .bind(&id)
        .bind(key)
        .bind(input_text)
        .bind(output_text)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, session_key, seq, input, output, created_at
             FROM turns WHERE id = ?1",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await?;

        let turn = Self::row_to_turn(&row)?;
        debug!(session_key = key, seq = turn.seq, "Appended turn");
        Ok(turn)
    }

    /// Up to `limit` most recent turns, newest first.
    ///
    /// `limit == 0` returns an empty list; a limit beyond the stored turn
    /// count returns everything.
    pub async fn list_recent(&self, key: &str, limit: usize) -> Result<Vec<Turn>> {
        validate_key(key)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, session_key, seq, input, output, created_at
             FROM turns WHERE session_key = ?1
             ORDER BY seq DESC LIMIT ?2",
        )
        .bind(key)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    /// Delete all turns for a session, returning the number removed.
    ///
    /// Clearing a never-used session returns 0 and is not an error.
    pub async fn clear(&self, key: &str) -> Result<u64> {
        validate_key(key)?;
        let result = sqlx::query("DELETE FROM turns WHERE session_key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        debug!(session_key = key, deleted, "Cleared session");
        Ok(deleted)
    }

    /// Number of turns stored for a session.
    pub async fn turn_count(&self, key: &str) -> Result<u64> {
        validate_key(key)?;
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM turns WHERE session_key = ?1")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("cnt")? as u64)
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn> {
        let created_str: String = row.try_get("created_at")?;
        Ok(Turn {
            id: row.try_get("id")?,
            session_key: row.try_get("session_key")?,
            seq: row.try_get::<i64, _>("seq")? as u64,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            created_at: DateTime::parse_from_rfc3339(&created_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// A store handle scoped to one validated session key.
#[derive(Clone)]
pub struct SessionHandle {
    store: SessionStore,
    key: String,
}

impl SessionHandle {
    /// The session key this handle is scoped to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a turn to this session.
    pub async fn append(&self, input_text: &str, output_text: Option<&str>) -> Result<Turn> {
        self.store.append(&self.key, input_text, output_text).await
    }

    /// Up to `limit` most recent turns, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Turn>> {
        self.store.list_recent(&self.key, limit).await
    }

    /// Delete all turns for this session.
    pub async fn clear(&self) -> Result<u64> {
        self.store.clear(&self.key).await
    }

    /// Number of turns stored for this session.
    pub async fn turn_count(&self) -> Result<u64> {
        self.store.turn_count(&self.key).await
    }
}
