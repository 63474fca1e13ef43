use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quizwheel_core::{Item, PersistedState, SnapshotStore, WheelError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const ACTIVE_KEY: &str = "active_items";
const RETIRED_KEY: &str = "retired_names";
const HISTORY_KEY: &str = "history";
const USER_ADDED_KEY: &str = "user_added";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS snapshots (
  key TEXT PRIMARY KEY,
  body TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

/// Durable key-value snapshot store over `SQLite`: one JSON document per
/// persisted collection, rewritten wholesale after every mutation.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a `SQLite`-backed snapshot store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema
    /// version. Safe to call on every open.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step
    /// fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.conn
                .execute_batch(MIGRATION_001_SQL)
                .context("failed to create snapshots table")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Read one snapshot document. A missing row yields `None`; a row whose
    /// body no longer deserializes is discarded so the caller falls back to
    /// the collection default.
    fn read_snapshot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM snapshots WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("failed to read snapshot `{key}`"))?;

        let Some(body) = body else {
            return Ok(None);
        };

        match serde_json::from_str(&body) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!("discarding malformed snapshot `{key}`: {err}");
                Ok(None)
            }
        }
    }

    fn write_snapshot<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize snapshot `{key}`"))?;
        let updated_at = now_rfc3339()?;
        self.conn
            .execute(
                "INSERT INTO snapshots(key, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![key, body, updated_at],
            )
            .with_context(|| format!("failed to write snapshot `{key}`"))?;
        Ok(())
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&mut self) -> Result<PersistedState, WheelError> {
        let active: Option<Vec<Item>> = self.read_snapshot(ACTIVE_KEY).map_err(storage_error)?;
        let retired: BTreeSet<String> =
            self.read_snapshot(RETIRED_KEY).map_err(storage_error)?.unwrap_or_default();
        let history: Vec<Item> =
            self.read_snapshot(HISTORY_KEY).map_err(storage_error)?.unwrap_or_default();
        let user_added: Vec<Item> =
            self.read_snapshot(USER_ADDED_KEY).map_err(storage_error)?.unwrap_or_default();

        Ok(PersistedState { active, retired, history, user_added })
    }

    fn save_active(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.write_snapshot(ACTIVE_KEY, &items).map_err(storage_error)
    }

    fn save_retired(&mut self, names: &BTreeSet<String>) -> Result<(), WheelError> {
        self.write_snapshot(RETIRED_KEY, names).map_err(storage_error)
    }

    fn save_history(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.write_snapshot(HISTORY_KEY, &items).map_err(storage_error)
    }

    fn save_user_added(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.write_snapshot(USER_ADDED_KEY, &items).map_err(storage_error)
    }
}

fn storage_error(err: anyhow::Error) -> WheelError {
    WheelError::Storage(format!("{err:#}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()
        .context("failed to read current schema version")?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
