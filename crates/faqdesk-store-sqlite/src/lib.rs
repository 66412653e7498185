use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use faqdesk_core::{FaqEntry, FaqId};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

/// Constant `sync_type` recorded for every spreadsheet sync attempt.
pub const SYNC_TYPE_GOOGLE_SHEETS: &str = "google_sheets";

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS faqs (
  id TEXT PRIMARY KEY,
  question TEXT NOT NULL,
  answer TEXT NOT NULL,
  category TEXT NOT NULL,
  keywords_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
  sort_order INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_faqs_is_active ON faqs(is_active);
CREATE INDEX IF NOT EXISTS idx_faqs_category ON faqs(category);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS sync_logs (
  id TEXT PRIMARY KEY,
  sync_type TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('in_progress','success','error')),
  message TEXT NOT NULL,
  synced_count INTEGER NOT NULL,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_created_at ON sync_logs(created_at);
";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Success,
    Error,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One audit row for one sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLog {
    pub id: String,
    pub sync_type: String,
    pub status: SyncStatus,
    pub message: String,
    pub synced_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed FAQ store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
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

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version < 2 {
            self.conn.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
            record_schema_version(&self.conn, 2)?;
            version = 2;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Load the active FAQ set in display order: `sort_order` ascending, then
    /// `created_at` descending. This is the corpus every scorer call sees.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_active(&self) -> Result<Vec<FaqEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, question, answer, category, keywords_json,
                    created_at, updated_at, is_active, sort_order
             FROM faqs
             WHERE is_active = 1
             ORDER BY sort_order ASC, created_at DESC",
        )?;

        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let id_raw: String = row.get(0)?;
            let keywords_json: String = row.get(4)?;

            entries.push(FaqEntry {
                id: parse_faq_id(&id_raw)?,
                question: row.get(1)?,
                answer: row.get(2)?,
                category: row.get(3)?,
                keywords: serde_json::from_str(&keywords_json)
                    .context("failed to deserialize keywords")?,
                created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
                updated_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
                is_active: row.get::<_, i64>(7)? == 1,
                sort_order: row.get(8)?,
            });
        }

        Ok(entries)
    }

    /// Replace the active set in one transaction: deactivate every currently
    /// active row, then insert the new generation as active. Either both
    /// happen or neither does.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write in the transaction fails.
    pub fn replace_active_set(&mut self, entries: &[FaqEntry]) -> Result<usize> {
        for entry in entries {
            entry.validate().map_err(|err| anyhow!("faq validation failed: {err}"))?;
        }

        let now = now_rfc3339()?;
        let tx = self.conn.transaction().context("failed to start replace transaction")?;

        tx.execute(
            "UPDATE faqs SET is_active = 0, updated_at = ?1 WHERE is_active = 1",
            params![now],
        )
        .context("failed to deactivate active faqs")?;

        for entry in entries {
            tx.execute(
                "INSERT INTO faqs(
                    id, question, answer, category, keywords_json,
                    created_at, updated_at, is_active, sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id.to_string(),
                    entry.question,
                    entry.answer,
                    entry.category,
                    serde_json::to_string(&entry.keywords)
                        .context("failed to serialize keywords")?,
                    rfc3339(entry.created_at)?,
                    rfc3339(entry.updated_at)?,
                    i64::from(entry.is_active),
                    entry.sort_order,
                ],
            )
            .context("failed to insert faq row")?;
        }

        tx.commit().context("failed to commit replace transaction")?;
        Ok(entries.len())
    }

    /// Count rows currently flagged active.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_active(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM faqs WHERE is_active = 1", [], |row| row.get(0))
            .context("failed to count active faqs")
    }

    /// Count all rows across generations.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_total(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM faqs", [], |row| row.get(0))
            .context("failed to count faqs")
    }

    /// Record the start of one sync attempt and return the audit row.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_sync_log(&mut self, status: SyncStatus, message: &str) -> Result<SyncLog> {
        let log = SyncLog {
            id: Ulid::new().to_string(),
            sync_type: SYNC_TYPE_GOOGLE_SHEETS.to_string(),
            status,
            message: message.to_string(),
            synced_count: 0,
            created_at: OffsetDateTime::now_utc(),
        };

        self.conn
            .execute(
                "INSERT INTO sync_logs(id, sync_type, status, message, synced_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    log.id,
                    log.sync_type,
                    log.status.as_str(),
                    log.message,
                    log.synced_count,
                    rfc3339(log.created_at)?,
                ],
            )
            .context("failed to insert sync log")?;

        Ok(log)
    }

    /// Update one audit row with the attempt outcome.
    ///
    /// # Errors
    /// Returns an error when the update fails or the row does not exist.
    pub fn update_sync_log(
        &mut self,
        id: &str,
        status: SyncStatus,
        message: &str,
        synced_count: i64,
    ) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE sync_logs SET status = ?2, message = ?3, synced_count = ?4 WHERE id = ?1",
                params![id, status.as_str(), message, synced_count],
            )
            .context("failed to update sync log")?;

        if updated == 0 {
            return Err(anyhow!("sync log not found: {id}"));
        }
        Ok(())
    }

    /// List all sync attempts, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_sync_logs(&self) -> Result<Vec<SyncLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sync_type, status, message, synced_count, created_at
             FROM sync_logs
             ORDER BY created_at DESC, id DESC",
        )?;

        let mut rows = stmt.query([])?;
        let mut logs = Vec::new();

        while let Some(row) = rows.next()? {
            let status_raw: String = row.get(2)?;
            logs.push(SyncLog {
                id: row.get(0)?,
                sync_type: row.get(1)?,
                status: SyncStatus::parse(&status_raw)
                    .ok_or_else(|| anyhow!("unknown sync status: {status_raw}"))?,
                message: row.get(3)?,
                synced_count: row.get(4)?,
                created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
            });
        }

        Ok(logs)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
    })
    .context("failed to read schema version")
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_rfc3339()?],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn parse_faq_id(value: &str) -> Result<FaqId> {
    let ulid = Ulid::from_str(value).map_err(|err| anyhow!("invalid faq id {value}: {err}"))?;
    Ok(FaqId(ulid))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format rfc3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid rfc3339 timestamp: {value}"))
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}
