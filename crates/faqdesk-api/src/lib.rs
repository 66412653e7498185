use std::path::PathBuf;

use anyhow::Result;
use faqdesk_core::{
    compose_reply, filter_entries, rank_entries, CategoryCount, FaqEntry, FaqId, ScoredFaq,
    CHAT_RELATED_LIMIT, DEFAULT_CATEGORY,
};
use faqdesk_source::{parse_keywords, SheetRow, SheetSource, SourceError};
use faqdesk_store_sqlite::{SqliteStore, SyncLog, SyncStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

const SYNC_STARTED_MESSAGE: &str = "Googleスプレッドシートからの同期を開始しました";
const SYNC_EMPTY_MESSAGE: &str = "同期対象のデータがありませんでした";
const SYNC_COMPLETED_MESSAGE: &str = "同期が正常に完了しました";

/// Failures crossing the sync orchestrator boundary. Every variant is also
/// written to the audit log before it propagates.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failure: {0}")]
    Fetch(#[from] SourceError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Outcome of one sync attempt. An empty source is a success with count 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub log_id: String,
    pub status: SyncStatus,
    pub synced_count: i64,
    pub message: String,
}

/// One-shot chat-style answer: composed reply text plus the scored matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub related: Vec<ScoredFaq>,
}

#[derive(Debug, Clone)]
pub struct FaqApi {
    db_path: PathBuf,
}

impl FaqApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<faqdesk_store_sqlite::SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    /// Returns an error when any migration step fails.
    pub fn migrate(&self) -> Result<faqdesk_store_sqlite::SchemaStatus> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        store.schema_status()
    }

    /// Load the full active set in storage order.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn active_entries(&self) -> Result<Vec<FaqEntry>> {
        let store = self.open_store()?;
        store.list_active()
    }

    /// Filter-surface listing: substring match over question/answer/keywords
    /// plus an optional exact category filter, in storage order. The category
    /// `all` (the UI default) and blank strings mean "no category filter".
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_faqs(&self, query: Option<&str>, category: Option<&str>) -> Result<Vec<FaqEntry>> {
        let entries = self.active_entries()?;
        let query = query.unwrap_or("");
        let category = category.filter(|value| !value.is_empty() && *value != "all");
        Ok(filter_entries(&entries, query, category).into_iter().cloned().collect())
    }

    /// Category labels with entry counts for the tab surface.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn categories(&self) -> Result<Vec<CategoryCount>> {
        let entries = self.active_entries()?;
        Ok(faqdesk_core::category_counts(&entries))
    }

    /// Answer one free-text question against the current active set, capped at
    /// the chat attachment limit.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn answer(&self, text: &str) -> Result<ChatReply> {
        let entries = self.active_entries()?;
        let related = rank_entries(&entries, text, Some(CHAT_RELATED_LIMIT));
        let reply = compose_reply(&related);
        Ok(ChatReply { reply, related })
    }

    /// Run one sync attempt: audit start, fetch, replace the active set in a
    /// single transaction, audit the outcome. On any failure the previously
    /// active set is left untouched and the audit row records the error.
    ///
    /// # Errors
    /// Returns [`SyncError::Fetch`] when the source fails and
    /// [`SyncError::Persistence`] when any datastore step fails.
    pub fn sync(&self, source: &dyn SheetSource) -> Result<SyncReport, SyncError> {
        let mut store =
            self.open_store().map_err(|err| SyncError::Persistence(err.to_string()))?;

        let log = store
            .insert_sync_log(SyncStatus::InProgress, SYNC_STARTED_MESSAGE)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        tracing::info!(log_id = %log.id, "faq sync started");

        let rows = match source.fetch() {
            Ok(rows) => rows,
            Err(err) => {
                record_failure(&mut store, &log.id, &err.to_string());
                return Err(SyncError::Fetch(err));
            }
        };

        if rows.is_empty() {
            store
                .update_sync_log(&log.id, SyncStatus::Success, SYNC_EMPTY_MESSAGE, 0)
                .map_err(|err| SyncError::Persistence(err.to_string()))?;
            tracing::info!(log_id = %log.id, "faq sync found no source rows");
            return Ok(SyncReport {
                log_id: log.id,
                status: SyncStatus::Success,
                synced_count: 0,
                message: SYNC_EMPTY_MESSAGE.to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| row_to_entry(row, index, now))
            .collect::<Vec<_>>();

        let synced_count = match store.replace_active_set(&entries) {
            Ok(count) => count,
            Err(err) => {
                record_failure(&mut store, &log.id, &err.to_string());
                return Err(SyncError::Persistence(err.to_string()));
            }
        };
        let synced_count = i64::try_from(synced_count).unwrap_or(i64::MAX);

        store
            .update_sync_log(&log.id, SyncStatus::Success, SYNC_COMPLETED_MESSAGE, synced_count)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        tracing::info!(log_id = %log.id, synced_count, "faq sync completed");

        Ok(SyncReport {
            log_id: log.id,
            status: SyncStatus::Success,
            synced_count,
            message: SYNC_COMPLETED_MESSAGE.to_string(),
        })
    }

    /// List all recorded sync attempts, newest first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn sync_logs(&self) -> Result<Vec<SyncLog>> {
        let store = self.open_store()?;
        store.list_sync_logs()
    }
}

fn record_failure(store: &mut SqliteStore, log_id: &str, message: &str) {
    if let Err(log_err) = store.update_sync_log(log_id, SyncStatus::Error, message, 0) {
        tracing::warn!(log_id, error = %log_err, "failed to record sync failure in audit log");
    }
}

fn row_to_entry(row: SheetRow, index: usize, now: OffsetDateTime) -> FaqEntry {
    let category = if row.category.trim().is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        row.category
    };

    FaqEntry {
        id: FaqId::new(),
        question: row.question,
        answer: row.answer,
        category,
        keywords: parse_keywords(&row.keywords),
        created_at: now,
        updated_at: now,
        is_active: true,
        sort_order: i64::try_from(index).unwrap_or(i64::MAX),
    }
}
