//! Outcome record store.
//!
//! Append-only. The orchestrator treats every write as best-effort, so errors
//! raised here are logged by the caller and never reach the user.
//!
//! [`SqliteRecordStore`] connects eagerly and is what `careline init` and
//! `careline records` use. The query pipeline holds a [`LazyRecordStore`],
//! which defers the connection to the first append so an unreachable database
//! can only fail individual writes.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

use crate::db;
use crate::error::{CarelineError, Result};
use crate::migrate;
use crate::models::{OutcomeRecord, RiskAssessment, MAX_INPUT_CHARS};
use crate::normalize::preview;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one outcome. Returns the new row id.
    async fn append(&self, symptoms: &str, risk: &RiskAssessment) -> Result<i64>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<OutcomeRecord>>;
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Connect to (creating if needed) the store at `path` and ensure its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, symptoms: &str, risk: &RiskAssessment) -> Result<i64> {
        if !(0.0..=1.0).contains(&risk.score) {
            return Err(CarelineError::invalid(format!(
                "score must be within [0, 1], got {}",
                risk.score
            )));
        }

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let id = sqlx::query(
            "INSERT INTO records (symptoms, risk_level, score, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(preview(symptoms, MAX_INPUT_CHARS))
        .bind(risk.tier.as_str())
        .bind(risk.score)
        .bind(&created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<OutcomeRecord>> {
        let rows = sqlx::query(
            "SELECT id, symptoms, risk_level, score, created_at FROM records ORDER BY id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| OutcomeRecord {
                id: row.get("id"),
                symptoms: row.get("symptoms"),
                risk_level: row.get("risk_level"),
                score: row.get("score"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

/// A [`SqliteRecordStore`] opened on first use.
///
/// A failed open is reported as [`CarelineError::Persistence`] for that call
/// and retried on the next one.
pub struct LazyRecordStore {
    path: PathBuf,
    store: OnceCell<SqliteRecordStore>,
}

impl LazyRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: OnceCell::new(),
        }
    }

    async fn store(&self) -> Result<&SqliteRecordStore> {
        self.store
            .get_or_try_init(|| SqliteRecordStore::open(&self.path))
            .await
            .map_err(|e| {
                CarelineError::Persistence(format!(
                    "record store {}: {}",
                    self.path.display(),
                    e
                ))
            })
    }
}

#[async_trait]
impl RecordStore for LazyRecordStore {
    async fn append(&self, symptoms: &str, risk: &RiskAssessment) -> Result<i64> {
        self.store().await?.append(symptoms, risk).await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<OutcomeRecord>> {
        self.store().await?.recent(limit).await
    }
}
