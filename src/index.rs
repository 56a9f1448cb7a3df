//! SQLite passage index.
//!
//! The index is built out of process by an ingestion job and opened read-only
//! here. Layout:
//!
//! ```sql
//! passages(id INTEGER PRIMARY KEY, source TEXT, chunk_index INTEGER, text TEXT)
//! passages_fts USING fts5(passage_id UNINDEXED, text)
//! passage_vectors(passage_id INTEGER, model TEXT, dims INTEGER, embedding BLOB)
//! ```
//!
//! Vectors are little-endian `f32` BLOBs (see [`embedding::vec_to_blob`]).
//!
//! [`create_index`] and [`insert_passage`] write that layout so tests and
//! external tooling can produce a compatible file.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{CarelineError, Result};
use crate::retrieval::PassageSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// FTS5 BM25 ranking.
    Keyword,
    /// Brute-force cosine similarity over stored vectors.
    Semantic,
}

impl std::str::FromStr for SearchMode {
    type Err = CarelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            other => Err(CarelineError::Initialization(format!(
                "unknown retrieval mode: '{}'",
                other
            ))),
        }
    }
}

pub struct SqliteIndex {
    pool: SqlitePool,
    mode: SearchMode,
    embedder: Option<Box<dyn EmbeddingProvider>>,
}

impl SqliteIndex {
    /// Open the index at `path`.
    ///
    /// # Errors
    ///
    /// [`CarelineError::Initialization`] if the file does not exist, cannot be
    /// opened, lacks the `passages` table, or semantic mode was requested
    /// without an embedding provider.
    pub async fn open(
        path: &Path,
        mode: SearchMode,
        embedder: Option<Box<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        if !path.is_file() {
            return Err(CarelineError::Initialization(format!(
                "passage index not found at {}",
                path.display()
            )));
        }

        let pool = db::connect_read_only(path).await.map_err(|e| {
            CarelineError::Initialization(format!(
                "cannot open passage index {}: {}",
                path.display(),
                e
            ))
        })?;

        let has_passages = db::table_exists(&pool, "passages")
            .await
            .map_err(|e| CarelineError::Initialization(e.to_string()))?;
        if !has_passages {
            return Err(CarelineError::Initialization(format!(
                "{} is not a passage index (missing 'passages' table)",
                path.display()
            )));
        }

        if mode == SearchMode::Semantic && embedder.is_none() {
            return Err(CarelineError::Initialization(
                "semantic retrieval requires an embedding provider".into(),
            ));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages")
            .fetch_one(&pool)
            .await
            .map_err(|e| CarelineError::Initialization(e.to_string()))?;
        info!(path = %path.display(), passages = count, mode = ?mode, "passage index opened");

        Ok(Self {
            pool,
            mode,
            embedder,
        })
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT p.text AS text
            FROM (
                SELECT passage_id, rank
                FROM passages_fts
                WHERE passages_fts MATCH ?
                ORDER BY rank
                LIMIT ?
            ) m
            JOIN passages p ON p.id = CAST(m.passage_id AS INTEGER)
            ORDER BY m.rank
            "#,
        )
        .bind(fts)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CarelineError::Retrieval(format!("keyword search: {}", e)))?;

        Ok(rows.iter().map(|row| row.get("text")).collect())
    }

    async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| CarelineError::Retrieval("no embedding provider".into()))?;

        let query_vec = embedder
            .embed_query(query)
            .await
            .map_err(|e| CarelineError::Retrieval(format!("query embedding: {}", e)))?;
        if query_vec.len() != embedder.dims() {
            return Err(CarelineError::Retrieval(format!(
                "query embedding has {} dims, {} expects {}",
                query_vec.len(),
                embedder.model_name(),
                embedder.dims()
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT pv.embedding AS embedding, p.text AS text
            FROM passage_vectors pv
            JOIN passages p ON p.id = pv.passage_id
            WHERE pv.model = ?
            "#,
        )
        .bind(embedder.model_name())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CarelineError::Retrieval(format!("vector scan: {}", e)))?;

        let mut scored: Vec<(f32, String)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                (
                    embedding::cosine_similarity(&query_vec, &vec),
                    row.get("text"),
                )
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, text)| text).collect())
    }
}

#[async_trait]
impl PassageSearch for SqliteIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        match self.mode {
            SearchMode::Keyword => self.keyword_search(query, k).await,
            SearchMode::Semantic => self.semantic_search(query, k).await,
        }
    }
}

/// Turn free text into an FTS5 `OR` query of quoted alphanumeric terms.
///
/// Returns `None` when the text has no searchable terms.
fn fts_query(text: &str) -> Option<String> {
    let mut seen = HashSet::new();
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

// ============ Index building ============

/// Create (or reuse) an index file with the expected schema.
pub async fn create_index(path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = db::connect(path)
        .await
        .with_context(|| format!("Failed to create index at {}", path.display()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passage_vectors (
            passage_id INTEGER PRIMARY KEY REFERENCES passages(id),
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // FTS5 has no IF NOT EXISTS
    if !db::table_exists(&pool, "passages_fts").await? {
        sqlx::query("CREATE VIRTUAL TABLE passages_fts USING fts5(passage_id UNINDEXED, text)")
            .execute(&pool)
            .await?;
    }

    Ok(pool)
}

/// Insert one passage and its FTS row. Returns the passage id.
pub async fn insert_passage(
    pool: &SqlitePool,
    source: &str,
    chunk_index: i64,
    text: &str,
) -> anyhow::Result<i64> {
    let mut tx = pool.begin().await?;

    let id = sqlx::query("INSERT INTO passages (source, chunk_index, text) VALUES (?, ?, ?)")
        .bind(source)
        .bind(chunk_index)
        .bind(text)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    sqlx::query("INSERT INTO passages_fts (passage_id, text) VALUES (?, ?)")
        .bind(id)
        .bind(text)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(id)
}

/// Attach an embedding to a passage, replacing any previous one.
pub async fn insert_vector(
    pool: &SqlitePool,
    passage_id: i64,
    model: &str,
    vector: &[f32],
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO passage_vectors (passage_id, model, dims, embedding) VALUES (?, ?, ?, ?)",
    )
    .bind(passage_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(embedding::vec_to_blob(vector))
    .execute(pool)
    .await?;
    Ok(())
}
