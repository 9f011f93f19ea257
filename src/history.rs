//! History store: opaque persistence for completed analyses.
//!
//! The orchestrator saves fire-and-forget after a run returns; nothing here
//! feeds back into a run. The store is a key-value surface (full result
//! documents by run id) plus recency listing and a naive text
//! similarity search over the stored summary documents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::model::AnalysisResult;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
}

/// Per-run metadata row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub brand: String,
    pub visibility_rate: f64,
    pub hypothesis_count: usize,
    pub recommendation_count: usize,
}

/// A stored analysis: metadata plus the searchable summary document.
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub metadata: AnalysisMetadata,
    pub document: String,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn put(&self, metadata: AnalysisMetadata, document: String) -> Result<(), HistoryError>;
    async fn get(&self, run_id: Uuid) -> Result<Option<StoredAnalysis>, HistoryError>;
    async fn list_recent(
        &self,
        brand: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisMetadata>, HistoryError>;
    async fn similarity_search(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<(AnalysisMetadata, f64)>, HistoryError>;
    async fn clear(&self) -> Result<(), HistoryError>;
}

// =============================================================================
// DOCUMENT RENDERING
// =============================================================================

/// Metadata row for a finished run.
pub fn metadata_for(result: &AnalysisResult) -> AnalysisMetadata {
    AnalysisMetadata {
        run_id: result.id,
        timestamp: result.timestamp,
        query: result.request.query.clone(),
        brand: result.request.brand_domain.clone(),
        visibility_rate: result.comparison.brand_score.mention_rate,
        hypothesis_count: result.hypotheses.len(),
        recommendation_count: result.recommendations.len(),
    }
}

/// Searchable text representation of a result.
pub fn render_summary_document(result: &AnalysisResult) -> String {
    let mut parts = vec![
        format!("Query: {}", result.request.query),
        format!("Brand: {}", result.request.brand_domain),
        format!(
            "Visibility: {:.1}%",
            result.comparison.brand_score.mention_rate * 100.0
        ),
        "Hypotheses:".to_string(),
    ];
    for h in &result.hypotheses {
        parts.push(format!("- {}: {}", h.title, h.explanation));
    }
    parts.push("Recommendations:".to_string());
    for r in &result.recommendations {
        parts.push(format!("- {}: {}", r.title, r.description));
    }
    parts.push(format!("Summary: {}", result.summary));

    parts.join("\n")
}

/// Save a result without blocking or failing the caller. At-most-once: a
/// failed save is logged and never retried.
pub fn spawn_save(store: Arc<dyn HistoryStore>, result: &AnalysisResult) {
    let metadata = metadata_for(result);
    let document = render_summary_document(result);
    let run_id = result.id;

    tokio::spawn(async move {
        if let Err(err) = store.put(metadata, document).await {
            tracing::warn!(%run_id, error = %err, "history save failed");
        } else {
            tracing::debug!(%run_id, "analysis saved to history");
        }
    });
}

// =============================================================================
// SQLITE STORE
// =============================================================================

#[derive(Clone)]
pub struct SqliteHistoryStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS analyses (\
               run_id TEXT PRIMARY KEY,\
               created_ms INTEGER NOT NULL,\
               query TEXT NOT NULL,\
               brand TEXT NOT NULL,\
               visibility_rate REAL NOT NULL,\
               hypothesis_count INTEGER NOT NULL,\
               recommendation_count INTEGER NOT NULL,\
               document TEXT NOT NULL,\
               document_hash TEXT NOT NULL\
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("GEOSCOPE_HISTORY_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".geoscope_history.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advisory cross-process lock, held for destructive maintenance.
    pub fn lock_exclusive(&self) -> Result<HistoryLock, HistoryError> {
        HistoryLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, HistoryError>
    where
        F: FnOnce(&Connection) -> Result<R, HistoryError>,
    {
        let guard = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        f(&guard)
    }
}

fn row_metadata(row: &rusqlite::Row<'_>) -> Result<AnalysisMetadata, rusqlite::Error> {
    let run_id: String = row.get(0)?;
    let created_ms: i64 = row.get(1)?;
    Ok(AnalysisMetadata {
        run_id: Uuid::parse_str(&run_id).unwrap_or(Uuid::nil()),
        timestamp: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        query: row.get(2)?,
        brand: row.get(3)?,
        visibility_rate: row.get(4)?,
        hypothesis_count: row.get::<_, i64>(5)? as usize,
        recommendation_count: row.get::<_, i64>(6)? as usize,
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn put(&self, metadata: AnalysisMetadata, document: String) -> Result<(), HistoryError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let document_hash = blake3::hash(document.as_bytes()).to_hex().to_string();
                conn.execute(
                    "INSERT INTO analyses (\
                        run_id, created_ms, query, brand, visibility_rate,\
                        hypothesis_count, recommendation_count, document, document_hash\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(run_id) DO UPDATE SET \
                        created_ms = excluded.created_ms,\
                        query = excluded.query,\
                        brand = excluded.brand,\
                        visibility_rate = excluded.visibility_rate,\
                        hypothesis_count = excluded.hypothesis_count,\
                        recommendation_count = excluded.recommendation_count,\
                        document = excluded.document,\
                        document_hash = excluded.document_hash",
                    params![
                        metadata.run_id.to_string(),
                        metadata.timestamp.timestamp_millis(),
                        metadata.query,
                        metadata.brand,
                        metadata.visibility_rate,
                        metadata.hypothesis_count as i64,
                        metadata.recommendation_count as i64,
                        document,
                        document_hash,
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| HistoryError::Join(e.to_string()))?
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<StoredAnalysis>, HistoryError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, created_ms, query, brand, visibility_rate,\
                            hypothesis_count, recommendation_count, document \
                     FROM analyses WHERE run_id = ?1",
                )?;
                let mut rows = stmt.query(params![run_id.to_string()])?;
                if let Some(row) = rows.next()? {
                    let metadata = row_metadata(row)?;
                    let document: String = row.get(7)?;
                    Ok(Some(StoredAnalysis { metadata, document }))
                } else {
                    Ok(None)
                }
            })
        })
        .await
        .map_err(|e| HistoryError::Join(e.to_string()))?
    }

    async fn list_recent(
        &self,
        brand: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisMetadata>, HistoryError> {
        let store = self.clone();
        let brand = brand.map(String::from);
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let sql = "SELECT run_id, created_ms, query, brand, visibility_rate,\
                                  hypothesis_count, recommendation_count \
                           FROM analyses \
                           WHERE (?1 IS NULL OR brand = ?1) \
                           ORDER BY created_ms DESC LIMIT ?2";
                let mut stmt = conn.prepare(sql)?;
                let mut rows = stmt.query(params![brand, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_metadata(row)?);
                }
                Ok(out)
            })
        })
        .await
        .map_err(|e| HistoryError::Join(e.to_string()))?
    }

    async fn similarity_search(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<(AnalysisMetadata, f64)>, HistoryError> {
        let store = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT run_id, created_ms, query, brand, visibility_rate,\
                            hypothesis_count, recommendation_count, document \
                     FROM analyses",
                )?;
                let mut rows = stmt.query([])?;

                let needle = tokenize(&text);
                let mut scored: Vec<(AnalysisMetadata, f64)> = Vec::new();
                while let Some(row) = rows.next()? {
                    let metadata = row_metadata(row)?;
                    let document: String = row.get(7)?;
                    let score = jaccard(&needle, &tokenize(&document));
                    if score > 0.0 {
                        scored.push((metadata, score));
                    }
                }

                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(limit);
                Ok(scored)
            })
        })
        .await
        .map_err(|e| HistoryError::Join(e.to_string()))?
    }

    async fn clear(&self) -> Result<(), HistoryError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.execute("DELETE FROM analyses", [])?;
                Ok(())
            })
        })
        .await
        .map_err(|e| HistoryError::Join(e.to_string()))?
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[derive(Debug)]
pub struct HistoryLock {
    _file: std::fs::File,
}

impl HistoryLock {
    fn new(db_path: &Path) -> Result<Self, HistoryError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}
