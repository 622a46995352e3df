//! Index store operations: the searchable side of a chunk.
//!
//! Holds the full text, breadcrumb, and vector for every chunk of a
//! document. Writes for one document are a single transaction, so the
//! index never exposes a half-written document; reads additionally
//! filter on document status so nothing is visible before COMPLETED or
//! after a delete begins.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding::vec_to_blob;
use crate::models::FileType;

/// One chunk's index-side payload, ready to write.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub title: String,
    pub text: String,
    pub breadcrumb: Vec<String>,
    pub language: String,
    pub file_type: FileType,
    /// None when the embedding provider is disabled (keyword-only mode).
    pub vector: Option<Vec<f32>>,
}

/// Write all index entries for a document as a logical unit.
pub async fn index_chunks(
    pool: &SqlitePool,
    document_id: &str,
    model: &str,
    dims: usize,
    entries: &[IndexEntry],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        let breadcrumb_json = serde_json::to_string(&entry.breadcrumb)?;

        sqlx::query(
            "INSERT INTO chunk_contents (chunk_id, document_id, text, breadcrumb, language, file_type)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.chunk_id)
        .bind(document_id)
        .bind(&entry.text)
        .bind(&breadcrumb_json)
        .bind(&entry.language)
        .bind(entry.file_type.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, document_id, title, text) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.chunk_id)
        .bind(document_id)
        .bind(&entry.title)
        .bind(&entry.text)
        .execute(&mut *tx)
        .await?;

        if let Some(ref vector) = entry.vector {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&entry.chunk_id)
            .bind(document_id)
            .bind(model)
            .bind(dims as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Remove every index entry for a document. Used both as the compensating
/// cleanup after a failed indexing step and during cascade deletion;
/// idempotent by construction.
pub async fn purge_document(pool: &SqlitePool, document_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunk_contents WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// A chunk's full text with its owning document's current status,
/// fetched for the focus phase.
#[derive(Debug)]
pub struct StoredContent {
    pub text: String,
    pub document_status: String,
}

pub async fn get_content(pool: &SqlitePool, chunk_id: &str) -> Result<Option<StoredContent>> {
    let row = sqlx::query(
        "SELECT cc.text, d.status
         FROM chunk_contents cc
         JOIN documents d ON d.id = cc.document_id
         WHERE cc.chunk_id = ?",
    )
    .bind(chunk_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StoredContent {
        text: r.get("text"),
        document_status: r.get("status"),
    }))
}

/// Count index entries for a document, used to verify cascade deletion.
pub async fn count_entries(pool: &SqlitePool, document_id: &str) -> Result<(i64, i64, i64)> {
    let contents: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_contents WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(pool)
            .await?;
    let fts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;
    let vectors: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(pool)
            .await?;
    Ok((contents, fts, vectors))
}
