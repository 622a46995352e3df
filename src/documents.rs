//! Metadata store operations for documents and chunk structure rows.
//!
//! Everything here is structural: document records, status CAS helpers
//! used outside the pipeline (delete/resync), the filtered listing, and
//! the chunk-row purge that backs idempotent re-ingestion and cascade
//! deletion. Chunk text never lives on this side.

use anyhow::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::hierarchy::ChunkNode;
use crate::models::{now_ts, DocumentChunk, ElementType, FileType, SourceDocument};
use crate::state::IngestStatus;

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<SourceDocument> {
    let file_type: String = row.get("file_type");
    let status: String = row.get("status");
    Ok(SourceDocument {
        id: row.get("id"),
        filename: row.get("filename"),
        storage_key: row.get("storage_key"),
        file_type: FileType::parse(&file_type)
            .ok_or_else(|| anyhow::anyhow!("unknown file_type in db: {}", file_type))?,
        size_bytes: row.get("size_bytes"),
        checksum: row.get("checksum"),
        status: IngestStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown status in db: {}", status))?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_ingested_at: row.get("last_ingested_at"),
    })
}

const DOCUMENT_COLUMNS: &str = "id, filename, storage_key, file_type, size_bytes, checksum, \
     status, error_message, created_at, updated_at, last_ingested_at";

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<SourceDocument>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE id = ?",
        DOCUMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_document).transpose()
}

pub async fn get_by_checksum(pool: &SqlitePool, checksum: &str) -> Result<Option<SourceDocument>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE checksum = ?",
        DOCUMENT_COLUMNS
    ))
    .bind(checksum)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_document).transpose()
}

/// Listing filters for the status-query interface.
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub status: Option<IngestStatus>,
    pub filename_contains: Option<String>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub ingested_after: Option<i64>,
    pub ingested_before: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list(pool: &SqlitePool, filter: &DocumentFilter) -> Result<Vec<SourceDocument>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM documents WHERE 1=1",
        DOCUMENT_COLUMNS
    ));

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(ref needle) = filter.filename_contains {
        qb.push(" AND filename LIKE ")
            .push_bind(format!("%{}%", needle.replace('%', "\\%")));
        qb.push(" ESCAPE '\\'");
    }
    if let Some(ts) = filter.created_after {
        qb.push(" AND created_at >= ").push_bind(ts);
    }
    if let Some(ts) = filter.created_before {
        qb.push(" AND created_at <= ").push_bind(ts);
    }
    if let Some(ts) = filter.ingested_after {
        qb.push(" AND last_ingested_at >= ").push_bind(ts);
    }
    if let Some(ts) = filter.ingested_before {
        qb.push(" AND last_ingested_at <= ").push_bind(ts);
    }

    qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
        .push_bind(filter.limit.max(1))
        .push(" OFFSET ")
        .push_bind(filter.offset.max(0));

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_document).collect()
}

/// CAS into DELETING from any other state. Zero rows means the document
/// is unknown or already deleting; the caller distinguishes the two.
pub async fn mark_deleting(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE documents SET status = 'deleting', updated_at = ? WHERE id = ? AND status != 'deleting'",
    )
    .bind(now_ts())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// CAS back to PENDING for resync. Only documents at rest (pending,
/// completed, error) can restart; mid-pipeline or deleting documents
/// stay untouched and the caller reports a conflict.
pub async fn reset_for_resync(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE documents SET status = 'pending', error_message = NULL, updated_at = ?
         WHERE id = ? AND status IN ('pending', 'completed', 'error')",
    )
    .bind(now_ts())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete_row(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert structural rows for a freshly built forest in one transaction.
/// Parents precede children in builder output, so the foreign-key-free
/// arena layout stays queryable at every point in the transaction.
pub async fn insert_chunks(pool: &SqlitePool, document_id: &str, nodes: &[ChunkNode]) -> Result<()> {
    let now = now_ts();
    let mut tx = pool.begin().await?;
    for node in nodes {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, parent_id, title, element_type, level, seq, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(document_id)
        .bind(&node.parent_id)
        .bind(&node.title)
        .bind(node.element_type.as_str())
        .bind(node.level as i64)
        .bind(node.seq as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Delete all structural chunk rows for a document.
pub async fn delete_chunks(pool: &SqlitePool, document_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn chunks_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<DocumentChunk>> {
    let rows = sqlx::query(
        "SELECT id, document_id, parent_id, title, element_type, level, seq, created_at
         FROM chunks WHERE document_id = ? ORDER BY level ASC, seq ASC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let element_type: String = row.get("element_type");
            Ok(DocumentChunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                parent_id: row.get("parent_id"),
                title: row.get("title"),
                element_type: ElementType::parse(&element_type)
                    .ok_or_else(|| anyhow::anyhow!("unknown element_type in db: {}", element_type))?,
                level: row.get::<i64, _>("level") as u32,
                seq: row.get::<i64, _>("seq") as u32,
                created_at: row.get("created_at"),
            })
        })
        .collect()
}
