//! Checksum-based admission control for uploads.
//!
//! Content is hashed with SHA-256; the UNIQUE constraint on
//! `documents.checksum` is the final arbiter, so two concurrent uploads
//! of the same bytes cannot both insert — the loser's insert fails and
//! is reported as a duplicate of the winner's row. An existence check
//! alone would leave that race open.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::documents;
use crate::models::{now_ts, FileType, SourceDocument};
use crate::state::IngestStatus;

/// Hex-encoded SHA-256 of the file bytes.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Outcome of admission control.
#[derive(Debug)]
pub enum Admission {
    /// A fresh PENDING document was created.
    Created(SourceDocument),
    /// Identical content already exists; the existing row is returned.
    Duplicate(SourceDocument),
}

/// Admit an upload: insert a PENDING document keyed by content checksum,
/// or report the existing document when the checksum is already taken.
pub async fn admit(
    pool: &SqlitePool,
    filename: &str,
    file_type: FileType,
    bytes: &[u8],
) -> Result<Admission> {
    let sum = checksum(bytes);
    let now = now_ts();
    let id = Uuid::new_v4().to_string();

    let inserted = sqlx::query(
        r#"
        INSERT INTO documents
            (id, filename, storage_key, file_type, size_bytes, checksum, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(checksum) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(filename)
    .bind(&sum)
    .bind(file_type.as_str())
    .bind(bytes.len() as i64)
    .bind(&sum)
    .bind(IngestStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 1 {
        let doc = documents::get(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("freshly inserted document {} vanished", id))?;
        return Ok(Admission::Created(doc));
    }

    let existing = documents::get_by_checksum(pool, &sum)
        .await?
        .ok_or_else(|| anyhow::anyhow!("checksum conflict but no existing row for {}", sum))?;
    tracing::info!(
        document_id = %existing.id,
        checksum = %sum,
        "duplicate upload short-circuited"
    );
    Ok(Admission::Duplicate(existing))
}
