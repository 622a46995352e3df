//! Idempotent schema creation.
//!
//! Two logical stores share one SQLite file. The metadata store
//! (`documents`, `chunks`) holds durable records and hierarchy edges;
//! the index store (`chunk_contents`, `chunks_fts`, `chunk_vectors`)
//! holds the searchable payload. The metadata side never stores chunk
//! text, so hierarchy traversal and retrieval scale independently.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Metadata store: documents. The UNIQUE checksum constraint is the
    // final arbiter for deduplication, closing the concurrent-upload race.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            file_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            checksum TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_ingested_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Metadata store: chunk hierarchy edges, arena style. Parents are
    // referenced by id, never by embedded pointer; children are derived
    // by query, which rules out cycles and makes cascade deletion a
    // purge by document id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            parent_id TEXT,
            title TEXT NOT NULL,
            element_type TEXT NOT NULL,
            level INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index store: full text + breadcrumb per chunk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_contents (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            text TEXT NOT NULL,
            breadcrumb TEXT NOT NULL DEFAULT '[]',
            language TEXT NOT NULL DEFAULT 'en',
            file_type TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index store: keyword channel. FTS5 CREATE is not idempotent
    // natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                title,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Index store: vector channel, little-endian f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_parent_id ON chunks(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_contents_document_id ON chunk_contents(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
