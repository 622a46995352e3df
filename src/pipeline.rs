//! Ingestion orchestration.
//!
//! [`Pipeline::ingest`] drives exactly one document through the state
//! machine: load bytes, extract structure, build and persist the chunk
//! forest, vectorize, index, complete. Each step advances the status
//! with a CAS transition, so a concurrent delete or resync makes the
//! run abort at the next step boundary instead of writing over the
//! other operation. Prior chunks are purged before regeneration, which
//! keeps re-ingestion idempotent: a retried pipeline never leaves
//! duplicate or orphaned chunks.
//!
//! Failure policy: any step failure (including timeouts) records the
//! cause on the document and moves it to ERROR. Embedding is
//! all-or-nothing — vectors are held in memory until the indexing
//! transaction, so a partial embedding failure discards everything and
//! no half-embedded document can reach COMPLETED. If indexing fails, a
//! compensating cleanup removes whatever chunk rows and index entries
//! the run had written.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::documents;
use crate::embedding::Embedder;
use crate::extractor::StructureExtractor;
use crate::hierarchy::{self, ChunkNode};
use crate::index::{self, IndexEntry};
use crate::state::{transition, IngestEvent, IngestStatus};
use crate::storage::ObjectStore;

#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    storage: ObjectStore,
    extractor: Arc<dyn StructureExtractor>,
    embedder: Arc<dyn Embedder>,
    embedding_enabled: bool,
    embed_batch_size: usize,
    language: String,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        storage: ObjectStore,
        extractor: Arc<dyn StructureExtractor>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            storage,
            extractor,
            embedder,
            embedding_enabled: config.embedding.is_enabled(),
            embed_batch_size: config.embedding.batch_size.max(1),
            language: config.chunking.language.clone(),
        }
    }

    pub fn storage(&self) -> &ObjectStore {
        &self.storage
    }

    /// Run the full pipeline for one PENDING document.
    ///
    /// Returns Ok even when the document lands in ERROR — the failure is
    /// recorded on the row and surfaced via status queries, not thrown
    /// at whoever scheduled the run. Only losing the initial CAS (a
    /// concurrent run or delete owns the document) returns early.
    pub async fn ingest(&self, document_id: &str) -> Result<()> {
        let doc = match documents::get(&self.pool, document_id).await? {
            Some(doc) => doc,
            None => {
                tracing::warn!(document_id, "ingest scheduled for unknown document");
                return Ok(());
            }
        };

        if transition(
            &self.pool,
            document_id,
            IngestStatus::Pending,
            IngestEvent::StartParsing,
            None,
        )
        .await
        .is_err()
        {
            tracing::warn!(document_id, "lost pickup race, skipping run");
            return Ok(());
        }

        match self.run_steps(document_id, &doc.storage_key).await {
            Ok(()) => {
                tracing::info!(document_id, "ingestion completed");
                Ok(())
            }
            Err(failure) => {
                tracing::warn!(document_id, error = %failure.cause, "ingestion failed");
                self.compensate(document_id, &failure).await;
                Ok(())
            }
        }
    }

    async fn run_steps(&self, document_id: &str, storage_key: &str) -> StepResult {
        let doc = documents::get(&self.pool, document_id)
            .await
            .step(IngestStatus::Parsing)?
            .ok_or_else(|| anyhow::anyhow!("document disappeared"))
            .step(IngestStatus::Parsing)?;

        // Idempotence: drop whatever a previous run left behind before
        // regenerating.
        index::purge_document(&self.pool, document_id)
            .await
            .step(IngestStatus::Parsing)?;
        documents::delete_chunks(&self.pool, document_id)
            .await
            .step(IngestStatus::Parsing)?;

        // PARSING: bytes -> ordered typed elements.
        let bytes = self
            .storage
            .get(storage_key)
            .await
            .context("loading stored file bytes")
            .step(IngestStatus::Parsing)?;
        let elements = self
            .extractor
            .extract(&bytes, doc.file_type)
            .await
            .step(IngestStatus::Parsing)?;
        transition(
            &self.pool,
            document_id,
            IngestStatus::Parsing,
            IngestEvent::ElementsExtracted,
            None,
        )
        .await
        .step(IngestStatus::Parsing)?;

        // CHUNKING: elements -> forest -> structural rows.
        let forest = hierarchy::build_forest(&elements, &doc.filename);
        hierarchy::validate_forest(&forest).step(IngestStatus::Chunking)?;
        documents::insert_chunks(&self.pool, document_id, &forest)
            .await
            .step(IngestStatus::Chunking)?;
        transition(
            &self.pool,
            document_id,
            IngestStatus::Chunking,
            IngestEvent::HierarchyBuilt,
            None,
        )
        .await
        .step(IngestStatus::Chunking)?;

        // EMBEDDING: all chunks or none. Vectors stay in memory until
        // the indexing transaction, so a failure here discards them.
        let vectors = if self.embedding_enabled {
            Some(self.embed_forest(&forest).await.step(IngestStatus::Embedding)?)
        } else {
            None
        };
        transition(
            &self.pool,
            document_id,
            IngestStatus::Embedding,
            IngestEvent::ChunksEmbedded,
            None,
        )
        .await
        .step(IngestStatus::Embedding)?;

        // INDEXING: text + vector + metadata as one logical unit.
        let entries = self.build_entries(&forest, vectors, doc.file_type);
        index::index_chunks(
            &self.pool,
            document_id,
            self.embedder.model_name(),
            self.embedder.dims(),
            &entries,
        )
        .await
        .step(IngestStatus::Indexing)?;
        transition(
            &self.pool,
            document_id,
            IngestStatus::Indexing,
            IngestEvent::ChunksIndexed,
            None,
        )
        .await
        .step(IngestStatus::Indexing)?;

        Ok(())
    }

    async fn embed_forest(&self, forest: &[ChunkNode]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = forest.iter().map(|n| n.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embed_batch_size) {
            let mut batch_vectors = self
                .embedder
                .embed(batch)
                .await
                .context("embedding chunk batch")?;
            if batch_vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} texts",
                    batch_vectors.len(),
                    batch.len()
                );
            }
            vectors.append(&mut batch_vectors);
        }
        Ok(vectors)
    }

    fn build_entries(
        &self,
        forest: &[ChunkNode],
        vectors: Option<Vec<Vec<f32>>>,
        file_type: crate::models::FileType,
    ) -> Vec<IndexEntry> {
        let mut vectors = vectors.map(|v| v.into_iter());
        forest
            .iter()
            .map(|node| IndexEntry {
                chunk_id: node.id.clone(),
                title: node.title.clone(),
                text: node.text.clone(),
                breadcrumb: node.breadcrumb.clone(),
                language: self.language.clone(),
                file_type,
                vector: vectors.as_mut().and_then(|it| it.next()),
            })
            .collect()
    }

    /// Record the failure and remove partial writes. A CAS loss here
    /// means a delete arrived mid-failure; the purge task owns cleanup
    /// then.
    async fn compensate(&self, document_id: &str, failure: &StepFailure) {
        if let Err(e) = index::purge_document(&self.pool, document_id).await {
            tracing::error!(document_id, error = %e, "compensating index purge failed");
        }
        if let Err(e) = documents::delete_chunks(&self.pool, document_id).await {
            tracing::error!(document_id, error = %e, "compensating chunk purge failed");
        }
        if let Err(e) = transition(
            &self.pool,
            document_id,
            failure.at,
            IngestEvent::Fail,
            Some(&failure.cause),
        )
        .await
        {
            tracing::warn!(document_id, error = %e, "could not record failure, document was taken over");
        }
    }

    /// Cascade deletion: index entries, chunk rows, document row, and
    /// finally the stored object, as explicit compensating steps. Called
    /// after the document has been CAS-ed into DELETING, which already
    /// hides it from retrieval and blocks every other operation.
    pub async fn purge(&self, document_id: &str) -> Result<()> {
        let doc = documents::get(&self.pool, document_id).await?;

        index::purge_document(&self.pool, document_id).await?;
        documents::delete_chunks(&self.pool, document_id).await?;
        documents::delete_row(&self.pool, document_id).await?;

        if let Some(doc) = doc {
            // Only drop the object when no other document shares the
            // content (a resync-after-duplicate cannot happen, but a
            // failed purge retry can).
            self.storage.delete(&doc.storage_key).await?;
        }

        tracing::info!(document_id, "document purged");
        Ok(())
    }
}

/// A step failure: the cause plus the state the pipeline was in, needed
/// for the CAS into ERROR.
struct StepFailure {
    at: IngestStatus,
    cause: String,
}

type StepResult = std::result::Result<(), StepFailure>;

/// Tag errors with the pipeline state they occurred in.
trait StepExt<T> {
    fn step(self, at: IngestStatus) -> std::result::Result<T, StepFailure>;
}

impl<T, E: std::fmt::Display> StepExt<T> for std::result::Result<T, E> {
    fn step(self, at: IngestStatus) -> std::result::Result<T, StepFailure> {
        self.map_err(|e| StepFailure {
            at,
            cause: e.to_string(),
        })
    }
}
