//! Ingestion lifecycle state machine.
//!
//! A document's status only moves forward through the pipeline states,
//! with ERROR and DELETING reachable from any non-terminal state. The
//! pure transition function lives here; [`transition`] persists a
//! transition with a compare-and-swap guard on the expected prior status,
//! so two orchestrator runs can never drive the same document at once —
//! the loser observes a conflict instead of corrupting state.

use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::now_ts;

/// Document lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Pending,
    Parsing,
    Chunking,
    Embedding,
    Indexing,
    Completed,
    Error,
    Deleting,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Parsing => "parsing",
            IngestStatus::Chunking => "chunking",
            IngestStatus::Embedding => "embedding",
            IngestStatus::Indexing => "indexing",
            IngestStatus::Completed => "completed",
            IngestStatus::Error => "error",
            IngestStatus::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IngestStatus::Pending),
            "parsing" => Some(IngestStatus::Parsing),
            "chunking" => Some(IngestStatus::Chunking),
            "embedding" => Some(IngestStatus::Embedding),
            "indexing" => Some(IngestStatus::Indexing),
            "completed" => Some(IngestStatus::Completed),
            "error" => Some(IngestStatus::Error),
            "deleting" => Some(IngestStatus::Deleting),
            _ => None,
        }
    }

    /// DELETING blocks every other operation on the document; it is the
    /// only state that rejects concurrent mutation outright.
    pub fn is_deleting(&self) -> bool {
        matches!(self, IngestStatus::Deleting)
    }

    /// States from which a resync may restart the pipeline. Mid-pipeline
    /// documents are owned by a running orchestrator and must not be
    /// restarted underneath it.
    pub fn can_resync(&self) -> bool {
        matches!(
            self,
            IngestStatus::Pending | IngestStatus::Completed | IngestStatus::Error
        )
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive a document through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEvent {
    /// Orchestrator picked the document up.
    StartParsing,
    /// Extraction succeeded.
    ElementsExtracted,
    /// Hierarchy built and structural rows written.
    HierarchyBuilt,
    /// All chunks vectorized (or vectorization skipped when disabled).
    ChunksEmbedded,
    /// All chunks queryable in the index store.
    ChunksIndexed,
    /// A pipeline step failed unrecoverably.
    Fail,
    /// Explicit delete request.
    RequestDelete,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {from} does not accept {event:?}")]
    Invalid {
        from: IngestStatus,
        event: IngestEvent,
    },
    /// The persisted status no longer matches the expected prior state,
    /// meaning a concurrent run (or a delete) won the race.
    #[error("status conflict: expected {expected}, another writer advanced the document")]
    Conflict { expected: IngestStatus },
}

/// Pure transition function: `(current, event) -> next`.
///
/// Forward transitions are one-directional. `Fail` and `RequestDelete`
/// are accepted from any non-terminal state; nothing leaves DELETING.
pub fn apply(current: IngestStatus, event: IngestEvent) -> Result<IngestStatus, TransitionError> {
    use IngestEvent::*;
    use IngestStatus::*;

    let next = match (current, event) {
        (Pending, StartParsing) => Parsing,
        (Parsing, ElementsExtracted) => Chunking,
        (Chunking, HierarchyBuilt) => Embedding,
        (Embedding, ChunksEmbedded) => Indexing,
        (Indexing, ChunksIndexed) => Completed,
        (Deleting, _) => return Err(TransitionError::Invalid { from: current, event }),
        (_, Fail) => Error,
        (_, RequestDelete) => Deleting,
        _ => return Err(TransitionError::Invalid { from: current, event }),
    };
    Ok(next)
}

/// Apply an event and persist the new status with a CAS guard.
///
/// The `WHERE status = expected` clause is the single-writer guarantee:
/// zero rows updated means another writer moved the document first.
/// Entering COMPLETED clears the error message and stamps
/// `last_ingested_at`; entering ERROR records the cause.
pub async fn transition(
    pool: &SqlitePool,
    document_id: &str,
    expected: IngestStatus,
    event: IngestEvent,
    error_message: Option<&str>,
) -> anyhow::Result<IngestStatus> {
    let next = apply(expected, event)?;
    let now = now_ts();

    let result = match next {
        IngestStatus::Completed => {
            sqlx::query(
                "UPDATE documents
                 SET status = ?, error_message = NULL, last_ingested_at = ?, updated_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(next.as_str())
            .bind(now)
            .bind(now)
            .bind(document_id)
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
        IngestStatus::Error => {
            sqlx::query(
                "UPDATE documents SET status = ?, error_message = ?, updated_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(next.as_str())
            .bind(error_message.unwrap_or("ingestion failed"))
            .bind(now)
            .bind(document_id)
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
        _ => {
            sqlx::query(
                "UPDATE documents SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(next.as_str())
            .bind(now)
            .bind(document_id)
            .bind(expected.as_str())
            .execute(pool)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(TransitionError::Conflict { expected }.into());
    }

    tracing::info!(document_id, from = %expected, to = %next, "status transition");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_completed() {
        let mut s = IngestStatus::Pending;
        for ev in [
            IngestEvent::StartParsing,
            IngestEvent::ElementsExtracted,
            IngestEvent::HierarchyBuilt,
            IngestEvent::ChunksEmbedded,
            IngestEvent::ChunksIndexed,
        ] {
            s = apply(s, ev).unwrap();
        }
        assert_eq!(s, IngestStatus::Completed);
    }

    #[test]
    fn fail_accepted_from_every_pipeline_state() {
        for s in [
            IngestStatus::Pending,
            IngestStatus::Parsing,
            IngestStatus::Chunking,
            IngestStatus::Embedding,
            IngestStatus::Indexing,
            IngestStatus::Completed,
            IngestStatus::Error,
        ] {
            assert_eq!(apply(s, IngestEvent::Fail).unwrap(), IngestStatus::Error);
        }
    }

    #[test]
    fn delete_accepted_from_every_non_terminal_state() {
        for s in [
            IngestStatus::Pending,
            IngestStatus::Parsing,
            IngestStatus::Chunking,
            IngestStatus::Embedding,
            IngestStatus::Indexing,
            IngestStatus::Completed,
            IngestStatus::Error,
        ] {
            assert_eq!(
                apply(s, IngestEvent::RequestDelete).unwrap(),
                IngestStatus::Deleting
            );
        }
    }

    #[test]
    fn nothing_leaves_deleting() {
        for ev in [
            IngestEvent::StartParsing,
            IngestEvent::ElementsExtracted,
            IngestEvent::HierarchyBuilt,
            IngestEvent::ChunksEmbedded,
            IngestEvent::ChunksIndexed,
            IngestEvent::Fail,
            IngestEvent::RequestDelete,
        ] {
            assert!(apply(IngestStatus::Deleting, ev).is_err());
        }
    }

    #[test]
    fn no_backward_or_skipping_transitions() {
        assert!(apply(IngestStatus::Chunking, IngestEvent::StartParsing).is_err());
        assert!(apply(IngestStatus::Pending, IngestEvent::ChunksIndexed).is_err());
        assert!(apply(IngestStatus::Completed, IngestEvent::StartParsing).is_err());
        assert!(apply(IngestStatus::Embedding, IngestEvent::ElementsExtracted).is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            IngestStatus::Pending,
            IngestStatus::Parsing,
            IngestStatus::Chunking,
            IngestStatus::Embedding,
            IngestStatus::Indexing,
            IngestStatus::Completed,
            IngestStatus::Error,
            IngestStatus::Deleting,
        ] {
            assert_eq!(IngestStatus::parse(s.as_str()), Some(s));
        }
    }
}
