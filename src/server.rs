//! HTTP API for document management and retrieval.
//!
//! # Endpoints
//!
//! | Method   | Path                       | Auth  | Description |
//! |----------|----------------------------|-------|-------------|
//! | `POST`   | `/documents`               | admin | Upload a document (base64 payload) |
//! | `GET`    | `/documents`               | admin | List documents with filters |
//! | `GET`    | `/documents/{id}`          | admin | Single document status |
//! | `DELETE` | `/documents/{id}`          | admin | Cascade-delete a document |
//! | `POST`   | `/documents/{id}/resync`   | admin | Re-run ingestion from stored bytes |
//! | `POST`   | `/explore`                 | open  | Hybrid search, lightweight hits |
//! | `POST`   | `/focus`                   | open  | Full chunk text under a token budget |
//! | `GET`    | `/health`                  | open  | Health check (returns version) |
//!
//! Admin routes require the pre-shared key from `[server].admin_key` in
//! the `x-admin-key` header; a missing or wrong key is a 404 so the
//! admin surface is not enumerable.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `validation` (400), `conflict` (409), `not_found` (404),
//! `unsupported_media` (415), `payload_too_large` (413), `unavailable`
//! (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::dedup::{self, Admission};
use crate::documents::{self, DocumentFilter};
use crate::embedding::Embedder;
use crate::error::ApiError;
use crate::models::{format_ts_iso, FileType, FocusResult, SearchHit, SourceDocument};
use crate::pipeline::Pipeline;
use crate::retrieval;
use crate::state::IngestStatus;
use crate::tokenizer::Tokenizer;
use crate::worker::IngestQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: sqlx::SqlitePool,
    pub queue: IngestQueue,
    pub pipeline: Arc<Pipeline>,
    pub embedder: Arc<dyn Embedder>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = build_router(state);

    tracing::info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Assembles routes, auth, and CORS. Split from [`run_server`] so tests
/// can drive the router without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/documents", post(handle_upload).get(handle_list))
        .route("/documents/{id}", get(handle_status))
        .route("/documents/{id}", delete(handle_delete))
        .route("/documents/{id}/resync", post(handle_resync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_key,
        ));

    let open = Router::new()
        .route("/explore", post(handle_explore))
        .route("/focus", post(handle_focus))
        .route("/health", get(handle_health));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    admin.merge(open).layer(cors).with_state(state)
}

/// Admin gate: the `x-admin-key` header must match the configured
/// pre-shared key exactly. Failures answer 404, not 401, so probing
/// cannot distinguish a wrong key from a nonexistent route.
async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(key) if key == state.config.server.admin_key => Ok(next.run(request).await),
        _ => Err(ApiError::NotFound("not found".into())),
    }
}

// ============ Document JSON view ============

/// Document record as serialized to API callers. Timestamps go out as
/// ISO-8601 strings rather than raw epochs.
#[derive(Serialize)]
struct DocumentView {
    id: String,
    filename: String,
    file_type: String,
    size_bytes: i64,
    checksum: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_ingested_at: Option<String>,
}

impl From<&SourceDocument> for DocumentView {
    fn from(doc: &SourceDocument) -> Self {
        DocumentView {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            file_type: doc.file_type.as_str().to_string(),
            size_bytes: doc.size_bytes,
            checksum: doc.checksum.clone(),
            status: doc.status.as_str().to_string(),
            error_message: doc.error_message.clone(),
            created_at: format_ts_iso(doc.created_at),
            updated_at: format_ts_iso(doc.updated_at),
            last_ingested_at: doc.last_ingested_at.map(format_ts_iso),
        }
    }
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// File bytes, standard base64.
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    document: DocumentView,
    /// True when identical content already existed; no new document was
    /// created and no ingestion was scheduled.
    duplicate: bool,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if req.filename.trim().is_empty() {
        return Err(ApiError::Validation("filename must not be empty".into()));
    }

    let file_type = FileType::from_filename(&req.filename)
        .ok_or_else(|| ApiError::UnsupportedMedia(req.filename.clone()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.content_base64)
        .map_err(|e| ApiError::Validation(format!("content_base64 is not valid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(ApiError::Validation("uploaded file is empty".into()));
    }
    let limit = state.config.limits.max_upload_bytes;
    if bytes.len() > limit {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    // Store first: the key is the checksum, so a duplicate upload just
    // overwrites the object with identical bytes.
    let sum = dedup::checksum(&bytes);
    state
        .pipeline
        .storage()
        .put(&sum, &bytes)
        .await
        .map_err(|e| ApiError::Unavailable(format!("object storage write failed: {}", e)))?;

    match dedup::admit(&state.pool, &req.filename, file_type, &bytes).await? {
        Admission::Created(doc) => {
            state.queue.submit(doc.id.clone()).await?;
            // Re-read: the inline path may already have advanced status.
            let doc = documents::get(&state.pool, &doc.id).await?.unwrap_or(doc);
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    document: DocumentView::from(&doc),
                    duplicate: false,
                }),
            ))
        }
        Admission::Duplicate(existing) => {
            // A deleting twin is mid-purge; its row and object are about
            // to vanish, so the upload cannot be pinned to it.
            if existing.status.is_deleting() {
                return Err(ApiError::Conflict(format!(
                    "identical content is being deleted as document {}, retry after the purge",
                    existing.id
                )));
            }
            Ok((
                StatusCode::CONFLICT,
                Json(UploadResponse {
                    document: DocumentView::from(&existing),
                    duplicate: true,
                }),
            ))
        }
    }
}

// ============ GET /documents ============

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    filename_contains: Option<String>,
    created_after: Option<i64>,
    created_before: Option<i64>,
    ingested_after: Option<i64>,
    ingested_before: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse {
    documents: Vec<DocumentView>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            IngestStatus::parse(s)
                .ok_or_else(|| ApiError::Validation(format!("unknown status filter: {}", s)))?,
        ),
        None => None,
    };

    let filter = DocumentFilter {
        status,
        filename_contains: query.filename_contains,
        created_after: query.created_after,
        created_before: query.created_before,
        ingested_after: query.ingested_after,
        ingested_before: query.ingested_before,
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let docs = documents::list(&state.pool, &filter).await?;
    Ok(Json(ListResponse {
        documents: docs.iter().map(DocumentView::from).collect(),
    }))
}

// ============ GET /documents/{id} ============

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    let doc = documents::get(&state.pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document not found: {}", id)))?;
    Ok(Json(DocumentView::from(&doc)))
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    id: String,
    status: String,
}

/// CAS the document into DELETING, then run the cascade purge in the
/// background. The response confirms only that deletion began; status
/// queries 404 once the purge lands.
async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    if !documents::mark_deleting(&state.pool, &id).await? {
        return match documents::get(&state.pool, &id).await? {
            Some(doc) if doc.status.is_deleting() => Err(ApiError::Conflict(format!(
                "document {} is already being deleted",
                id
            ))),
            Some(doc) => Err(ApiError::Conflict(format!(
                "document {} changed status to {} concurrently",
                id,
                doc.status.as_str()
            ))),
            None => Err(ApiError::NotFound(format!("document not found: {}", id))),
        };
    }

    let pipeline = Arc::clone(&state.pipeline);
    let purge_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.purge(&purge_id).await {
            tracing::error!(document_id = %purge_id, error = %e, "cascade purge failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DeleteResponse {
            id,
            status: IngestStatus::Deleting.as_str().to_string(),
        }),
    ))
}

// ============ POST /documents/{id}/resync ============

#[derive(Serialize)]
struct ResyncResponse {
    id: String,
    status: String,
}

/// Re-run the full pipeline from the stored bytes. Only documents at
/// rest can restart; a document mid-pipeline or mid-delete is a
/// conflict, never preempted.
async fn handle_resync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResyncResponse>), ApiError> {
    let doc = documents::get(&state.pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document not found: {}", id)))?;

    if !doc.status.can_resync() {
        return Err(ApiError::Conflict(format!(
            "document {} is {} and cannot be resynced",
            id,
            doc.status.as_str()
        )));
    }
    // The CAS below is still the arbiter: the status may have moved
    // between the read and the update.
    if !documents::reset_for_resync(&state.pool, &id).await? {
        return Err(ApiError::Conflict(format!(
            "document {} is {} and cannot be resynced",
            id,
            doc.status.as_str()
        )));
    }

    state.queue.submit(id.clone()).await?;
    let status = documents::get(&state.pool, &id)
        .await?
        .map(|d| d.status)
        .unwrap_or(IngestStatus::Pending);

    Ok((
        StatusCode::ACCEPTED,
        Json(ResyncResponse {
            id,
            status: status.as_str().to_string(),
        }),
    ))
}

// ============ POST /explore ============

#[derive(Deserialize)]
struct ExploreRequest {
    query: String,
    top_k: Option<i64>,
}

#[derive(Serialize)]
struct ExploreResponse {
    hits: Vec<SearchHit>,
}

async fn handle_explore(
    State(state): State<AppState>,
    Json(req): Json<ExploreRequest>,
) -> Result<Json<ExploreResponse>, ApiError> {
    let top_k = req.top_k.unwrap_or(state.config.retrieval.default_top_k);
    let hits = retrieval::explore(
        &state.pool,
        state.embedder.as_ref(),
        &state.config,
        &req.query,
        top_k,
    )
    .await?;
    Ok(Json(ExploreResponse { hits }))
}

// ============ POST /focus ============

#[derive(Deserialize)]
struct FocusRequest {
    chunk_id: String,
    max_tokens: Option<usize>,
}

async fn handle_focus(
    State(state): State<AppState>,
    Json(req): Json<FocusRequest>,
) -> Result<Json<FocusResult>, ApiError> {
    let max_tokens = req
        .max_tokens
        .unwrap_or(state.config.retrieval.default_max_tokens);
    let result = retrieval::focus(
        &state.pool,
        state.tokenizer.as_ref(),
        &req.chunk_id,
        max_tokens,
    )
    .await?;
    Ok(Json(result))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
