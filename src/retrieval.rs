//! Two-phase retrieval: explore and focus.
//!
//! **Explore** runs a hybrid keyword+vector query over the index store,
//! restricted to chunks of COMPLETED documents, and returns lightweight
//! hits — id, title, snippet, score, breadcrumb — never full text, so
//! an LLM caller can decide what to fetch cheaply.
//!
//! **Focus** fetches one chunk's full text by id and truncates it to
//! the caller's token budget. Truncation is a successful bounded
//! response, not an error.
//!
//! Scoring: each channel's raw scores are min-max normalized to [0, 1],
//! then merged as `(1 - alpha) * keyword + alpha * vector`. With the
//! embedding provider disabled the vector channel is empty and alpha is
//! forced to 0.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, Embedder};
use crate::error::ApiError;
use crate::index;
use crate::models::{FocusResult, SearchHit};
use crate::state::IngestStatus;
use crate::tokenizer::Tokenizer;

// ============ Explore ============

pub async fn explore(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    config: &Config,
    query: &str,
    top_k: i64,
) -> Result<Vec<SearchHit>, ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::Validation("query must not be empty".into()));
    }
    if top_k < 1 {
        return Err(ApiError::Validation("top_k must be >= 1".into()));
    }

    // Candidate fetches lean on infrastructure (the search index, the
    // embedding provider); their failures are outages, not server bugs.
    let keyword_candidates =
        fetch_keyword_candidates(pool, query, config.retrieval.candidate_k_keyword)
            .await
            .map_err(|e| ApiError::Unavailable(format!("keyword search failed: {}", e)))?;

    let vector_candidates = if config.embedding.is_enabled() {
        fetch_vector_candidates(pool, embedder, query, config.retrieval.candidate_k_vector)
            .await
            .map_err(|e| ApiError::Unavailable(format!("vector search failed: {}", e)))?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let effective_alpha = if config.embedding.is_enabled() {
        config.retrieval.hybrid_alpha
    } else {
        0.0
    };

    let merged = merge_candidates(&keyword_candidates, &vector_candidates, effective_alpha);

    // Decorate the top candidates with title and breadcrumb, dropping
    // any chunk whose document slipped out of COMPLETED since the
    // candidate query ran.
    let mut hits = Vec::new();
    for scored in merged {
        if hits.len() as i64 >= top_k {
            break;
        }
        let row = sqlx::query(
            "SELECT c.title, cc.breadcrumb
             FROM chunks c
             JOIN chunk_contents cc ON cc.chunk_id = c.id
             JOIN documents d ON d.id = c.document_id
             WHERE c.id = ? AND d.status = 'completed'",
        )
        .bind(&scored.chunk_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

        let Some(row) = row else { continue };
        let breadcrumb_json: String = row.get("breadcrumb");
        let breadcrumb: Vec<String> =
            serde_json::from_str(&breadcrumb_json).unwrap_or_default();

        hits.push(SearchHit {
            chunk_id: scored.chunk_id,
            document_id: scored.document_id,
            title: row.get("title"),
            snippet: scored.snippet,
            score: scored.score,
            breadcrumb,
        });
    }

    Ok(hits)
}

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
}

#[derive(Debug)]
struct ScoredChunk {
    chunk_id: String,
    document_id: String,
    score: f64,
    snippet: String,
}

/// Keyword channel: FTS5 over title + text, completed documents only.
async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let match_expr = fts_match_expression(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT chunks_fts.chunk_id, chunks_fts.document_id, chunks_fts.rank AS rank,
               snippet(chunks_fts, 3, '>>>', '<<<', '...', 24) AS snippet
        FROM chunks_fts
        JOIN documents d ON d.id = chunks_fts.document_id
        WHERE chunks_fts MATCH ? AND d.status = 'completed'
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(&match_expr)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: -rank, // negate so higher = better
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

/// Quote each term so user input can never break FTS5 query syntax.
fn fts_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Vector channel: cosine similarity over stored vectors of completed
/// documents, computed in process.
async fn fetch_vector_candidates(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let query_vecs = embedder.embed(&[query.to_string()]).await?;
    let query_vec = query_vecs
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding,
               COALESCE(substr(cc.text, 1, 240), '') AS snippet
        FROM chunk_vectors cv
        JOIN chunk_contents cc ON cc.chunk_id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        WHERE d.status = 'completed'
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: cosine_similarity(query_vec, &vec) as f64,
                snippet: row.get("snippet"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k as usize);
    Ok(candidates)
}

/// Min-max normalize each channel, merge by alpha, order by score desc
/// with chunk id as the deterministic tiebreak.
fn merge_candidates(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
) -> Vec<ScoredChunk> {
    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut all: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword {
        all.entry(c.chunk_id.as_str()).or_insert(c);
    }
    for c in vector {
        all.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut scored: Vec<ScoredChunk> = all
        .values()
        .map(|cand| {
            let k = kw_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            ScoredChunk {
                chunk_id: cand.chunk_id.clone(),
                document_id: cand.document_id.clone(),
                score: (1.0 - alpha) * k + alpha * v,
                snippet: cand.snippet.clone(),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored
}

/// Min-max normalize raw scores to [0, 1]; a single-element (or
/// constant) channel normalizes to 1.0.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

// ============ Focus ============

pub async fn focus(
    pool: &SqlitePool,
    tokenizer: &dyn Tokenizer,
    chunk_id: &str,
    max_tokens: usize,
) -> Result<FocusResult, ApiError> {
    if chunk_id.trim().is_empty() {
        return Err(ApiError::Validation("chunk_id must not be empty".into()));
    }
    if max_tokens == 0 {
        return Err(ApiError::Validation("max_tokens must be >= 1".into()));
    }

    let stored = index::get_content(pool, chunk_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(format!("chunk not found: {}", chunk_id)))?;

    // Chunks of documents mid-pipeline or mid-delete are invisible,
    // indistinguishable from absent.
    if stored.document_status != IngestStatus::Completed.as_str() {
        return Err(ApiError::NotFound(format!("chunk not found: {}", chunk_id)));
    }

    let actual_tokens = tokenizer.count(&stored.text);
    if actual_tokens <= max_tokens {
        return Ok(FocusResult {
            chunk_id: chunk_id.to_string(),
            content: stored.text,
            tokenizer: tokenizer.name().to_string(),
            actual_tokens,
            truncated: false,
        });
    }

    let (content, tokens) = tokenizer.truncate(&stored.text, max_tokens);
    Ok(FocusResult {
        chunk_id: chunk_id.to_string(),
        content,
        tokenizer: tokenizer.name().to_string(),
        actual_tokens: tokens,
        truncated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(chunk_id: &str, doc_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: doc_id.to_string(),
            raw_score: score,
            snippet: String::new(),
        }
    }

    #[test]
    fn normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_is_one() {
        let candidates = vec![make_candidate("c1", "d1", 5.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_range() {
        let candidates = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_stays_in_unit_interval() {
        let candidates = vec![
            make_candidate("c1", "d1", -5.0),
            make_candidate("c2", "d2", 100.0),
            make_candidate("c3", "d3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn alpha_zero_preserves_keyword_order() {
        let kw = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
            make_candidate("c3", "d3", 1.0),
        ];
        let vec_cands = vec![
            make_candidate("c1", "d1", 0.1),
            make_candidate("c2", "d2", 0.9),
        ];
        let merged = merge_candidates(&kw, &vec_cands, 0.0);
        let order: Vec<&str> = merged.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn alpha_one_preserves_vector_order() {
        let kw = vec![
            make_candidate("c1", "d1", 10.0),
            make_candidate("c2", "d2", 5.0),
        ];
        let vec_cands = vec![
            make_candidate("c1", "d1", 0.1),
            make_candidate("c2", "d2", 0.9),
            make_candidate("c3", "d3", 0.5),
        ];
        let merged = merge_candidates(&kw, &vec_cands, 1.0);
        let order: Vec<&str> = merged.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn merge_ties_break_on_chunk_id() {
        let kw = vec![
            make_candidate("b", "d1", 3.0),
            make_candidate("a", "d2", 3.0),
        ];
        let merged = merge_candidates(&kw, &[], 0.0);
        let order: Vec<&str> = merged.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn fts_expression_quotes_terms() {
        assert_eq!(fts_match_expression("hello world"), "\"hello\" \"world\"");
        assert_eq!(fts_match_expression("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(fts_match_expression("   "), "");
    }
}
