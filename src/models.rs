//! Core data models used throughout Trellis.
//!
//! These types represent the documents, structural elements, chunks, and
//! search hits that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::IngestStatus;

/// Supported upload file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Markdown,
    Txt,
}

impl FileType {
    /// Classify by filename extension. Unknown extensions are rejected
    /// upstream as unsupported media.
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "md" | "markdown" => Some(FileType::Markdown),
            "txt" | "text" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Markdown => "markdown",
            FileType::Txt => "txt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(FileType::Pdf),
            "markdown" => Some(FileType::Markdown),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }
}

/// A source document row in the metadata store.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub filename: String,
    /// Content-addressed object storage key (the checksum).
    pub storage_key: String,
    pub file_type: FileType,
    pub size_bytes: i64,
    /// SHA-256 of the file bytes, hex-encoded. Globally unique.
    pub checksum: String,
    pub status: IngestStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_ingested_at: Option<i64>,
}

/// Structural role of an extracted element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Heading,
    Paragraph,
    Code,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Heading => "heading",
            ElementType::Paragraph => "paragraph",
            ElementType::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "heading" => Some(ElementType::Heading),
            "paragraph" => Some(ElementType::Paragraph),
            "code" => Some(ElementType::Code),
            _ => None,
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, ElementType::Heading)
    }
}

/// One typed element produced by the structure extractor, in document order.
#[derive(Debug, Clone)]
pub struct DocElement {
    pub element_type: ElementType,
    pub text: String,
    /// Heading level (1-based). Ignored for content elements.
    pub level: u32,
}

impl DocElement {
    pub fn heading(level: u32, text: impl Into<String>) -> Self {
        DocElement {
            element_type: ElementType::Heading,
            text: text.into(),
            level,
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        DocElement {
            element_type: ElementType::Paragraph,
            text: text.into(),
            level: 0,
        }
    }

    pub fn code(text: impl Into<String>) -> Self {
        DocElement {
            element_type: ElementType::Code,
            text: text.into(),
            level: 0,
        }
    }
}

/// A chunk row in the metadata store: structure only, no text.
///
/// Chunks form a forest per document. `parent_id = None` marks a root
/// (level 1); `seq` is the position among siblings sharing the same
/// parent, starting at 1 and increasing in reading order.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub element_type: ElementType,
    pub level: u32,
    pub seq: u32,
    pub created_at: i64,
}

/// A lightweight explore-phase hit. Carries no full text.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub breadcrumb: Vec<String>,
}

/// Focus-phase response: full or budget-truncated chunk content.
#[derive(Debug, Clone, Serialize)]
pub struct FocusResult {
    pub chunk_id: String,
    pub content: String,
    pub tokenizer: String,
    pub actual_tokens: usize,
    pub truncated: bool,
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
