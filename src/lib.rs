//! # Trellis
//!
//! A hierarchical document ingestion and two-phase retrieval service for
//! AI assistants.
//!
//! Trellis ingests PDF, Markdown, and plain-text documents, preserves
//! their heading structure as a chunk tree, and serves token-bounded
//! retrieval over HTTP: a cheap **explore** phase (hybrid keyword +
//! vector search returning lightweight hits) followed by a **focus**
//! phase (full chunk text truncated to the caller's token budget).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌───────────┐
//! │  Upload  │──▶│  Pipeline                │──▶│  SQLite   │
//! │ (base64) │   │ parse→chunk→embed→index  │   │ FTS5+Vec  │
//! └──────────┘   └──────────────────────────┘   └─────┬─────┘
//!                                                     │
//!                                     ┌───────────────┤
//!                                     ▼               ▼
//!                               ┌──────────┐    ┌──────────┐
//!                               │ /explore │    │  /focus  │
//!                               └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trellis init                  # create database
//! trellis serve                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`state`] | Ingestion state machine |
//! | [`error`] | API error taxonomy |
//! | [`documents`] | Document and chunk metadata store |
//! | [`dedup`] | Checksum-based upload admission |
//! | [`storage`] | Content-addressed object storage |
//! | [`extractor`] | PDF/Markdown/TXT structure extraction |
//! | [`hierarchy`] | Heading-driven chunk forest builder |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Index store (text + vectors + FTS5) |
//! | [`pipeline`] | Ingestion orchestration |
//! | [`worker`] | Bounded ingestion worker pool |
//! | [`retrieval`] | Explore / focus retrieval |
//! | [`tokenizer`] | Token counting for focus budgets |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod dedup;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod hierarchy;
pub mod index;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod server;
pub mod state;
pub mod storage;
pub mod tokenizer;
pub mod worker;
