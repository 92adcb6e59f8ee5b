//! Core data models used throughout docsift.
//!
//! These types represent the documents, chunks, vector rows, and search
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A document registered at ingestion time. Immutable thereafter except delete.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Stored filename (`<doc_id><ext>` under the storage directory).
    pub filename: String,
    pub content_type: String,
    /// Upload time, UTC seconds.
    pub uploaded_at: i64,
    pub uploaded_by: Option<String>,
    pub status: String,
    pub num_pages: i64,
}

/// A bounded, possibly overlapping slice of a document's extracted text.
///
/// Created in a batch at ingestion or reindex; never mutated; deleted only
/// with its document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// 0-based, strictly increasing per document.
    pub chunk_index: i64,
    pub page_number: Option<i64>,
    pub text: String,
}

/// One row in the vector index. Write-once per chunk; reindexing re-inserts
/// rather than updating in place.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRow {
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: i64,
    pub chunk_index: i64,
    pub embedding: Vec<f32>,
}

/// A raw hit returned by the vector index, before metadata resolution.
///
/// Score is an inner product over unit-normalized vectors, nominally in
/// `[0, 1]`. A hit whose chunk or document no longer exists in the metadata
/// store is dropped silently before it reaches a [`SearchResultItem`].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: i64,
    pub chunk_index: i64,
    pub score: f32,
}

/// A ranked result returned to the caller. Also the wire type for the remote
/// reranker contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub document_id: String,
    pub title: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    pub excerpt: String,
    #[serde(default)]
    pub page_number: Option<i64>,
}

/// Append-only audit record written once per query call.
#[derive(Debug, Clone)]
pub struct SearchEvent {
    pub id: String,
    /// UTC seconds.
    pub created_at: i64,
    pub user_id: Option<String>,
    pub query_len: i64,
    /// First 200 characters of the query.
    pub query_preview: String,
    pub has_file: bool,
    pub duration_ms: i64,
    pub results_count: i64,
}
