//! Query-time retrieval orchestration.
//!
//! Owns the end-to-end search contract: resolve the query text, embed it,
//! search the vector index, filter by similarity threshold, stitch neighbor
//! context, build excerpts, optionally rerank, and write the audit event.
//!
//! Referential gaps (a hit whose chunk or document has vanished from the
//! metadata store) are dropped silently: the result list shrinks but the
//! call never errors for that reason. Embed and index errors propagate;
//! retries belong to the index connection layer, not here.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::excerpt::{make_excerpt, DEFAULT_MAX_LEN};
use crate::extract::extract_text;
use crate::models::{SearchEvent, SearchResultItem};
use crate::rerank::Reranker;
use crate::store;
use crate::vector_index::VectorIndex;

pub const DEFAULT_TOP_K: usize = 8;

/// A search request: raw text, or a file to extract text from, with optional
/// filtering and reranking.
#[derive(Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    /// `(filename, bytes)` of an uploaded file whose extracted text becomes
    /// the query.
    pub file: Option<(String, Vec<u8>)>,
    pub user_id: Option<String>,
    /// Percent threshold as given by the caller; malformed values mean
    /// "no filter" (see [`parse_min_similarity`]).
    pub min_similarity_percent: Option<String>,
    pub rerank: bool,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Reranker,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Reranker,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            top_k,
        }
    }

    /// Run one search. Returns the normalized query text and the final
    /// ordered results. An unresolvable query (no text, no usable file text)
    /// short-circuits to `("", [])` without touching the index or the audit
    /// log.
    pub async fn search(
        &self,
        pool: &SqlitePool,
        query: SearchQuery,
    ) -> Result<(String, Vec<SearchResultItem>)> {
        let started = Instant::now();
        let has_file = query.file.is_some();

        // 1. Resolve query text: prefer raw text, else extract from the file.
        // Unsupported file types propagate as a rejected request.
        let mut text = query.text.unwrap_or_default();
        if text.trim().is_empty() {
            if let Some((filename, bytes)) = &query.file {
                let (extracted, _pages) = extract_text(filename, bytes)?;
                text = extracted;
            }
        }
        let query_text = text.trim().to_string();
        if query_text.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        // 2. Threshold: malformed input means no filter.
        let min_score = parse_min_similarity(query.min_similarity_percent.as_deref());

        // 3. Embed and search.
        let t0 = Instant::now();
        let vector = self.embedder.embed_one(&query_text).await?;
        let embed_ms = t0.elapsed().as_millis();

        let t1 = Instant::now();
        let mut hits = self.index.search(&vector, self.top_k).await?;
        let index_ms = t1.elapsed().as_millis();

        // 4. Threshold filter, order preserved.
        if let Some(min) = min_score {
            hits.retain(|h| h.score >= min);
        }

        // 5. Resolve hit chunks, parent documents, and neighbor context
        // (chunk_index +/- 1 in the same document; negatives skipped).
        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let doc_ids: HashSet<String> = hits.iter().map(|h| h.document_id.clone()).collect();
        let mut indices: HashSet<i64> = HashSet::new();
        for h in &hits {
            indices.insert(h.chunk_index);
            if h.chunk_index > 0 {
                indices.insert(h.chunk_index - 1);
            }
            indices.insert(h.chunk_index + 1);
        }

        let chunks_by_id = store::chunks_by_ids(pool, &chunk_ids).await?;
        let neighbors = store::chunks_by_doc_and_indices(pool, &doc_ids, &indices).await?;
        let docs_by_id = store::documents_by_ids(pool, &doc_ids).await?;

        // 6-7. Build one result per hit that still resolves; drop the rest
        // silently (availability over completeness).
        let mut results: Vec<SearchResultItem> = Vec::with_capacity(hits.len());
        for hit in &hits {
            let Some(chunk) = chunks_by_id.get(&hit.chunk_id) else {
                continue;
            };
            let Some(doc) = docs_by_id.get(&hit.document_id) else {
                continue;
            };

            let mut context_parts: Vec<&str> = Vec::with_capacity(3);
            if let Some(prev) = neighbors.get(&(chunk.document_id.clone(), chunk.chunk_index - 1)) {
                context_parts.push(&prev.text);
            }
            context_parts.push(&chunk.text);
            if let Some(next) = neighbors.get(&(chunk.document_id.clone(), chunk.chunk_index + 1)) {
                context_parts.push(&next.text);
            }

            let excerpt = make_excerpt(&context_parts.join("\n"), &query_text, DEFAULT_MAX_LEN);
            results.push(SearchResultItem {
                document_id: doc.id.clone(),
                title: doc.title.clone(),
                score: hit.score,
                rerank_score: None,
                excerpt,
                page_number: (hit.page_number != 0).then_some(hit.page_number),
            });
        }

        // 8. Optional rerank: fail-open, never an error.
        if query.rerank {
            results = self.reranker.rerank(&query_text, results).await;
        }

        let duration_ms = started.elapsed().as_millis() as i64;
        info!(
            embed_ms,
            index_ms,
            hits = hits.len(),
            results = results.len(),
            rerank = query.rerank,
            "search timing"
        );

        // 9. Audit event, once per query.
        let event = SearchEvent {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            user_id: query.user_id,
            query_len: query_text.chars().count() as i64,
            query_preview: query_text.chars().take(200).collect(),
            has_file,
            duration_ms,
            results_count: results.len() as i64,
        };
        store::record_search_event(pool, &event).await?;

        Ok((query_text, results))
    }
}

/// Parse an optional percent threshold into a fractional score in `[0, 1]`.
///
/// Contract: the value is clamped to `[0, 100]` and divided by 100; malformed
/// input (unparseable, non-finite) yields `None`, meaning "no filter", never
/// an error.
pub fn parse_min_similarity(raw: Option<&str>) -> Option<f32> {
    let p: f32 = raw?.trim().parse().ok()?;
    if !p.is_finite() {
        return None;
    }
    Some(p.clamp(0.0, 100.0) / 100.0)
}
