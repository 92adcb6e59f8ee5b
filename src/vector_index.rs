//! ANN vector store capability.
//!
//! [`VectorIndex`] is the seam between retrieval and the backing store:
//! append-only batch insert plus top-K inner-product search. The production
//! implementation is [`MilvusIndex`], a REST client for a Milvus-style HTTP
//! API; [`MemoryIndex`] is a brute-force store for tests.
//!
//! Collection setup is lazy and memoized: on first use the client probes the
//! store (fixed-backoff retry with a bounded attempt count, since the store
//! may still be starting), creates the collection and its IVF_FLAT / IP index if
//! absent, and loads it into serving memory. That expensive step happens at
//! most once per process.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::VectorConfig;
use crate::embedding::inner_product;
use crate::models::{SearchHit, VectorRow};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append-only batch write, flushed so rows become searchable.
    async fn insert(&self, rows: &[VectorRow]) -> Result<()>;

    /// Top-K hits ordered by descending score. Tie-break among equal scores
    /// is unspecified.
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;
}

// ============ Milvus REST client ============

pub struct MilvusIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dims: usize,
    nlist: u32,
    nprobe: u32,
    connect_attempts: u32,
    connect_backoff: Duration,
    /// Lazy collection setup, performed at most once per process.
    ready: OnceCell<()>,
}

impl MilvusIndex {
    pub fn new(config: &VectorConfig, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dims,
            nlist: config.nlist,
            nprobe: config.nprobe,
            connect_attempts: config.connect_attempts,
            connect_backoff: Duration::from_secs(config.connect_backoff_secs),
            ready: OnceCell::new(),
        })
    }

    /// Probe the store's health endpoint with fixed backoff. The store may
    /// still be starting; exhausting the attempt budget is fatal.
    async fn connect_with_retry(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..self.connect_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.connect_backoff).await;
            }
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt, "vector store not ready");
                    last_err = Some(anyhow::anyhow!("health check returned {}", resp.status()));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "vector store unreachable");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("vector store unreachable")))
            .with_context(|| {
                format!(
                    "vector store at {} unreachable after {} attempts",
                    self.base_url, self.connect_attempts
                )
            })
    }

    /// POST a JSON body to a `/v2/vectordb/...` endpoint and unwrap the
    /// `{"code": 0, "data": ...}` envelope.
    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{}", self.base_url, path);
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("vector store error {} on {}: {}", status, path, text);
        }
        let envelope: Value = resp.json().await?;
        let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("vector store error on {}: code {} ({})", path, code, message);
        }
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn has_collection(&self) -> Result<bool> {
        let data = self
            .post(
                "collections/has",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_collection(&self) -> Result<()> {
        let body = json!({
            "collectionName": self.collection,
            "schema": {
                "fields": [
                    {
                        "fieldName": "chunk_id",
                        "dataType": "VarChar",
                        "isPrimary": true,
                        "elementTypeParams": { "max_length": "64" }
                    },
                    {
                        "fieldName": "document_id",
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": "64" }
                    },
                    { "fieldName": "page_number", "dataType": "Int64" },
                    { "fieldName": "chunk_index", "dataType": "Int64" },
                    {
                        "fieldName": "embedding",
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": self.dims.to_string() }
                    }
                ]
            },
            "indexParams": [
                {
                    "fieldName": "embedding",
                    "indexName": "embedding_idx",
                    "metricType": "IP",
                    "params": { "index_type": "IVF_FLAT", "nlist": self.nlist }
                }
            ]
        });
        self.post("collections/create", body).await?;
        Ok(())
    }

    async fn has_index(&self) -> Result<bool> {
        let data = self
            .post("indexes/list", json!({ "collectionName": self.collection }))
            .await?;
        Ok(data.as_array().map(|a| !a.is_empty()).unwrap_or(false))
    }

    async fn create_index(&self) -> Result<()> {
        let body = json!({
            "collectionName": self.collection,
            "indexParams": [
                {
                    "fieldName": "embedding",
                    "indexName": "embedding_idx",
                    "metricType": "IP",
                    "params": { "index_type": "IVF_FLAT", "nlist": self.nlist }
                }
            ]
        });
        self.post("indexes/create", body).await?;
        Ok(())
    }

    async fn load_collection(&self) -> Result<()> {
        self.post(
            "collections/load",
            json!({ "collectionName": self.collection }),
        )
        .await?;
        Ok(())
    }

    /// Connect, create the collection/index if absent, and load it into
    /// serving memory. Memoized: runs at most once per process.
    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.connect_with_retry().await?;
                if !self.has_collection().await? {
                    info!(collection = %self.collection, dims = self.dims, "creating vector collection");
                    self.create_collection().await?;
                } else if !self.has_index().await? {
                    info!(collection = %self.collection, "creating missing vector index");
                    self.create_index().await?;
                }
                self.load_collection().await?;
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MilvusIndex {
    async fn insert(&self, rows: &[VectorRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.ensure_ready().await?;

        let data: Vec<Value> = rows
            .iter()
            .map(|r| {
                json!({
                    "chunk_id": r.chunk_id,
                    "document_id": r.document_id,
                    "page_number": r.page_number,
                    "chunk_index": r.chunk_index,
                    "embedding": r.embedding,
                })
            })
            .collect();

        self.post(
            "entities/insert",
            json!({ "collectionName": self.collection, "data": data }),
        )
        .await?;
        // Flush so the rows become searchable.
        self.post(
            "collections/flush",
            json!({ "collectionName": self.collection }),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        self.ensure_ready().await?;

        let body = json!({
            "collectionName": self.collection,
            "data": [vector],
            "annsField": "embedding",
            "limit": top_k,
            "outputFields": ["chunk_id", "document_id", "page_number", "chunk_index"],
            "searchParams": {
                "metricType": "IP",
                "params": { "nprobe": self.nprobe }
            }
        });
        let data = self.post("entities/search", body).await?;

        let rows = data
            .as_array()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("malformed search response: expected array"))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let get_str = |key: &str| {
                row.get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("malformed search hit: missing {}", key))
            };
            hits.push(SearchHit {
                chunk_id: get_str("chunk_id")?,
                document_id: get_str("document_id")?,
                page_number: row.get("page_number").and_then(Value::as_i64).unwrap_or(0),
                chunk_index: row.get("chunk_index").and_then(Value::as_i64).unwrap_or(0),
                score: row
                    .get("distance")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0) as f32,
            });
        }
        // The store returns hits ordered by score; keep the guarantee local.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }
}

// ============ In-memory index ============

/// Brute-force inner-product index for tests and offline tooling.
#[derive(Default)]
pub struct MemoryIndex {
    rows: RwLock<Vec<VectorRow>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn insert(&self, rows: &[VectorRow]) -> Result<()> {
        self.rows
            .write()
            .map_err(|_| anyhow::anyhow!("poisoned index lock"))?
            .extend_from_slice(rows);
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| anyhow::anyhow!("poisoned index lock"))?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|r| SearchHit {
                chunk_id: r.chunk_id.clone(),
                document_id: r.document_id.clone(),
                page_number: r.page_number,
                chunk_index: r.chunk_index,
                score: inner_product(vector, &r.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
