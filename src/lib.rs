//! # Docsift
//!
//! A semantic document-search engine for uploaded files.
//!
//! Docsift ingests PDF and DOCX uploads, splits their text into
//! paragraph-aware chunks, embeds the chunks through an HTTP embedding
//! service, and indexes the vectors in Milvus. Queries come back as
//! neighbor-stitched excerpts aligned to sentence boundaries, optionally
//! reordered by a fail-open reranking layer. An offline harness compares
//! reranking strategies on labeled data with exact sign-test significance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────┐   ┌────────┐
//! │ Uploads  │──▶│   Pipeline   │──▶│ SQLite  │   │ Milvus │
//! │ PDF/DOCX │   │ Chunk+Embed  │   │ metadata│   │  ANN   │
//! └──────────┘   └──────────────┘   └────┬────┘   └───┬────┘
//!                                        │            │
//!                                        ▼            ▼
//!                                  ┌──────────────────────┐
//!                                  │      Retriever       │
//!                                  │ excerpt + rerank     │
//!                                  └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsift init                          # create database
//! docsift ingest report.pdf             # extract, chunk, embed, index
//! docsift search "turbine maintenance" --rerank
//! docsift reindex                       # re-embed the whole corpus
//! docsift eval --data rows.jsonl --variants variants.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`chunker`] | Paragraph-aware chunking with overlap |
//! | [`embedding`] | HTTP embedding client |
//! | [`vector_index`] | Milvus-backed ANN index |
//! | [`store`] | SQLite metadata store |
//! | [`excerpt`] | Sentence-aligned excerpt extraction |
//! | [`rerank`] | Fail-open reranking strategies |
//! | [`retriever`] | End-to-end query pipeline |
//! | [`ingest`] | Upload ingestion pipeline |
//! | [`reindex`] | Corpus re-embedding |
//! | [`eval`] | Offline A/B harness |
//! | [`context`] | Process-wide wiring and background tasks |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod eval;
pub mod excerpt;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reindex;
pub mod rerank;
pub mod retriever;
pub mod stats;
pub mod store;
pub mod vector_index;
