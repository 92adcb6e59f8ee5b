//! Ingestion pipeline: bytes -> text -> chunks -> vectors.
//!
//! Extracts text from the uploaded file, stores the original under the
//! storage directory, registers the document and its chunks in the metadata
//! store, embeds the chunks, and inserts the vectors into the index.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::context::AppContext;
use crate::extract::extract_text;
use crate::models::{Chunk, Document, VectorRow};
use crate::store;

/// Ingest one uploaded file. Returns the registered document.
pub async fn ingest_document(
    ctx: &AppContext,
    pool: &SqlitePool,
    title: &str,
    filename: &str,
    bytes: &[u8],
    uploaded_by: Option<String>,
) -> Result<Document> {
    let (text, num_pages) = extract_text(filename, bytes)?;

    // Keep the original bytes as `<doc_id><ext>`.
    std::fs::create_dir_all(&ctx.config.storage.dir).with_context(|| {
        format!(
            "Failed to create storage dir: {}",
            ctx.config.storage.dir.display()
        )
    })?;
    let ext = match Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("pdf") => ".pdf",
        Some("docx") => ".docx",
        _ => ".bin",
    };
    let doc_id = Uuid::new_v4().to_string();
    let stored_filename = format!("{doc_id}{ext}");
    std::fs::write(ctx.config.storage.dir.join(&stored_filename), bytes)?;

    let content_type = match ext {
        ".pdf" => "application/pdf",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    };

    let doc = Document {
        id: doc_id.clone(),
        title: title.to_string(),
        filename: stored_filename,
        content_type: content_type.to_string(),
        uploaded_at: chrono::Utc::now().timestamp(),
        uploaded_by,
        status: "processed".to_string(),
        num_pages: num_pages as i64,
    };
    store::insert_document(pool, &doc).await?;

    let pieces = chunk_text(
        &text,
        ctx.config.chunking.max_chars,
        ctx.config.chunking.overlap,
    )?;

    let chunks: Vec<Chunk> = pieces
        .into_iter()
        .enumerate()
        .map(|(idx, piece)| Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: doc_id.clone(),
            chunk_index: idx as i64,
            page_number: None,
            text: piece,
        })
        .collect();

    if chunks.is_empty() {
        info!(document_id = %doc_id, "document produced no chunks");
        return Ok(doc);
    }

    store::insert_chunks(pool, &chunks).await?;

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = ctx.embedder.embed(&texts).await?;

    let rows: Vec<VectorRow> = chunks
        .iter()
        .zip(vectors.into_iter())
        .map(|(chunk, embedding)| VectorRow {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            page_number: chunk.page_number.unwrap_or(0),
            chunk_index: chunk.chunk_index,
            embedding,
        })
        .collect();
    ctx.index.insert(&rows).await?;

    info!(
        document_id = %doc_id,
        chunks = chunks.len(),
        pages = num_pages,
        "document ingested"
    );
    Ok(doc)
}
