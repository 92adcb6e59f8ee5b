//! Batch reindex utility: re-embed every chunk and re-insert into the vector
//! store.
//!
//! Streams chunks ordered by (document_id, chunk_index), embeds them in
//! batches, and inserts the rows. The existing collection is deliberately
//! never dropped first: if the store is empty the insert simply recreates
//! the collection, and a mid-run failure cannot lose data that was already
//! indexed.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::context::AppContext;
use crate::models::VectorRow;
use crate::store;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Re-embed all chunks and insert them into the vector index. Returns the
/// number of rows inserted.
pub async fn run_reindex(ctx: &AppContext, pool: &SqlitePool, batch_size: usize) -> Result<usize> {
    let chunks = store::all_chunks_ordered(pool).await?;
    if chunks.is_empty() {
        println!("No chunks found. Ingest documents first.");
        return Ok(0);
    }

    println!(
        "Reindexing {} chunks into collection '{}' ...",
        chunks.len(),
        ctx.config.vector.collection
    );

    let mut total = 0usize;
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = ctx.embedder.embed(&texts).await?;

        let rows: Vec<VectorRow> = batch
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
        total += rows.len();
        println!("  inserted: {}/{}", total, chunks.len());
    }

    println!("Done.");
    Ok(total)
}
