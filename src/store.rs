//! Metadata store: sqlx query layer over documents, chunks, and the
//! search-event audit log.
//!
//! Documents and chunks are written once at ingest and read back during
//! retrieval (hit resolution and neighbor-context lookups). Deleting a
//! document removes its chunks and the document row in one transaction;
//! vectors in the ANN index are left behind and filtered at read time.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::models::{Chunk, Document, SearchEvent};

pub async fn insert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, title, filename, content_type, uploaded_at, uploaded_by, status, num_pages)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.title)
    .bind(&doc.filename)
    .bind(&doc.content_type)
    .bind(doc.uploaded_at)
    .bind(&doc.uploaded_by)
    .bind(&doc.status)
    .bind(doc.num_pages)
    .execute(pool)
    .await?;
    Ok(())
}

/// Batch-insert a document's chunks in one transaction.
pub async fn insert_chunks(pool: &SqlitePool, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, page_number, text) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.page_number)
        .bind(&chunk.text)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        "SELECT id, title, filename, content_type, uploaded_at, uploaded_by, status, num_pages FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| document_from_row(&r)))
}

/// Resolve documents by id into a lookup map. Missing ids are simply absent.
pub async fn documents_by_ids(
    pool: &SqlitePool,
    ids: &HashSet<String>,
) -> Result<HashMap<String, Document>> {
    let mut out = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, title, filename, content_type, uploaded_at, uploaded_by, status, num_pages FROM documents WHERE id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    for row in query.fetch_all(pool).await? {
        let doc = document_from_row(&row);
        out.insert(doc.id.clone(), doc);
    }
    Ok(out)
}

/// Resolve chunks by id into a lookup map. Missing ids are simply absent.
pub async fn chunks_by_ids(
    pool: &SqlitePool,
    ids: &[String],
) -> Result<HashMap<String, Chunk>> {
    let mut out = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, document_id, chunk_index, page_number, text FROM chunks WHERE id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    for row in query.fetch_all(pool).await? {
        let chunk = chunk_from_row(&row);
        out.insert(chunk.id.clone(), chunk);
    }
    Ok(out)
}

/// Fetch chunks for neighbor-context expansion, keyed by
/// (document_id, chunk_index).
pub async fn chunks_by_doc_and_indices(
    pool: &SqlitePool,
    doc_ids: &HashSet<String>,
    indices: &HashSet<i64>,
) -> Result<HashMap<(String, i64), Chunk>> {
    let mut out = HashMap::new();
    if doc_ids.is_empty() || indices.is_empty() {
        return Ok(out);
    }
    let doc_ph = vec!["?"; doc_ids.len()].join(", ");
    let idx_ph = vec!["?"; indices.len()].join(", ");
    let sql = format!(
        "SELECT id, document_id, chunk_index, page_number, text FROM chunks \
         WHERE document_id IN ({doc_ph}) AND chunk_index IN ({idx_ph})"
    );
    let mut query = sqlx::query(&sql);
    for id in doc_ids {
        query = query.bind(id);
    }
    for idx in indices {
        query = query.bind(idx);
    }
    for row in query.fetch_all(pool).await? {
        let chunk = chunk_from_row(&row);
        out.insert((chunk.document_id.clone(), chunk.chunk_index), chunk);
    }
    Ok(out)
}

/// All chunks ordered by (document_id, chunk_index); the reindex stream.
pub async fn all_chunks_ordered(pool: &SqlitePool) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT id, document_id, chunk_index, page_number, text FROM chunks \
         ORDER BY document_id ASC, chunk_index ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(chunk_from_row).collect())
}

/// Delete a document and its chunks. The document's rows in the vector index
/// are intentionally left in place; read-time referential filtering keeps
/// them from ever surfacing, and the next reindex rebuilds a clean index.
pub async fn delete_document(pool: &SqlitePool, document_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Append one audit row. Search events are never updated or deleted.
pub async fn record_search_event(pool: &SqlitePool, event: &SearchEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO search_events (id, created_at, user_id, query_len, query_preview, has_file, duration_ms, results_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.id)
    .bind(event.created_at)
    .bind(&event.user_id)
    .bind(event.query_len)
    .bind(&event.query_preview)
    .bind(event.has_file)
    .bind(event.duration_ms)
    .bind(event.results_count)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_documents(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?)
}

pub async fn count_chunks(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?)
}

pub async fn count_search_events(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM search_events")
        .fetch_one(pool)
        .await?)
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        uploaded_at: row.get("uploaded_at"),
        uploaded_by: row.get("uploaded_by"),
        status: row.get("status"),
        num_pages: row.get("num_pages"),
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        page_number: row.get("page_number"),
        text: row.get("text"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Doc {id}"),
            filename: format!("{id}.pdf"),
            content_type: "application/pdf".to_string(),
            uploaded_at: 1_700_000_000,
            uploaded_by: None,
            status: "processed".to_string(),
            num_pages: 3,
        }
    }

    fn chunk(id: &str, doc_id: &str, idx: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: idx,
            page_number: None,
            text: format!("chunk {idx} of {doc_id}"),
        }
    }

    #[tokio::test]
    async fn document_roundtrip() {
        let pool = test_pool().await;
        insert_document(&pool, &doc("d1")).await.unwrap();
        let loaded = get_document(&pool, "d1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Doc d1");
        assert_eq!(loaded.num_pages, 3);
        assert!(get_document(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn neighbor_lookup_by_doc_and_index() {
        let pool = test_pool().await;
        insert_document(&pool, &doc("d1")).await.unwrap();
        insert_chunks(
            &pool,
            &[chunk("c0", "d1", 0), chunk("c1", "d1", 1), chunk("c2", "d1", 2)],
        )
        .await
        .unwrap();

        let docs: HashSet<String> = ["d1".to_string()].into();
        let idxs: HashSet<i64> = [0, 1].into();
        let found = chunks_by_doc_and_indices(&pool, &docs, &idxs).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key(&("d1".to_string(), 0)));
        assert!(!found.contains_key(&("d1".to_string(), 2)));
    }

    #[tokio::test]
    async fn delete_document_removes_chunks() {
        let pool = test_pool().await;
        insert_document(&pool, &doc("d1")).await.unwrap();
        insert_chunks(&pool, &[chunk("c0", "d1", 0)]).await.unwrap();

        assert!(delete_document(&pool, "d1").await.unwrap());
        assert!(get_document(&pool, "d1").await.unwrap().is_none());
        assert_eq!(count_chunks(&pool).await.unwrap(), 0);
        // Deleting again reports nothing removed.
        assert!(!delete_document(&pool, "d1").await.unwrap());
    }

    #[tokio::test]
    async fn reindex_stream_is_ordered() {
        let pool = test_pool().await;
        insert_document(&pool, &doc("a")).await.unwrap();
        insert_document(&pool, &doc("b")).await.unwrap();
        insert_chunks(
            &pool,
            &[chunk("c3", "b", 1), chunk("c1", "a", 1), chunk("c0", "a", 0), chunk("c2", "b", 0)],
        )
        .await
        .unwrap();

        let all = all_chunks_ordered(&pool).await.unwrap();
        let keys: Vec<(String, i64)> = all
            .iter()
            .map(|c| (c.document_id.clone(), c.chunk_index))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 0),
                ("b".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn search_event_appended() {
        let pool = test_pool().await;
        let event = SearchEvent {
            id: "e1".to_string(),
            created_at: 1_700_000_000,
            user_id: Some("u1".to_string()),
            query_len: 12,
            query_preview: "hello".to_string(),
            has_file: false,
            duration_ms: 42,
            results_count: 3,
        };
        record_search_event(&pool, &event).await.unwrap();
        assert_eq!(count_search_events(&pool).await.unwrap(), 1);
    }
}
