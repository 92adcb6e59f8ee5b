use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::store;

#[derive(Debug, Serialize)]
pub struct Stats {
    pub documents: i64,
    pub chunks: i64,
    pub search_events: i64,
    pub db_size_bytes: u64,
}

pub async fn gather_stats(pool: &SqlitePool, db_path: &Path) -> Result<Stats> {
    let documents = store::count_documents(pool).await?;
    let chunks = store::count_chunks(pool).await?;
    let search_events = store::count_search_events(pool).await?;
    let db_size_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    Ok(Stats {
        documents,
        chunks,
        search_events,
        db_size_bytes,
    })
}

pub async fn run_stats(pool: &SqlitePool, db_path: &Path) -> Result<()> {
    let stats = gather_stats(pool, db_path).await?;

    println!("Corpus statistics:");
    println!("  Documents:      {}", stats.documents);
    println!("  Chunks:         {}", stats.chunks);
    println!("  Search events:  {}", stats.search_events);
    println!(
        "  Database size:  {:.2} MB",
        stats.db_size_bytes as f64 / 1_048_576.0
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::migrate::run_migrations;

    #[tokio::test]
    async fn empty_corpus_reports_zeros() {
        let pool = connect_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let stats = gather_stats(&pool, Path::new("/nonexistent/db.sqlite"))
            .await
            .unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.search_events, 0);
        assert_eq!(stats.db_size_bytes, 0);
    }
}
