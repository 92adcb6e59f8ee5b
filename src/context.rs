//! Process-wide wiring: one [`AppContext`] owns the configured embedder and
//! vector index, and every command path borrows from it instead of building
//! its own clients.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::vector_index::{MilvusIndex, VectorIndex};

pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
}

impl AppContext {
    /// Build HTTP-backed clients from the config. Nothing connects here; the
    /// index dials lazily on first use.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding)?);
        let index: Arc<dyn VectorIndex> =
            Arc::new(MilvusIndex::new(&config.vector, config.embedding.dims)?);
        Ok(Self {
            config,
            embedder,
            index,
        })
    }

    /// Assemble from pre-built parts. Used by tests to swap in stubs.
    pub fn with_parts(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
        }
    }

    /// A retriever over this context's clients, with the reranker the config
    /// asks for.
    pub fn retriever(&self) -> Result<Retriever> {
        let reranker = Reranker::from_config(&self.config.rerank)?;
        Ok(Retriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            reranker,
            self.config.retrieval.top_k,
        ))
    }
}

/// Handles for the spawned maintenance tasks. Dropping without calling
/// [`BackgroundTasks::shutdown`] detaches them.
pub struct BackgroundTasks {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal the tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawn the maintenance tasks: a one-shot warmup that exercises the embedder
/// and index so the first real query does not pay connection costs, and a
/// periodic stats log. Both log and carry on when a dependency is down;
/// neither blocks startup.
///
/// The `docsift` CLI is one-shot and does not call this; it is a library
/// capability for long-running hosts (e.g. a service embedding this crate)
/// that own a process lifecycle to tie the tasks to.
pub fn spawn_background_tasks(
    ctx: Arc<AppContext>,
    pool: SqlitePool,
    stats_interval: Duration,
) -> BackgroundTasks {
    let (stop, stop_rx) = watch::channel(false);
    let mut handles = Vec::new();

    {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::spawn(async move {
            match warmup(&ctx).await {
                Ok(()) => info!("warmup complete"),
                Err(e) => warn!(error = %e, "warmup failed; continuing"),
            }
        }));
    }

    {
        let db_path = ctx.config.db.path.clone();
        let mut stop_rx = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match crate::stats::gather_stats(&pool, &db_path).await {
                            Ok(stats) => info!(
                                documents = stats.documents,
                                chunks = stats.chunks,
                                search_events = stats.search_events,
                                "corpus stats"
                            ),
                            Err(e) => warn!(error = %e, "stats refresh failed"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        }));
    }

    BackgroundTasks { stop, handles }
}

async fn warmup(ctx: &AppContext) -> Result<()> {
    let vector = ctx.embedder.embed_one("warmup").await?;
    ctx.index.search(&vector, 1).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::migrate::run_migrations;
    use crate::vector_index::MemoryIndex;
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dims(&self) -> usize {
            2
        }
    }

    fn test_config() -> Config {
        let toml = r#"
[db]
path = "/tmp/docsift-test.sqlite"

[vector]
url = "http://localhost:19530"

[embedding]
url = "http://localhost:8080/embed"
dims = 2
"#;
        toml::from_str(toml).unwrap()
    }

    #[tokio::test]
    async fn background_tasks_shut_down_cleanly() {
        let pool = connect_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let ctx = Arc::new(AppContext::with_parts(
            test_config(),
            Arc::new(StubEmbedder),
            Arc::new(MemoryIndex::new()),
        ));
        let tasks = spawn_background_tasks(ctx, pool, Duration::from_secs(3600));
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn retriever_builds_from_context() {
        let ctx = AppContext::with_parts(
            test_config(),
            Arc::new(StubEmbedder),
            Arc::new(MemoryIndex::new()),
        );
        assert!(ctx.retriever().is_ok());
    }
}
