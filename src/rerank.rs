//! Second-pass relevance scoring over retrieved candidates.
//!
//! The [`Reranker`] is a closed variant chosen once at construction:
//! disabled, a local scoring strategy, or a remote scoring endpoint. Every
//! path fails open: a scoring error of any kind returns the candidates in
//! their original retrieval order, never an error to the caller. Call count
//! and cumulative duration are recorded regardless of outcome.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RerankConfig;
use crate::models::SearchResultItem;

/// Default weight of the cross-encoder score in the hybrid strategy.
pub const DEFAULT_ALPHA: f32 = 0.8;

/// Capability trait for a pretrained cross-encoder: jointly score
/// (query, passage) pairs. Implementations return one raw logit vector per
/// pair; [`scores_from_logits`] turns them into probabilities.
#[async_trait]
pub trait PairScorer: Send + Sync {
    async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Convert raw classification-head logits into relevance scores: a single
/// output gets a logistic transform; a multi-class head contributes the
/// probability of its last class.
pub fn scores_from_logits(logits: &[Vec<f32>]) -> Result<Vec<f32>> {
    logits
        .iter()
        .map(|row| match row.len() {
            0 => bail!("empty logit row from scorer"),
            1 => Ok(sigmoid(row[0])),
            _ => Ok(softmax_last(row)),
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax_last(logits: &[f32]) -> f32 {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum: f32 = logits.iter().map(|l| (l - max).exp()).sum();
    let last = logits[logits.len() - 1];
    (last - max).exp() / exp_sum
}

/// HTTP-backed [`PairScorer`]: posts `{query, passages}` to an inference
/// endpoint that answers with one logit vector per pair.
pub struct HttpPairScorer {
    client: reqwest::Client,
    url: String,
}

impl HttpPairScorer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PairScorer for HttpPairScorer {
    async fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "query": query, "passages": passages });
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("scorer returned {}", status);
        }
        let logits: Vec<Vec<f32>> = resp.json().await?;
        if logits.len() != passages.len() {
            bail!(
                "scorer returned {} rows for {} pairs",
                logits.len(),
                passages.len()
            );
        }
        scores_from_logits(&logits)
    }
}

/// Token-overlap similarity: |intersection| / |union| over lowercased word
/// tokens of length >= 3.
pub fn lexical_overlap(query: &str, passage: &str) -> f32 {
    let a = word_tokens(query);
    let b = word_tokens(passage);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

fn word_tokens(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Local scoring strategy.
pub enum LocalStrategy {
    Lexical,
    CrossEncoder(Arc<dyn PairScorer>),
    Hybrid {
        scorer: Arc<dyn PairScorer>,
        alpha: f32,
    },
}

impl LocalStrategy {
    /// Score one candidate excerpt per entry, in order.
    pub async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        match self {
            LocalStrategy::Lexical => Ok(passages
                .iter()
                .map(|p| lexical_overlap(query, p))
                .collect()),
            LocalStrategy::CrossEncoder(scorer) => scorer.score_pairs(query, passages).await,
            LocalStrategy::Hybrid { scorer, alpha } => {
                let model = scorer.score_pairs(query, passages).await?;
                let scores = passages
                    .iter()
                    .zip(model.iter())
                    .map(|(p, m)| alpha * m + (1.0 - alpha) * lexical_overlap(query, p))
                    .collect();
                Ok(scores)
            }
        }
    }
}

/// Rerank-call telemetry, recorded for every attempt including failures.
#[derive(Default)]
pub struct RerankStats {
    calls: AtomicU64,
    duration_micros: AtomicU64,
}

impl RerankStats {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_micros(self.duration_micros.load(Ordering::Relaxed))
    }

    fn record(&self, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.duration_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// The reranking pass. Constructed once from config; see [`Reranker::from_config`].
pub enum Reranker {
    Disabled,
    Local {
        strategy: LocalStrategy,
        stats: RerankStats,
    },
    Remote {
        client: reqwest::Client,
        endpoint: String,
        stats: RerankStats,
    },
}

impl Reranker {
    pub fn from_config(config: &RerankConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        match config.mode.as_str() {
            "disabled" => Ok(Reranker::Disabled),
            "local" => {
                let strategy = match config.strategy.as_str() {
                    "lexical" => LocalStrategy::Lexical,
                    "crossencoder" => {
                        let url = config
                            .scorer_url
                            .as_deref()
                            .ok_or_else(|| anyhow::anyhow!("rerank.scorer_url required"))?;
                        LocalStrategy::CrossEncoder(Arc::new(HttpPairScorer::new(url, timeout)?))
                    }
                    "hybrid" => {
                        let url = config
                            .scorer_url
                            .as_deref()
                            .ok_or_else(|| anyhow::anyhow!("rerank.scorer_url required"))?;
                        LocalStrategy::Hybrid {
                            scorer: Arc::new(HttpPairScorer::new(url, timeout)?),
                            alpha: config.alpha,
                        }
                    }
                    other => bail!("unknown rerank strategy: {}", other),
                };
                Ok(Reranker::Local {
                    strategy,
                    stats: RerankStats::default(),
                })
            }
            "remote" => {
                let endpoint = config
                    .endpoint
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("rerank.endpoint required"))?;
                Ok(Reranker::Remote {
                    client: reqwest::Client::builder().timeout(timeout).build()?,
                    endpoint,
                    stats: RerankStats::default(),
                })
            }
            other => bail!("unknown rerank mode: {}", other),
        }
    }

    pub fn stats(&self) -> Option<&RerankStats> {
        match self {
            Reranker::Disabled => None,
            Reranker::Local { stats, .. } | Reranker::Remote { stats, .. } => Some(stats),
        }
    }

    /// Rerank candidates. Never fails: any scoring error leaves the input
    /// order untouched (fail open).
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResultItem>,
    ) -> Vec<SearchResultItem> {
        if candidates.is_empty() {
            return candidates;
        }
        match self {
            Reranker::Disabled => candidates,
            Reranker::Local { strategy, stats } => {
                let started = Instant::now();
                let passages: Vec<String> = candidates.iter().map(|c| c.excerpt.clone()).collect();
                let outcome = strategy.score(query, &passages).await;
                stats.record(started.elapsed());
                match outcome {
                    Ok(scores) => apply_scores(candidates, &scores),
                    Err(e) => {
                        warn!(error = %e, "local rerank failed, keeping retrieval order");
                        candidates
                    }
                }
            }
            Reranker::Remote {
                client,
                endpoint,
                stats,
            } => {
                let started = Instant::now();
                let outcome = remote_rerank(client, endpoint, query, &candidates).await;
                stats.record(started.elapsed());
                match outcome {
                    Ok(ranked) => {
                        debug!(candidates = ranked.len(), "remote rerank succeeded");
                        order_by_rerank_score(ranked)
                    }
                    Err(e) => {
                        warn!(error = %e, "remote rerank failed, keeping retrieval order");
                        candidates
                    }
                }
            }
        }
    }
}

/// Attach scores and produce the final order.
fn apply_scores(mut candidates: Vec<SearchResultItem>, scores: &[f32]) -> Vec<SearchResultItem> {
    if scores.len() != candidates.len() {
        return candidates;
    }
    for (c, s) in candidates.iter_mut().zip(scores.iter()) {
        c.rerank_score = Some(*s);
    }
    order_by_rerank_score(candidates)
}

/// Stable sort: descending rerank_score, ties broken by the original
/// retrieval score.
fn order_by_rerank_score(mut candidates: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
    candidates.sort_by(|a, b| {
        let ra = a.rerank_score.unwrap_or(0.0);
        let rb = b.rerank_score.unwrap_or(0.0);
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    candidates
}

/// Remote reranker contract: POST `{query, candidates}`; a success is a 2xx
/// response carrying a same-length list of candidates annotated with
/// `rerank_score`. Any other shape or status is an error (recovered by the
/// caller as fail-open).
async fn remote_rerank(
    client: &reqwest::Client,
    endpoint: &str,
    query: &str,
    candidates: &[SearchResultItem],
) -> Result<Vec<SearchResultItem>> {
    let body = serde_json::json!({ "query": query, "candidates": candidates });
    let resp = client.post(endpoint).json(&body).send().await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("remote reranker returned {}", status);
    }

    let ranked: Vec<SearchResultItem> = resp.json().await?;
    if ranked.len() != candidates.len() {
        bail!(
            "remote reranker returned {} candidates for {}",
            ranked.len(),
            candidates.len()
        );
    }
    if ranked.iter().any(|c| c.rerank_score.is_none()) {
        bail!("remote reranker response missing rerank_score");
    }
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(doc: &str, score: f32, excerpt: &str) -> SearchResultItem {
        SearchResultItem {
            document_id: doc.to_string(),
            title: format!("Title {doc}"),
            score,
            rerank_score: None,
            excerpt: excerpt.to_string(),
            page_number: None,
        }
    }

    #[test]
    fn lexical_overlap_is_jaccard() {
        let s = lexical_overlap("alpha beta gamma", "alpha beta delta");
        // intersection {alpha, beta} = 2, union = 4
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn lexical_overlap_ignores_short_tokens_and_case() {
        let s = lexical_overlap("an ALPHA of", "it alpha at");
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lexical_overlap_empty_is_zero() {
        assert_eq!(lexical_overlap("", "something"), 0.0);
        assert_eq!(lexical_overlap("a b", "c d"), 0.0);
    }

    #[test]
    fn single_logit_uses_sigmoid() {
        let scores = scores_from_logits(&[vec![0.0], vec![10.0], vec![-10.0]]).unwrap();
        assert!((scores[0] - 0.5).abs() < 1e-6);
        assert!(scores[1] > 0.99);
        assert!(scores[2] < 0.01);
    }

    #[test]
    fn multiclass_logits_use_last_class_probability() {
        // Two classes, last strongly preferred.
        let scores = scores_from_logits(&[vec![0.0, 5.0]]).unwrap();
        assert!(scores[0] > 0.99);
        // Uniform logits: last-class probability is 1/3.
        let scores = scores_from_logits(&[vec![1.0, 1.0, 1.0]]).unwrap();
        assert!((scores[0] - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn empty_logit_row_is_an_error() {
        assert!(scores_from_logits(&[vec![]]).is_err());
    }

    #[tokio::test]
    async fn disabled_reranker_is_identity() {
        let reranker = Reranker::Disabled;
        let input = vec![item("d1", 0.9, "one"), item("d2", 0.8, "two")];
        let out = reranker.rerank("query", input.clone()).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].document_id, "d1");
        assert_eq!(out[1].document_id, "d2");
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn lexical_reranker_reorders_by_overlap() {
        let reranker = Reranker::Local {
            strategy: LocalStrategy::Lexical,
            stats: RerankStats::default(),
        };
        let input = vec![
            item("d1", 0.9, "completely unrelated words here"),
            item("d2", 0.8, "turbine maintenance schedule overview"),
        ];
        let out = reranker.rerank("turbine maintenance", input).await;
        assert_eq!(out[0].document_id, "d2");
        assert!(out[0].rerank_score.unwrap() > out[1].rerank_score.unwrap());
    }

    struct FailingScorer;

    #[async_trait]
    impl PairScorer for FailingScorer {
        async fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            bail!("model exploded")
        }
    }

    #[tokio::test]
    async fn scorer_failure_fails_open() {
        let reranker = Reranker::Local {
            strategy: LocalStrategy::CrossEncoder(Arc::new(FailingScorer)),
            stats: RerankStats::default(),
        };
        let input = vec![item("d1", 0.9, "one"), item("d2", 0.8, "two")];
        let out = reranker.rerank("query", input.clone()).await;
        assert_eq!(out[0].document_id, "d1");
        assert_eq!(out[1].document_id, "d2");
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
        // The failed call is still counted.
        assert_eq!(reranker.stats().unwrap().calls(), 1);
    }

    struct FixedScorer(Vec<f32>);

    #[async_trait]
    impl PairScorer for FixedScorer {
        async fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn hybrid_blends_model_and_lexical() {
        let reranker = Reranker::Local {
            strategy: LocalStrategy::Hybrid {
                scorer: Arc::new(FixedScorer(vec![1.0, 0.0])),
                alpha: 0.8,
            },
            stats: RerankStats::default(),
        };
        let input = vec![
            // No lexical overlap: hybrid = 0.8 * 1.0 = 0.8
            item("d1", 0.5, "nothing shared"),
            // Full overlap, zero model score: hybrid = 0.2 * 1.0 = 0.2
            item("d2", 0.6, "turbine maintenance"),
        ];
        let out = reranker.rerank("turbine maintenance", input).await;
        assert_eq!(out[0].document_id, "d1");
        assert!((out[0].rerank_score.unwrap() - 0.8).abs() < 1e-6);
        assert!((out[1].rerank_score.unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn rerank_ties_break_by_retrieval_score() {
        let reranker = Reranker::Local {
            strategy: LocalStrategy::CrossEncoder(Arc::new(FixedScorer(vec![0.7, 0.7, 0.9]))),
            stats: RerankStats::default(),
        };
        let input = vec![
            item("low", 0.3, "a"),
            item("high", 0.8, "b"),
            item("best", 0.1, "c"),
        ];
        let out = reranker.rerank("query", input).await;
        assert_eq!(out[0].document_id, "best");
        // Tied rerank scores: higher retrieval score first.
        assert_eq!(out[1].document_id, "high");
        assert_eq!(out[2].document_id, "low");
    }

    #[tokio::test]
    async fn remote_failure_fails_open() {
        // Nothing listens on this port; the call errors and the original
        // order must survive.
        let reranker = Reranker::Remote {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(200))
                .build()
                .unwrap(),
            endpoint: "http://127.0.0.1:1/rerank".to_string(),
            stats: RerankStats::default(),
        };
        let input = vec![item("d1", 0.9, "one"), item("d2", 0.8, "two")];
        let out = reranker.rerank("query", input.clone()).await;
        assert_eq!(out[0].document_id, "d1");
        assert_eq!(out[1].document_id, "d2");
        assert_eq!(reranker.stats().unwrap().calls(), 1);
        assert!(reranker.stats().unwrap().total_duration() >= Duration::ZERO);
    }
}
