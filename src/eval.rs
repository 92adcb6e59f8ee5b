//! Offline A/B harness comparing reranking strategies.
//!
//! Reads labeled `{query, positive, negative}` rows, scores both candidates
//! under each configured variant, and reports pairwise accuracy, latency
//! percentiles, and exact sign-test p-values for every variant pair.
//!
//! Single-threaded and deterministic for a fixed seed: per-row output order
//! matches input order, and the optional candidate shuffle is driven by one
//! seeded RNG.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::rerank::{HttpPairScorer, LocalStrategy, DEFAULT_ALPHA};

pub const MIN_ROWS: usize = 50;

/// One labeled evaluation row.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalRow {
    pub query: String,
    pub positive: String,
    pub negative: String,
}

/// A reranking variant under evaluation.
pub struct Variant {
    pub id: String,
    pub kind: String,
    pub strategy: LocalStrategy,
}

#[derive(Deserialize)]
struct VariantSpec {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default = "default_alpha")]
    alpha: f32,
}

fn default_alpha() -> f32 {
    DEFAULT_ALPHA
}

#[derive(Deserialize)]
struct VariantsFile {
    variants: Vec<VariantSpec>,
}

/// Load variants from a JSON file: `{"variants": [{"id", "type", "endpoint"?, "alpha"?}]}`.
pub fn load_variants(path: &Path, timeout: Duration) -> Result<Vec<Variant>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read variants file: {}", path.display()))?;
    let file: VariantsFile =
        serde_json::from_str(&content).with_context(|| "Failed to parse variants file")?;
    if file.variants.is_empty() {
        bail!("No variants found in {}", path.display());
    }

    let mut out = Vec::with_capacity(file.variants.len());
    for spec in file.variants {
        let strategy = match spec.kind.as_str() {
            "lexical" => LocalStrategy::Lexical,
            "crossencoder" => {
                let url = spec
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("endpoint required for variant '{}'", spec.id))?;
                LocalStrategy::CrossEncoder(Arc::new(HttpPairScorer::new(url, timeout)?))
            }
            "hybrid" => {
                let url = spec
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("endpoint required for variant '{}'", spec.id))?;
                LocalStrategy::Hybrid {
                    scorer: Arc::new(HttpPairScorer::new(url, timeout)?),
                    alpha: spec.alpha,
                }
            }
            other => bail!("Unknown variant type: {}", other),
        };
        out.push(Variant {
            id: spec.id,
            kind: spec.kind,
            strategy,
        });
    }
    Ok(out)
}

/// Read eval rows from a jsonl file, skipping blank and incomplete rows.
pub fn load_rows(path: &Path, limit: usize) -> Result<Vec<EvalRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

    let mut rows = Vec::new();
    for line in content.lines() {
        if rows.len() >= limit {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: EvalRow = serde_json::from_str(line)
            .with_context(|| format!("Malformed dataset line: {line}"))?;
        if row.query.trim().is_empty()
            || row.positive.trim().is_empty()
            || row.negative.trim().is_empty()
        {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Index of the highest score; first max wins on exact ties.
pub fn pick_winner(scores: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &s) in scores.iter().enumerate() {
        if s > best_score {
            best_score = s;
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Mean plus nearest-rank p95/p99 over a latency sample. Empty input is an
/// all-zero summary; a single sample is its own percentile.
pub fn summarize_latencies(lat_ms: &[f64]) -> LatencySummary {
    if lat_ms.is_empty() {
        return LatencySummary {
            mean_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
        };
    }
    let mut sorted = lat_ms.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q = |p: f64| -> f64 {
        if sorted.len() == 1 {
            return sorted[0];
        }
        let idx = (((sorted.len() - 1) as f64) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };

    LatencySummary {
        mean_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p95_ms: q(0.95),
        p99_ms: q(0.99),
    }
}

/// Exact two-sided sign-test p-value: the total binomial(n, 0.5) probability
/// mass over outcomes no more likely than the observed one (a small epsilon
/// absorbs floating-point ties). `n = 0` degenerates to 1.0.
pub fn sign_test_p(n: usize, k: usize) -> f64 {
    if n == 0 {
        return 1.0;
    }
    // ln-space binomial pmf to stay finite for large n.
    let mut ln_fact = vec![0.0f64; n + 1];
    for i in 1..=n {
        ln_fact[i] = ln_fact[i - 1] + (i as f64).ln();
    }
    let ln_half_n = (n as f64) * 0.5f64.ln();
    let pmf: Vec<f64> = (0..=n)
        .map(|i| (ln_fact[n] - ln_fact[i] - ln_fact[n - i] + ln_half_n).exp())
        .collect();
    let observed = pmf[k.min(n)];
    pmf.iter().filter(|&&p| p <= observed + 1e-15).sum()
}

/// Per-row, per-variant outcome written to the results jsonl.
#[derive(Debug, Serialize)]
pub struct EvalRecord {
    pub row_id: usize,
    pub variant: String,
    pub variant_type: String,
    pub query_len: usize,
    pub candidates_order: Vec<usize>,
    pub scores: Vec<f32>,
    pub chosen_index: usize,
    pub truth_index: usize,
    pub win: u32,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VariantSummary {
    pub variant: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub accuracy: f64,
    pub wins: usize,
    pub total: usize,
    pub errors: usize,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct PairwiseComparison {
    pub a: String,
    pub b: String,
    pub wins_a: usize,
    pub wins_b: usize,
    pub ties: usize,
    pub p_value: f64,
}

pub struct EvalOptions {
    pub data: PathBuf,
    pub variants: PathBuf,
    pub out: PathBuf,
    pub limit: usize,
    pub seed: u64,
    pub shuffle_candidates: bool,
    pub scorer_timeout: Duration,
}

/// Run the harness: score every row under every variant, write per-row
/// records and an aggregate summary next to `out`.
pub async fn run_eval(opts: &EvalOptions) -> Result<()> {
    let variants = load_variants(&opts.variants, opts.scorer_timeout)?;
    let rows = load_rows(&opts.data, opts.limit)?;
    if rows.len() < MIN_ROWS {
        bail!(
            "Need >= {} rows, got {} (use --limit or another dataset)",
            MIN_ROWS,
            rows.len()
        );
    }

    if let Some(parent) = opts.out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out_file = std::fs::File::create(&opts.out)
        .with_context(|| format!("Failed to create {}", opts.out.display()))?;

    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut per_variant_lat: HashMap<String, Vec<f64>> = HashMap::new();
    let mut per_variant_wins: HashMap<String, usize> = HashMap::new();
    let mut per_variant_errors: HashMap<String, usize> = HashMap::new();
    // row_id -> variant -> win
    let mut wins_by_row: HashMap<usize, HashMap<String, u32>> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let row_id = idx + 1;

        let mut order = vec![0usize, 1usize];
        if opts.shuffle_candidates {
            order.shuffle(&mut rng);
        }
        let pool = [row.positive.as_str(), row.negative.as_str()];
        let candidates: Vec<String> = order.iter().map(|&i| pool[i].to_string()).collect();
        // The positive's position after shuffling.
        let truth_index = order.iter().position(|&i| i == 0).unwrap_or(0);

        for variant in &variants {
            let started = Instant::now();
            let (scores, error) = match variant.strategy.score(&row.query, &candidates).await {
                Ok(scores) => (scores, None),
                Err(e) => (vec![0.0; candidates.len()], Some(e.to_string())),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let chosen_index = pick_winner(&scores);
            let win = u32::from(chosen_index == truth_index);

            per_variant_lat
                .entry(variant.id.clone())
                .or_default()
                .push(latency_ms);
            *per_variant_wins.entry(variant.id.clone()).or_default() += win as usize;
            if error.is_some() {
                *per_variant_errors.entry(variant.id.clone()).or_default() += 1;
            }
            wins_by_row
                .entry(row_id)
                .or_default()
                .insert(variant.id.clone(), win);

            let record = EvalRecord {
                row_id,
                variant: variant.id.clone(),
                variant_type: variant.kind.clone(),
                query_len: row.query.chars().count(),
                candidates_order: order.clone(),
                scores,
                chosen_index,
                truth_index,
                win,
                latency_ms,
                error,
            };
            writeln!(out_file, "{}", serde_json::to_string(&record)?)?;
        }
    }

    let total = rows.len();
    let summary: Vec<VariantSummary> = variants
        .iter()
        .map(|v| {
            let wins = per_variant_wins.get(&v.id).copied().unwrap_or(0);
            let lats = summarize_latencies(per_variant_lat.get(&v.id).map_or(&[], Vec::as_slice));
            VariantSummary {
                variant: v.id.clone(),
                kind: v.kind.clone(),
                accuracy: if total > 0 { wins as f64 / total as f64 } else { 0.0 },
                wins,
                total,
                errors: per_variant_errors.get(&v.id).copied().unwrap_or(0),
                mean_ms: lats.mean_ms,
                p95_ms: lats.p95_ms,
                p99_ms: lats.p99_ms,
            }
        })
        .collect();

    let pairwise = pairwise_sign_tests(&variants, total, &wins_by_row);

    let summary_path = opts.out.with_extension("summary.json");
    let summary_json = serde_json::json!({
        "total_rows": total,
        "summary": summary,
        "pairwise": pairwise,
    });
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary_json)?)?;

    println!("Wrote: {}", opts.out.display());
    println!("Wrote: {}", summary_path.display());
    Ok(())
}

/// For every variant pair: restrict to rows where both have results, exclude
/// ties, and run the exact sign test on the directional wins.
fn pairwise_sign_tests(
    variants: &[Variant],
    total_rows: usize,
    wins_by_row: &HashMap<usize, HashMap<String, u32>>,
) -> Vec<PairwiseComparison> {
    let mut out = Vec::new();
    for i in 0..variants.len() {
        for j in (i + 1)..variants.len() {
            let a = &variants[i].id;
            let b = &variants[j].id;
            let mut wins_a = 0usize;
            let mut wins_b = 0usize;
            let mut ties = 0usize;
            for row_id in 1..=total_rows {
                let Some(row) = wins_by_row.get(&row_id) else {
                    continue;
                };
                let (Some(&wa), Some(&wb)) = (row.get(a), row.get(b)) else {
                    continue;
                };
                if wa == wb {
                    ties += 1;
                } else if wa > wb {
                    wins_a += 1;
                } else {
                    wins_b += 1;
                }
            }
            let n = wins_a + wins_b;
            out.push(PairwiseComparison {
                a: a.clone(),
                b: b.clone(),
                wins_a,
                wins_b,
                ties,
                p_value: sign_test_p(n, wins_a),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_winner_first_max_on_tie() {
        assert_eq!(pick_winner(&[0.9, 0.9]), 0);
        assert_eq!(pick_winner(&[0.1, 0.9, 0.9]), 1);
        assert_eq!(pick_winner(&[0.0, 0.0]), 0);
    }

    #[test]
    fn summarize_empty_is_all_zero() {
        let s = summarize_latencies(&[]);
        assert_eq!(s.mean_ms, 0.0);
        assert_eq!(s.p95_ms, 0.0);
        assert_eq!(s.p99_ms, 0.0);
    }

    #[test]
    fn summarize_single_sample_is_that_value() {
        let s = summarize_latencies(&[7.5]);
        assert_eq!(s.mean_ms, 7.5);
        assert_eq!(s.p95_ms, 7.5);
        assert_eq!(s.p99_ms, 7.5);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let lats: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let s = summarize_latencies(&lats);
        // idx = round(99 * 0.95) = 94 -> value 95
        assert_eq!(s.p95_ms, 95.0);
        // idx = round(99 * 0.99) = 98 -> value 99
        assert_eq!(s.p99_ms, 99.0);
        assert!((s.mean_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn sign_test_degenerate_cases() {
        assert_eq!(sign_test_p(0, 0), 1.0);
        // n=1: both outcomes equally likely, p = 1.
        assert!((sign_test_p(1, 1) - 1.0).abs() < 1e-12);
        assert!((sign_test_p(1, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sign_test_balanced_outcome_is_one() {
        assert!((sign_test_p(10, 5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sign_test_extreme_outcome_is_small() {
        // k=0 of n=10: only the two extreme outcomes are as unlikely.
        let p = sign_test_p(10, 0);
        assert!((p - 2.0 / 1024.0).abs() < 1e-9);
        assert!((sign_test_p(10, 10) - p).abs() < 1e-12);
    }

    #[test]
    fn sign_test_is_symmetric() {
        for n in [3usize, 8, 17] {
            for k in 0..=n {
                let lhs = sign_test_p(n, k);
                let rhs = sign_test_p(n, n - k);
                assert!((lhs - rhs).abs() < 1e-9, "asymmetry at n={n} k={k}");
            }
        }
    }

    #[test]
    fn sign_test_survives_large_n() {
        let p = sign_test_p(2000, 1000);
        assert!((p - 1.0).abs() < 1e-6);
        assert!(sign_test_p(2000, 600) < 1e-6);
    }

    #[test]
    fn load_rows_skips_incomplete() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        writeln!(f, r#"{{"query": "q1", "positive": "p1", "negative": "n1"}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"query": "", "positive": "p2", "negative": "n2"}}"#).unwrap();
        writeln!(f, r#"{{"query": "q3", "positive": "p3", "negative": "n3"}}"#).unwrap();
        let rows = load_rows(f.path(), 100).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].query, "q1");
        assert_eq!(rows[1].query, "q3");
    }

    #[test]
    fn load_rows_honors_limit() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        for i in 0..10 {
            writeln!(
                f,
                r#"{{"query": "q{i}", "positive": "p", "negative": "n"}}"#
            )
            .unwrap();
        }
        assert_eq!(load_rows(f.path(), 4).unwrap().len(), 4);
    }

    #[test]
    fn variants_file_rejects_empty() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        write!(f, r#"{{"variants": []}}"#).unwrap();
        assert!(load_variants(f.path(), Duration::from_secs(5)).is_err());
    }

    #[test]
    fn variants_file_parses_lexical() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        write!(
            f,
            r#"{{"variants": [{{"id": "baseline", "type": "lexical"}}]}}"#
        )
        .unwrap();
        let variants = load_variants(f.path(), Duration::from_secs(5)).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].id, "baseline");
        assert!(matches!(variants[0].strategy, LocalStrategy::Lexical));
    }

    #[test]
    fn crossencoder_variant_requires_endpoint() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        write!(
            f,
            r#"{{"variants": [{{"id": "ce", "type": "crossencoder"}}]}}"#
        )
        .unwrap();
        assert!(load_variants(f.path(), Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn run_eval_refuses_small_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("rows.jsonl");
        let mut body = String::new();
        for i in 0..10 {
            body.push_str(&format!(
                "{{\"query\": \"q{i}\", \"positive\": \"p\", \"negative\": \"n\"}}\n"
            ));
        }
        std::fs::write(&data, body).unwrap();
        let variants = dir.path().join("variants.json");
        std::fs::write(
            &variants,
            r#"{"variants": [{"id": "baseline", "type": "lexical"}]}"#,
        )
        .unwrap();

        let opts = EvalOptions {
            data,
            variants,
            out: dir.path().join("results.jsonl"),
            limit: 100,
            seed: 42,
            shuffle_candidates: false,
            scorer_timeout: Duration::from_secs(5),
        };
        let err = run_eval(&opts).await.unwrap_err();
        assert!(err.to_string().contains(">= 50"));
    }

    #[tokio::test]
    async fn run_eval_lexical_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("rows.jsonl");
        let mut body = String::new();
        for i in 0..60 {
            // Positive passage shares the query's vocabulary; negative does not.
            body.push_str(&format!(
                "{{\"query\": \"turbine maintenance schedule {i}\", \
                 \"positive\": \"the turbine maintenance schedule for unit {i}\", \
                 \"negative\": \"completely unrelated cooking recipe\"}}\n"
            ));
        }
        std::fs::write(&data, body).unwrap();
        let variants = dir.path().join("variants.json");
        std::fs::write(
            &variants,
            r#"{"variants": [{"id": "baseline", "type": "lexical"}]}"#,
        )
        .unwrap();
        let out = dir.path().join("results.jsonl");

        let opts = EvalOptions {
            data,
            variants,
            out: out.clone(),
            limit: 100,
            seed: 42,
            shuffle_candidates: true,
            scorer_timeout: Duration::from_secs(5),
        };
        run_eval(&opts).await.unwrap();

        let results = std::fs::read_to_string(&out).unwrap();
        assert_eq!(results.lines().count(), 60);
        // Row order in the output matches input order.
        let first: serde_json::Value = serde_json::from_str(results.lines().next().unwrap()).unwrap();
        assert_eq!(first["row_id"], 1);

        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out.with_extension("summary.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["total_rows"], 60);
        // Lexical overlap separates these rows perfectly.
        assert_eq!(summary["summary"][0]["accuracy"], 1.0);
        assert_eq!(summary["summary"][0]["errors"], 0);
    }
}
