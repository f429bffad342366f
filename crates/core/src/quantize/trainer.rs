//! Training pipeline for [`QuantizationModel`]

use crate::config::TrainerConfig;
use crate::quantize::lopq::{LopqParams, LopqQuantizer};
use crate::quantize::model::{BalancedRotation, QuantizationModel};
use crate::quantize::pca::PcaReduction;
use crate::quantize::searcher::LopqSearcher;
use crate::vector::ops::l2_distance_squared_unchecked;
use crate::{Result, RetrievalError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fraction of held-out queries whose true nearest neighbour appears in the
/// top `k` approximate results
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallAt {
    pub k: usize,
    pub recall: f32,
}

/// Summary of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub corpus_size: usize,
    pub fit_size: usize,
    pub held_out_size: usize,
    /// Share of total variance kept by the PCA projection
    pub explained_variance_ratio: f32,
    /// Empty when recall evaluation was skipped or nothing was held out
    pub recall: Vec<RecallAt>,
}

impl TrainingReport {
    pub fn recall_at(&self, k: usize) -> Option<f32> {
        self.recall.iter().find(|r| r.k == k).map(|r| r.recall)
    }
}

/// Fits PCA, the balanced rotation and the LOPQ quantizer on a corpus
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    config: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train a model on `corpus`
    ///
    /// # Errors
    ///
    /// `Training` for an unusable configuration or too small a corpus,
    /// `DimensionMismatch` for ragged input.
    pub fn fit<V: AsRef<[f32]>>(&self, corpus: &[V]) -> Result<QuantizationModel> {
        self.fit_with_report(corpus).map(|(model, _)| model)
    }

    /// Train a model and report split sizes and held-out recall
    pub fn fit_with_report<V: AsRef<[f32]>>(&self, corpus: &[V]) -> Result<(QuantizationModel, TrainingReport)> {
        let config = &self.config;
        let n = corpus.len();
        if n < 2 {
            return Err(RetrievalError::Training(format!(
                "Need at least 2 corpus vectors, got {}",
                n
            )));
        }
        if !(0.0..1.0).contains(&config.test_fraction) {
            return Err(RetrievalError::Training(format!(
                "test_fraction must be in [0, 1), got {}",
                config.test_fraction
            )));
        }
        let params = LopqParams {
            v: config.v,
            m: config.m,
            sub_clusters: config.sub_clusters,
            kmeans_iterations: config.kmeans_iterations,
        };
        params.validate(config.n_components)?;

        let input_dim = corpus[0].as_ref().len();
        info!(
            rows = n,
            input_dim,
            n_components = config.n_components,
            v = config.v,
            m = config.m,
            sub_clusters = config.sub_clusters,
            "training quantization model"
        );

        let pca = PcaReduction::fit(corpus, config.n_components)?;
        let projected = corpus
            .iter()
            .map(|x| pca.transform(x.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let explained_variance_ratio = explained_ratio(&pca, corpus);
        debug!(explained_variance_ratio, "fitted PCA");

        let rotation = BalancedRotation::fit(&projected)?;
        let reduced: Vec<Vec<f32>> = projected.iter().map(|p| rotation.apply(p)).collect();
        debug!(permutation = ?rotation.permutation(), "fitted balanced rotation");

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let held_out_size = ((n as f32 * config.test_fraction).ceil() as usize).min(n - 1);
        let (held_out, fit) = order.split_at(held_out_size);

        let fit_data: Vec<Vec<f32>> = fit.iter().map(|&i| reduced[i].clone()).collect();
        let quantizer = LopqQuantizer::fit(&fit_data, params, &mut rng)?;
        info!(
            fit = fit.len(),
            held_out = held_out.len(),
            "fitted LOPQ quantizer"
        );

        let corpus_codes = reduced
            .iter()
            .map(|r| quantizer.predict(r))
            .collect::<Result<Vec<_>>>()?;

        let recall = if config.evaluate_recall && !held_out.is_empty() {
            let held_data: Vec<&[f32]> = held_out.iter().map(|&i| reduced[i].as_slice()).collect();
            let recall = evaluate_recall(&quantizer, &fit_data, &held_data, config.recall_depth)?;
            for r in &recall {
                info!(k = r.k, recall = r.recall, "held-out recall");
            }
            recall
        } else {
            Vec::new()
        };

        let report = TrainingReport {
            corpus_size: n,
            fit_size: fit.len(),
            held_out_size: held_out.len(),
            explained_variance_ratio,
            recall,
        };

        let model = QuantizationModel::from_parts(pca, rotation, quantizer, corpus_codes)?;
        Ok((model, report))
    }
}

/// Recall at 1, 10, 100, ... up to `depth`, against brute-force nearest
/// neighbours in `fit_data`
fn evaluate_recall(
    quantizer: &LopqQuantizer,
    fit_data: &[Vec<f32>],
    queries: &[&[f32]],
    depth: usize,
) -> Result<Vec<RecallAt>> {
    let depth = depth.max(1);
    let codes = fit_data
        .iter()
        .map(|x| quantizer.predict(x))
        .collect::<Result<Vec<_>>>()?;
    let searcher = LopqSearcher::from_codes(&codes);

    let cutoffs: Vec<usize> = std::iter::successors(Some(1usize), |k| k.checked_mul(10))
        .take_while(|&k| k <= depth)
        .collect();
    let mut hits = vec![0usize; cutoffs.len()];

    for query in queries {
        let truth = fit_data
            .iter()
            .enumerate()
            .map(|(row, x)| (row, l2_distance_squared_unchecked(query, x)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(row, _)| row);

        let results = searcher.search(quantizer, query, depth)?;
        if let Some(position) = results.iter().position(|n| Some(n.row) == truth) {
            for (hit, &k) in hits.iter_mut().zip(&cutoffs) {
                if position < k {
                    *hit += 1;
                }
            }
        }
    }

    Ok(cutoffs
        .into_iter()
        .zip(hits)
        .map(|(k, hit)| RecallAt {
            k,
            recall: hit as f32 / queries.len() as f32,
        })
        .collect())
}

fn explained_ratio<V: AsRef<[f32]>>(pca: &PcaReduction, corpus: &[V]) -> f32 {
    let n = corpus.len();
    let total: f64 = corpus
        .iter()
        .map(|x| {
            x.as_ref()
                .iter()
                .zip(pca.mean())
                .map(|(&a, &m)| ((a - m) as f64).powi(2))
                .sum::<f64>()
        })
        .sum::<f64>()
        / (n - 1) as f64;
    if total <= 0.0 {
        return 1.0;
    }
    let kept: f64 = pca.explained_variance().iter().map(|&v| v as f64).sum();
    (kept / total).min(1.0) as f32
}
