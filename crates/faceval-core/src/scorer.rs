//! Pairwise verification scoring.
//!
//! Embeds both images of every pair, L2-normalizes each embedding, takes the
//! Euclidean distance between them, then sweeps a range of decision
//! thresholds and reports the one with the best accuracy. A pair is
//! predicted "same" when `distance < threshold`.
//!
//! Any failure aborts the whole evaluation. Callers never receive an
//! accuracy computed from a partially embedded dataset.

use crate::embedder::{BatchEmbedder, Embedder};
use crate::threshold::ThresholdRange;
use crate::types::{Evaluation, OperatingPoint, PairDataset};
use std::error::Error;
use std::fmt;
use thiserror::Error;

/// Which image of a pair an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSide {
    First,
    Second,
}

impl fmt::Display for PairSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairSide::First => f.write_str("first"),
            PairSide::Second => f.write_str("second"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("pair dataset is empty")]
    EmptyDataset,
    #[error("embedding failed at pair {pair}: {source}")]
    Embedding {
        /// Index of the pair (for batched calls, the first pair of the batch).
        pair: usize,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("{side} embedding of pair {pair} has a zero or non-finite norm and cannot be normalized")]
    DegenerateEmbedding { pair: usize, side: PairSide },
    #[error("embedding of pair {pair} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        pair: usize,
        expected: usize,
        actual: usize,
    },
    #[error("batch embedder returned {actual} vectors for {expected} images")]
    BatchLength { expected: usize, actual: usize },
    #[error("{distances} distances but {labels} labels")]
    LabelCount { distances: usize, labels: usize },
    #[error("invalid threshold range {start}..{stop} step {step}")]
    InvalidRange { start: f32, stop: f32, step: f32 },
}

impl ScorerError {
    fn embedding(pair: usize, err: impl Error + Send + Sync + 'static) -> Self {
        ScorerError::Embedding {
            pair,
            source: Box::new(err),
        }
    }
}

/// Scale `v` to unit Euclidean length. `None` for a zero, NaN or infinite norm.
///
/// The norm is accumulated in f64, which cannot overflow for finite f32 input.
pub fn l2_normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|&x| (x as f64 / norm) as f32).collect())
}

/// Distance between two embeddings after normalizing each one.
///
/// `None` when either vector cannot be normalized or the dimensions differ.
pub fn normalized_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let a = l2_normalize(a)?;
    let b = l2_normalize(b)?;
    Some(euclidean(&a, &b))
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Accuracy at every candidate threshold, in candidate order.
///
/// `distances` and `labels` must have the same non-zero length.
pub fn sweep(distances: &[f32], labels: &[bool], candidates: &[f32]) -> Vec<OperatingPoint> {
    let total = distances.len();
    candidates
        .iter()
        .map(|&threshold| {
            let correct = distances
                .iter()
                .zip(labels.iter())
                .filter(|&(&d, &same)| (d < threshold) == same)
                .count();
            OperatingPoint {
                threshold,
                accuracy: (correct as f64 / total as f64) as f32,
            }
        })
        .collect()
}

/// First point with maximal accuracy. Later points only win if strictly better.
pub fn best_operating_point(points: &[OperatingPoint]) -> Option<OperatingPoint> {
    let mut best: Option<OperatingPoint> = None;
    for p in points {
        match best {
            Some(b) if p.accuracy <= b.accuracy => {}
            _ => best = Some(*p),
        }
    }
    best
}

/// Verification scorer over a fixed threshold range.
///
/// Holds no state between calls, so one scorer can serve every validation cycle.
#[derive(Debug, Clone)]
pub struct Scorer {
    range: ThresholdRange,
    candidates: Vec<f32>,
}

impl Default for Scorer {
    fn default() -> Self {
        let range = ThresholdRange::default();
        Self {
            candidates: range.candidates(),
            range,
        }
    }
}

impl Scorer {
    pub fn new(range: ThresholdRange) -> Result<Self, ScorerError> {
        if !range.is_valid() {
            return Err(ScorerError::InvalidRange {
                start: range.start,
                stop: range.stop,
                step: range.step,
            });
        }
        Ok(Self {
            candidates: range.candidates(),
            range,
        })
    }

    pub fn range(&self) -> ThresholdRange {
        self.range
    }

    pub fn candidates(&self) -> &[f32] {
        &self.candidates
    }

    /// Evaluate with one embedder call per image.
    pub fn evaluate<I, E>(
        &self,
        embedder: &mut E,
        pairs: &PairDataset<I>,
    ) -> Result<Evaluation, ScorerError>
    where
        E: Embedder<I> + ?Sized,
    {
        if pairs.is_empty() {
            return Err(ScorerError::EmptyDataset);
        }

        let mut dim = None;
        let mut distances = Vec::with_capacity(pairs.len());
        for (index, pair) in pairs.iter().enumerate() {
            let first = embedder
                .embed(&pair.first)
                .map_err(|e| ScorerError::embedding(index, e))?;
            let second = embedder
                .embed(&pair.second)
                .map_err(|e| ScorerError::embedding(index, e))?;
            distances.push(checked_distance(index, &first, &second, &mut dim)?);
        }

        self.score_distances(&distances, &pairs.labels())
    }

    /// Evaluate with `batch_size` pairs (twice as many images) per embedder call.
    ///
    /// Images are submitted interleaved: `[p0.first, p0.second, p1.first, ...]`.
    /// A `batch_size` of zero is treated as one.
    pub fn evaluate_batched<I, E>(
        &self,
        embedder: &mut E,
        pairs: &PairDataset<I>,
        batch_size: usize,
    ) -> Result<Evaluation, ScorerError>
    where
        E: BatchEmbedder<I> + ?Sized,
    {
        if pairs.is_empty() {
            return Err(ScorerError::EmptyDataset);
        }

        let batch_size = batch_size.max(1);
        let mut dim = None;
        let mut distances = Vec::with_capacity(pairs.len());

        for (chunk_idx, chunk) in pairs.pairs().chunks(batch_size).enumerate() {
            let base = chunk_idx * batch_size;
            let images: Vec<&I> = chunk.iter().flat_map(|p| [&p.first, &p.second]).collect();

            let vectors = embedder
                .embed_batch(&images)
                .map_err(|e| ScorerError::embedding(base, e))?;
            if vectors.len() != images.len() {
                return Err(ScorerError::BatchLength {
                    expected: images.len(),
                    actual: vectors.len(),
                });
            }

            for (offset, pair) in vectors.chunks_exact(2).enumerate() {
                distances.push(checked_distance(base + offset, &pair[0], &pair[1], &mut dim)?);
            }
            tracing::trace!(batch = chunk_idx, pairs = chunk.len(), "embedded batch");
        }

        self.score_distances(&distances, &pairs.labels())
    }

    /// Run only the threshold sweep over precomputed distances.
    pub fn score_distances(
        &self,
        distances: &[f32],
        labels: &[bool],
    ) -> Result<Evaluation, ScorerError> {
        if distances.len() != labels.len() {
            return Err(ScorerError::LabelCount {
                distances: distances.len(),
                labels: labels.len(),
            });
        }
        if distances.is_empty() {
            return Err(ScorerError::EmptyDataset);
        }

        let points = sweep(distances, labels, &self.candidates);
        let best = best_operating_point(&points).ok_or(ScorerError::InvalidRange {
            start: self.range.start,
            stop: self.range.stop,
            step: self.range.step,
        })?;

        tracing::debug!(
            pairs = distances.len(),
            accuracy = best.accuracy,
            threshold = best.threshold,
            "verification sweep complete"
        );

        Ok(Evaluation {
            best,
            sweep: points,
            distances: distances.to_vec(),
            pair_count: distances.len(),
        })
    }
}

/// Normalize both embeddings and measure their distance, enforcing one
/// dimension across the whole evaluation.
fn checked_distance(
    pair: usize,
    first: &[f32],
    second: &[f32],
    dim: &mut Option<usize>,
) -> Result<f32, ScorerError> {
    for v in [first, second] {
        let expected = *dim.get_or_insert(v.len());
        if v.len() != expected {
            return Err(ScorerError::DimensionMismatch {
                pair,
                expected,
                actual: v.len(),
            });
        }
    }

    let a = l2_normalize(first).ok_or_else(|| degenerate(pair, PairSide::First))?;
    let b = l2_normalize(second).ok_or_else(|| degenerate(pair, PairSide::Second))?;
    Ok(euclidean(&a, &b))
}

fn degenerate(pair: usize, side: PairSide) -> ScorerError {
    tracing::warn!(pair, %side, "embedding cannot be normalized; aborting evaluation");
    ScorerError::DegenerateEmbedding { pair, side }
}
