use crate::scorer::l2_normalize;
use serde::{Deserialize, Serialize};

/// Face embedding vector produced by a recognition model for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, if known.
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Vectors that cannot be normalized
    /// compare as 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        match (l2_normalize(&self.values), l2_normalize(&other.values)) {
            (Some(a), Some(b)) => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
            _ => 0.0,
        }
    }
}

/// Two images plus the ground-truth label saying whether they show the same identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationPair<I> {
    pub first: I,
    pub second: I,
    pub is_same: bool,
}

impl<I> VerificationPair<I> {
    pub fn new(first: I, second: I, is_same: bool) -> Self {
        Self {
            first,
            second,
            is_same,
        }
    }
}

/// Ordered, immutable collection of verification pairs.
///
/// Built once and reused for every evaluation cycle. `I` is whatever the
/// embedder consumes: a file path before decoding, a tensor after.
#[derive(Debug, Clone)]
pub struct PairDataset<I> {
    pairs: Vec<VerificationPair<I>>,
}

impl<I> PairDataset<I> {
    pub fn new(pairs: Vec<VerificationPair<I>>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[VerificationPair<I>] {
        &self.pairs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VerificationPair<I>> {
        self.pairs.iter()
    }

    /// Ground-truth labels in dataset order.
    pub fn labels(&self) -> Vec<bool> {
        self.pairs.iter().map(|p| p.is_same).collect()
    }

    /// Number of pairs labelled "same".
    pub fn same_count(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_same).count()
    }

    /// Convert every image in the dataset, preserving order. Fails on the first error.
    pub fn try_map<J, E>(
        &self,
        mut f: impl FnMut(&I) -> Result<J, E>,
    ) -> Result<PairDataset<J>, E> {
        let pairs = self
            .pairs
            .iter()
            .map(|p| {
                Ok(VerificationPair {
                    first: f(&p.first)?,
                    second: f(&p.second)?,
                    is_same: p.is_same,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(PairDataset { pairs })
    }
}

impl<I> FromIterator<VerificationPair<I>> for PairDataset<I> {
    fn from_iter<T: IntoIterator<Item = VerificationPair<I>>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a, I> IntoIterator for &'a PairDataset<I> {
    type Item = &'a VerificationPair<I>;
    type IntoIter = std::slice::Iter<'a, VerificationPair<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// A candidate decision threshold and the accuracy it achieves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub threshold: f32,
    /// Fraction of pairs classified correctly, in [0, 1].
    pub accuracy: f32,
}

/// Outcome of one verification run over a pair dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// First maximum of the sweep (lowest threshold on ties).
    pub best: OperatingPoint,
    /// Every candidate threshold in sweep order.
    pub sweep: Vec<OperatingPoint>,
    /// Per-pair distances in dataset order.
    pub distances: Vec<f32>,
    pub pair_count: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f32 {
        self.best.accuracy
    }

    pub fn threshold(&self) -> f32 {
        self.best.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = embedding(vec![1.0, 0.0, 0.0]);
        let b = embedding(vec![2.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = embedding(vec![1.0, 0.0]);
        assert!(a.similarity(&embedding(vec![0.0, 3.0])).abs() < 1e-6);
        assert!((a.similarity(&embedding(vec![-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = embedding(vec![0.0, 0.0]);
        let b = embedding(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_large_components() {
        let a = embedding(vec![3e19, 4e19]);
        let b = embedding(vec![3.0, 4.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dataset_labels_preserve_order() {
        let ds: PairDataset<u8> = vec![
            VerificationPair::new(1, 2, true),
            VerificationPair::new(3, 4, false),
            VerificationPair::new(5, 6, true),
        ]
        .into_iter()
        .collect();
        assert_eq!(ds.labels(), vec![true, false, true]);
        assert_eq!(ds.same_count(), 2);
    }

    #[test]
    fn test_dataset_try_map_stops_on_error() {
        let ds = PairDataset::new(vec![
            VerificationPair::new(1u8, 2u8, true),
            VerificationPair::new(3u8, 0u8, false),
        ]);
        let mapped: Result<PairDataset<u8>, String> = ds.try_map(|v| {
            if *v == 0 { Err("zero".to_string()) } else { Ok(v * 2) }
        });
        assert_eq!(mapped.unwrap_err(), "zero");

        let ok: PairDataset<u16> = ds.try_map(|v| Ok::<_, ()>(*v as u16 + 1)).unwrap();
        assert_eq!(ok.pairs()[1].second, 1);
    }
}
