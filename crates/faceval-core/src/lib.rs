//! faceval-core: pairwise face verification scoring.
//!
//! Embeds both images of each verification pair, measures the distance
//! between the L2-normalized embeddings and sweeps decision thresholds for
//! the best accuracy. Includes pair-list loading and an ONNX Runtime
//! embedding provider.

pub mod embedder;
pub mod monitor;
pub mod pairs;
pub mod preprocess;
pub mod recognizer;
pub mod scorer;
pub mod threshold;
pub mod types;

pub use embedder::{BatchEmbedder, BatchFn, Embedder, Sequential};
pub use monitor::{BestRecord, ValidationMonitor, ValidationOutcome};
pub use recognizer::{ModelEndpoints, OnnxEmbedder};
pub use scorer::{Scorer, ScorerError};
pub use threshold::ThresholdRange;
pub use types::{Embedding, Evaluation, OperatingPoint, PairDataset, VerificationPair};
