//! Verification pair lists.
//!
//! A pair list is a text file with one pair per line:
//!
//! ```text
//! # path_a                path_b                 label
//! alice/001.jpg           alice/002.jpg          1
//! alice/001.jpg           bob/004.jpg            0
//! ```
//!
//! Labels accept `1`/`0`, `true`/`false` and `same`/`diff`. Blank lines and
//! `#` comments are ignored. Relative paths are resolved against the
//! directory holding the list file.

use crate::preprocess::{self, PreprocessError};
use crate::types::{PairDataset, VerificationPair};
use ndarray::Array3;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PairsError {
    #[error("failed to read pair list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected `<path_a> <path_b> <label>`, got {fields} field(s)")]
    FieldCount { line: usize, fields: usize },
    #[error("line {line}: unrecognized label {label:?}")]
    Label { line: usize, label: String },
    #[error("pair list contains no pairs")]
    Empty,
    #[error(transparent)]
    Image(#[from] PreprocessError),
}

/// Parse pair list text. `base` is prepended to relative paths.
pub fn parse_pairs(text: &str, base: &Path) -> Result<PairDataset<PathBuf>, PairsError> {
    let mut pairs = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        let [a, b, label] = fields.as_slice() else {
            return Err(PairsError::FieldCount {
                line,
                fields: fields.len(),
            });
        };

        let is_same = parse_label(label).ok_or_else(|| PairsError::Label {
            line,
            label: label.to_string(),
        })?;

        pairs.push(VerificationPair::new(base.join(a), base.join(b), is_same));
    }

    if pairs.is_empty() {
        return Err(PairsError::Empty);
    }
    Ok(PairDataset::new(pairs))
}

/// Read and parse a pair list file.
pub fn load_pairs(path: &Path) -> Result<PairDataset<PathBuf>, PairsError> {
    let text = std::fs::read_to_string(path).map_err(|source| PairsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let dataset = parse_pairs(&text, base)?;

    tracing::info!(
        path = %path.display(),
        pairs = dataset.len(),
        same = dataset.same_count(),
        "loaded pair list"
    );
    Ok(dataset)
}

fn parse_label(label: &str) -> Option<bool> {
    match label.to_ascii_lowercase().as_str() {
        "1" | "true" | "same" => Some(true),
        "0" | "false" | "diff" | "different" => Some(false),
        _ => None,
    }
}

impl PairDataset<PathBuf> {
    /// Decode and normalize every image once so the dataset can be reused
    /// across evaluation cycles without touching the filesystem again.
    pub fn load_images(&self, size: u32) -> Result<PairDataset<Array3<f32>>, PairsError> {
        let decoded = self.try_map(|path| preprocess::load_tensor(path, size))?;
        tracing::debug!(pairs = decoded.len(), size, "decoded pair images");
        Ok(decoded)
    }
}
