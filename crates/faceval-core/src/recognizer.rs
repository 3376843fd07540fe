//! Embedding model via ONNX Runtime.
//!
//! The model graph is addressed through an explicit [`ModelEndpoints`]
//! description rather than by guessing tensor names, so an exported
//! checkpoint either matches the expected interface or fails at load time.

use crate::embedder::{BatchEmbedder, Embedder};
use crate::preprocess::{self, PreprocessError, TensorLayout, DEFAULT_INPUT_SIZE};
use crate::types::Embedding;
use ndarray::{Array3, ArrayView3};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Endpoint description versions this build understands.
pub const SUPPORTED_ENDPOINTS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("unsupported endpoint description version {0}")]
    UnsupportedVersion(u32),
    #[error("model has no {kind} named {name:?} (available: {available:?})")]
    MissingEndpoint {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Named input/output endpoints of an exported embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEndpoints {
    pub version: u32,
    /// Name of the image input tensor.
    pub input: String,
    /// Name of the embedding output tensor.
    pub output: String,
    pub layout: TensorLayout,
    /// Square input side in pixels.
    pub input_size: u32,
}

impl Default for ModelEndpoints {
    fn default() -> Self {
        Self {
            version: SUPPORTED_ENDPOINTS_VERSION,
            input: "input_images".to_string(),
            output: "embedding".to_string(),
            layout: TensorLayout::Nhwc,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

fn require_endpoint(
    kind: &'static str,
    wanted: &str,
    available: &[String],
) -> Result<(), RecognizerError> {
    if available.iter().any(|n| n == wanted) {
        Ok(())
    } else {
        Err(RecognizerError::MissingEndpoint {
            kind,
            name: wanted.to_string(),
            available: available.to_vec(),
        })
    }
}

/// Split a `[batch, dim]` (or flattened) output buffer into one vector per image.
fn split_rows(shape: &[i64], data: &[f32], batch: usize) -> Result<Vec<Vec<f32>>, RecognizerError> {
    if batch == 0 || data.len() % batch != 0 {
        return Err(RecognizerError::InferenceFailed(format!(
            "output of {} values (shape {shape:?}) does not split into {batch} embeddings",
            data.len()
        )));
    }
    if let Some(&rows) = shape.first() {
        if rows >= 0 && rows as usize != batch {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {batch} embeddings, model returned shape {shape:?}"
            )));
        }
    }
    let dim = data.len() / batch;
    Ok(data.chunks_exact(dim).map(|row| row.to_vec()).collect())
}

/// Embedding model loaded from an ONNX file.
pub struct OnnxEmbedder {
    session: Session,
    endpoints: ModelEndpoints,
    model_version: String,
}

impl OnnxEmbedder {
    /// Load the model and verify it exposes the requested endpoints.
    pub fn load(model_path: &Path, endpoints: ModelEndpoints) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_path_buf()));
        }
        if endpoints.version != SUPPORTED_ENDPOINTS_VERSION {
            return Err(RecognizerError::UnsupportedVersion(endpoints.version));
        }
        if endpoints.input_size == 0 {
            return Err(PreprocessError::ZeroSize.into());
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        require_endpoint("input", &endpoints.input, &inputs)?;
        require_endpoint("output", &endpoints.output, &outputs)?;

        let model_version = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::info!(
            path = %model_path.display(),
            ?inputs,
            ?outputs,
            layout = ?endpoints.layout,
            input_size = endpoints.input_size,
            "loaded embedding model"
        );

        Ok(Self {
            session,
            endpoints,
            model_version,
        })
    }

    pub fn endpoints(&self) -> &ModelEndpoints {
        &self.endpoints
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Decode an image file and embed it. The result is not normalized.
    pub fn embed_file(&mut self, path: &Path) -> Result<Embedding, RecognizerError> {
        let tensor = preprocess::load_tensor(path, self.endpoints.input_size)?;
        let mut rows = self.run(&[tensor.view()])?;
        let values = rows.pop().ok_or_else(|| {
            RecognizerError::InferenceFailed("model returned no embedding".to_string())
        })?;
        Ok(Embedding {
            values,
            model_version: Some(self.model_version.clone()),
        })
    }

    fn run(&mut self, images: &[ArrayView3<'_, f32>]) -> Result<Vec<Vec<f32>>, RecognizerError> {
        let batch = preprocess::stack_batch(images, self.endpoints.layout)?;

        let outputs = self.session.run(ort::inputs![
            self.endpoints.input.as_str() => TensorRef::from_array_view(batch.view())?
        ])?;

        let (shape, data) = outputs[self.endpoints.output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        split_rows(shape, data, images.len())
    }
}

impl Embedder<Array3<f32>> for OnnxEmbedder {
    type Error = RecognizerError;

    fn embed(&mut self, image: &Array3<f32>) -> Result<Vec<f32>, RecognizerError> {
        let mut rows = self.run(&[image.view()])?;
        rows.pop().ok_or_else(|| {
            RecognizerError::InferenceFailed("model returned no embedding".to_string())
        })
    }
}

impl BatchEmbedder<Array3<f32>> for OnnxEmbedder {
    type Error = RecognizerError;

    fn embed_batch(&mut self, images: &[&Array3<f32>]) -> Result<Vec<Vec<f32>>, RecognizerError> {
        let views: Vec<ArrayView3<'_, f32>> = images.iter().map(|img| img.view()).collect();
        self.run(&views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let e = ModelEndpoints::default();
        assert_eq!(e.version, SUPPORTED_ENDPOINTS_VERSION);
        assert_eq!(e.layout, TensorLayout::Nhwc);
        assert_eq!(e.input_size, 224);
    }

    #[test]
    fn test_endpoints_deserialize_partial() {
        let e: ModelEndpoints =
            serde_json::from_str(r#"{"output": "gdc/embedding", "layout": "nchw", "input_size": 112}"#)
                .unwrap();
        assert_eq!(e.input, "input_images");
        assert_eq!(e.output, "gdc/embedding");
        assert_eq!(e.layout, TensorLayout::Nchw);
        assert_eq!(e.input_size, 112);
    }

    #[test]
    fn test_require_endpoint() {
        let names = vec!["input_images".to_string(), "is_training".to_string()];
        assert!(require_endpoint("input", "input_images", &names).is_ok());
        let err = require_endpoint("input", "images", &names).unwrap_err();
        match err {
            RecognizerError::MissingEndpoint { kind, name, available } => {
                assert_eq!(kind, "input");
                assert_eq!(name, "images");
                assert_eq!(available.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_split_rows() {
        let data: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let rows = split_rows(&[2, 3], &data, 2).unwrap();
        assert_eq!(rows, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);

        assert!(split_rows(&[3, 2], &data, 2).is_err());
        assert!(split_rows(&[6], &data[..5], 2).is_err());
        assert!(split_rows(&[0], &[], 0).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load(Path::new("/nonexistent/model.onnx"), ModelEndpoints::default())
            .err()
            .unwrap();
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}
