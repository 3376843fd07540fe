//! Image decoding and normalization into model input tensors.
//!
//! Faces are resized to the model's square input size and each channel
//! value `p` is mapped to `(p - 127.5) / 128`, giving roughly [-1, 1].

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array3, Array4, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 0.0078125; // 1 / 128

/// Decoded, normalized HWC image.
pub type ImageTensor = Array3<f32>;

/// Default square input side for the ResNet50 backbones.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("input size must be non-zero")]
    ZeroSize,
    #[error("cannot batch tensors of shape {expected:?} and {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("cannot build an empty batch")]
    EmptyBatch,
}

/// Memory layout expected by the model input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Batch, height, width, channel (TensorFlow / Keras exports).
    #[default]
    Nhwc,
    /// Batch, channel, height, width.
    Nchw,
}

/// Resize an RGB image to `size`×`size` and normalize it into an HWC tensor.
pub fn to_tensor(img: &DynamicImage, size: u32) -> Result<ImageTensor, PreprocessError> {
    if size == 0 {
        return Err(PreprocessError::ZeroSize);
    }
    let rgb = img
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let mut tensor = Array3::<f32>::zeros((side, side, 3));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[y as usize, x as usize, c]] = normalize_pixel(pixel[c]);
        }
    }
    Ok(tensor)
}

/// Decode an image file and convert it with [`to_tensor`].
pub fn load_tensor(path: &Path, size: u32) -> Result<ImageTensor, PreprocessError> {
    let img = image::open(path).map_err(|source| PreprocessError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    to_tensor(&img, size)
}

fn normalize_pixel(p: u8) -> f32 {
    (p as f32 - PIXEL_MEAN) * PIXEL_SCALE
}

/// Stack HWC tensors into one 4-D batch in the requested layout.
pub fn stack_batch(
    images: &[ArrayView3<'_, f32>],
    layout: TensorLayout,
) -> Result<Array4<f32>, PreprocessError> {
    let first = images.first().ok_or(PreprocessError::EmptyBatch)?;
    let (h, w, c) = first.dim();

    let mut batch = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((images.len(), h, w, c)),
        TensorLayout::Nchw => Array4::<f32>::zeros((images.len(), c, h, w)),
    };

    for (i, img) in images.iter().enumerate() {
        if img.dim() != (h, w, c) {
            return Err(PreprocessError::ShapeMismatch {
                expected: vec![h, w, c],
                actual: img.shape().to_vec(),
            });
        }
        let mut slot = batch.index_axis_mut(Axis(0), i);
        match layout {
            TensorLayout::Nhwc => slot.assign(img),
            TensorLayout::Nchw => slot.assign(&img.view().permuted_axes([2, 0, 1])),
        }
    }

    Ok(batch)
}
