//! Embedding extraction seam.
//!
//! The engine treats "face crop → embedding vector" as an opaque
//! capability behind [`EmbeddingExtractor`]; the production
//! implementation runs an ArcFace ONNX model, tests substitute a stub.

use crate::types::Embedding;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Opaque "image → embedding vector, or failure" capability.
///
/// Implementations take a pre-cropped face image and return a
/// fixed-length embedding. `&mut self` because inference sessions are
/// stateful; callers serialize access.
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError>;
}

/// ArcFace-based extractor (w600k_r50 via ONNX Runtime).
#[derive(Debug)]
pub struct ArcFaceExtractor {
    session: Session,
}

impl ArcFaceExtractor {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize a face crop to 112x112 and normalize into a NCHW tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized = if face.width() == size && face.height() == size {
            face.clone()
        } else {
            image::imageops::resize(face, size, size, FilterType::Triangle)
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    /// Extract an L2-normalized 512-dim embedding from a face crop.
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError> {
        let input = Self::preprocess(face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ExtractorError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so pairwise distances land in a stable range.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(200, 160, Rgb([128, 128, 128]));
        let tensor = ArcFaceExtractor::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = ArcFaceExtractor::preprocess(&face);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_channel_order() {
        let face = RgbImage::from_pixel(112, 112, Rgb([255, 128, 0]));
        let tensor = ArcFaceExtractor::preprocess(&face);
        assert!(tensor[[0, 0, 0, 0]] > 0.9); // R
        assert!(tensor[[0, 1, 0, 0]].abs() < 0.01); // G
        assert!(tensor[[0, 2, 0, 0]] < -0.9); // B
    }

    #[test]
    fn test_missing_model_is_startup_error() {
        let err = ArcFaceExtractor::load("/nonexistent/w600k_r50.onnx").unwrap_err();
        assert!(matches!(err, ExtractorError::ModelNotFound(_)));
    }
}
