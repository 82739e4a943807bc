use serde::{Deserialize, Serialize};

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Embeddings are produced unit-scaled so that Euclidean distances
/// between faces land roughly in `[0, 1]`; the matcher converts a
/// distance to a confidence score with `1 - distance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of matching a probe embedding against the enrolled gallery.
///
/// Ephemeral: produced per recognition call, never persisted.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Stable identity key of the winning student.
    pub student_id: String,
    /// Display name recorded at enrollment time.
    pub name: String,
    /// `1 - raw_distance`, clamped to `[0, 1]`.
    pub confidence: f32,
    /// Minimum Euclidean distance to any of the winner's embeddings.
    pub raw_distance: f32,
}
