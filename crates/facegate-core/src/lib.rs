//! facegate-core — face-based identity recognition and check-in engine.
//!
//! The pipeline components that turn a captured face crop into a
//! confirmed, deduplicated attendance decision: quality gating,
//! a coarse liveness heuristic, the enrolled-embedding gallery,
//! nearest-neighbor matching, and the per-identity cooldown gate.
//! Embedding extraction runs behind the [`extractor::EmbeddingExtractor`]
//! seam (ArcFace via ONNX Runtime in production).

pub mod cooldown;
pub mod extractor;
pub mod gallery;
pub mod liveness;
pub mod matcher;
pub mod quality;
pub mod types;

pub use cooldown::{CheckinDecision, CooldownGate};
pub use extractor::{ArcFaceExtractor, EmbeddingExtractor, ExtractorError};
pub use gallery::{EnrolledIdentity, Gallery};
pub use liveness::{LivenessConfig, SpoofReject};
pub use matcher::NearestMatcher;
pub use quality::{QualityConfig, QualityReject};
pub use types::{Embedding, MatchResult};
