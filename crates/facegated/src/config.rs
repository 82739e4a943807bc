use chrono::Duration;
use facegate_core::{gallery, LivenessConfig, QualityConfig};
use facegate_store::{Backend, PgConfig, StoreConfig};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
///
/// All knobs are resolved once at startup and immutable thereafter.
pub struct Config {
    /// Storage backend selection and connection settings.
    pub store: StoreConfig,
    /// Path to the persisted embedding gallery (JSON).
    pub gallery_path: PathBuf,
    /// Path to the ArcFace ONNX model file.
    pub model_path: PathBuf,
    /// Quality gate thresholds.
    pub quality: QualityConfig,
    /// Liveness heuristic settings.
    pub liveness: LivenessConfig,
    /// Match acceptance threshold (clamped to [0.3, 0.9] by the matcher).
    pub confidence_threshold: f32,
    /// Minimum seconds between two accepted check-ins per identity.
    pub cooldown: Duration,
    /// Embeddings kept per identity before FIFO eviction.
    pub max_embeddings_per_identity: usize,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let sqlite_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("facegate.db"));

        let gallery_path = std::env::var("FACEGATE_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        let model_path = std::env::var("FACEGATE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models/w600k_r50.onnx"));

        let backend = Backend::parse(
            &std::env::var("FACEGATE_DB_BACKEND").unwrap_or_else(|_| "sqlite".to_string()),
        );

        Self {
            store: StoreConfig {
                backend,
                sqlite_path,
                pg: PgConfig {
                    host: env_str("FACEGATE_PG_HOST", "localhost"),
                    port: env_u16("FACEGATE_PG_PORT", 5432),
                    user: env_str("FACEGATE_PG_USER", "postgres"),
                    password: env_str("FACEGATE_PG_PASSWORD", ""),
                    dbname: env_str("FACEGATE_PG_DBNAME", "facegate"),
                },
                write_timeout: std::time::Duration::from_secs(env_u64(
                    "FACEGATE_STORE_TIMEOUT_SECS",
                    5,
                )),
            },
            gallery_path,
            model_path,
            quality: QualityConfig {
                brightness_min: env_f64("FACEGATE_BRIGHTNESS_MIN", 50.0),
                brightness_max: env_f64("FACEGATE_BRIGHTNESS_MAX", 200.0),
                blur_min: env_f64("FACEGATE_BLUR_MIN", 100.0),
                min_face_px: env_u64("FACEGATE_MIN_FACE_PX", 100) as u32,
            },
            liveness: LivenessConfig {
                enabled: std::env::var("FACEGATE_LIVENESS_ENABLED")
                    .map(|v| v != "0")
                    .unwrap_or(true),
                ..LivenessConfig::default()
            },
            confidence_threshold: env_f32("FACEGATE_CONFIDENCE_THRESHOLD", 0.6),
            cooldown: Duration::seconds(env_u64("FACEGATE_COOLDOWN_SECS", 30) as i64),
            max_embeddings_per_identity: env_u64(
                "FACEGATE_MAX_EMBEDDINGS",
                gallery::DEFAULT_MAX_PER_IDENTITY as u64,
            ) as usize,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Parsed as u16 directly so out-of-range values fall back to the
// default instead of truncating to an unrelated port.
fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
