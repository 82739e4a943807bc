//! Enrolled-embedding gallery.
//!
//! Per-identity collections of face embeddings, bounded and
//! FIFO-evicted, with a JSON persistence file so enrollments survive
//! a process restart. Read-mostly after startup: enrollment writes are
//! serialized by the write lock, recognition reads share the read lock.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One enrolled identity: display name plus its enrollment embeddings,
/// oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

/// Thread-safe gallery of enrolled identities.
///
/// Each identity holds at most `max_per_identity` embeddings (default
/// 5). Inserting beyond the cap evicts the oldest entry first. The
/// eviction policy is purely age-based — a stale enrollment photo is
/// not preferentially dropped over a representative one; this is a
/// known limitation of the FIFO choice.
pub struct Gallery {
    max_per_identity: usize,
    identities: RwLock<HashMap<String, EnrolledIdentity>>,
}

pub const DEFAULT_MAX_PER_IDENTITY: usize = 5;

impl Gallery {
    pub fn new(max_per_identity: usize) -> Self {
        Self {
            max_per_identity: max_per_identity.max(1),
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Load a previously saved gallery.
    ///
    /// A missing or corrupt file yields an empty gallery with a
    /// warning, never an error: losing enrollments is recoverable,
    /// failing to start is not.
    pub fn load(path: &Path, max_per_identity: usize) -> Self {
        let gallery = Self::new(max_per_identity);

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no gallery file; starting empty");
                return gallery;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "gallery unreadable; starting empty");
                return gallery;
            }
        };

        match serde_json::from_slice::<HashMap<String, EnrolledIdentity>>(&data) {
            Ok(mut map) => {
                // Re-apply the cap in case it was lowered since the save.
                for identity in map.values_mut() {
                    let len = identity.embeddings.len();
                    if len > gallery.max_per_identity {
                        identity.embeddings.drain(..len - gallery.max_per_identity);
                    }
                }
                tracing::info!(
                    path = %path.display(),
                    identities = map.len(),
                    "gallery loaded"
                );
                *gallery.identities.write().unwrap() = map;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "gallery corrupt; starting empty");
            }
        }

        gallery
    }

    /// Persist the gallery as JSON, atomically (write temp, rename).
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let map = self.identities.read().unwrap();
        let data = serde_json::to_vec_pretty(&*map)?;
        drop(map);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append an embedding for an identity, evicting the oldest when
    /// the identity is already at the cap.
    pub fn enroll(&self, student_id: &str, name: &str, embedding: Embedding) {
        let mut map = self.identities.write().unwrap();
        let identity = map
            .entry(student_id.to_string())
            .or_insert_with(|| EnrolledIdentity {
                name: name.to_string(),
                embeddings: Vec::new(),
            });
        // Rename-on-enroll: the roster name is authoritative.
        identity.name = name.to_string();

        if identity.embeddings.len() >= self.max_per_identity {
            identity.embeddings.remove(0);
        }
        identity.embeddings.push(embedding);

        tracing::debug!(
            student_id,
            embeddings = identity.embeddings.len(),
            "embedding enrolled"
        );
    }

    /// Embeddings currently held for an identity, oldest first.
    pub fn embeddings_for(&self, student_id: &str) -> Option<Vec<Embedding>> {
        self.identities
            .read()
            .unwrap()
            .get(student_id)
            .map(|i| i.embeddings.clone())
    }

    /// Remove an identity and all of its embeddings.
    pub fn remove(&self, student_id: &str) -> bool {
        self.identities.write().unwrap().remove(student_id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.read().unwrap().is_empty()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.read().unwrap().len()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities
            .read()
            .unwrap()
            .values()
            .map(|i| i.embeddings.len())
            .sum()
    }

    /// Run `f` against the identity map under the read lock.
    ///
    /// Used by the matcher to scan all identities without cloning the
    /// gallery.
    pub fn with_identities<R>(&self, f: impl FnOnce(&HashMap<String, EnrolledIdentity>) -> R) -> R {
        f(&self.identities.read().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(seed: f32) -> Embedding {
        Embedding {
            values: vec![seed, seed + 0.1, seed + 0.2],
            model_version: None,
        }
    }

    #[test]
    fn test_enroll_appends_in_order() {
        let gallery = Gallery::new(5);
        gallery.enroll("S1", "Anong", emb(0.1));
        gallery.enroll("S1", "Anong", emb(0.2));

        let embeddings = gallery.embeddings_for("S1").unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].values[0], 0.1);
        assert_eq!(embeddings[1].values[0], 0.2);
    }

    #[test]
    fn test_fifo_eviction_at_cap() {
        let gallery = Gallery::new(5);
        for i in 0..6 {
            gallery.enroll("S1", "Anong", emb(i as f32));
        }

        let embeddings = gallery.embeddings_for("S1").unwrap();
        // Exactly the last 5, in enrollment order; the 1st is gone.
        assert_eq!(embeddings.len(), 5);
        assert_eq!(embeddings[0].values[0], 1.0);
        assert_eq!(embeddings[4].values[0], 5.0);
    }

    #[test]
    fn test_cap_isolated_per_identity() {
        let gallery = Gallery::new(2);
        gallery.enroll("S1", "Anong", emb(0.0));
        gallery.enroll("S1", "Anong", emb(1.0));
        gallery.enroll("S1", "Anong", emb(2.0));
        gallery.enroll("S2", "Boon", emb(9.0));

        assert_eq!(gallery.embeddings_for("S1").unwrap().len(), 2);
        assert_eq!(gallery.embeddings_for("S2").unwrap().len(), 1);
        assert_eq!(gallery.embedding_count(), 3);
    }

    #[test]
    fn test_remove_drops_identity() {
        let gallery = Gallery::new(5);
        gallery.enroll("S1", "Anong", emb(0.1));
        assert!(gallery.remove("S1"));
        assert!(!gallery.remove("S1"));
        assert!(gallery.embeddings_for("S1").is_none());
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let gallery = Gallery::new(5);
        gallery.enroll("S1", "Anong", emb(0.1));
        gallery.enroll("S2", "Boon", emb(0.5));
        gallery.save(&path).unwrap();

        let loaded = Gallery::load(&path, 5);
        assert_eq!(loaded.identity_count(), 2);
        assert_eq!(loaded.embeddings_for("S1").unwrap()[0].values[0], 0.1);
        loaded.with_identities(|map| {
            assert_eq!(map.get("S2").unwrap().name, "Boon");
        });
    }

    #[test]
    fn test_load_missing_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::load(&dir.path().join("nope.json"), 5);
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, b"{not json!").unwrap();

        let gallery = Gallery::load(&path, 5);
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_load_reapplies_lowered_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let gallery = Gallery::new(5);
        for i in 0..5 {
            gallery.enroll("S1", "Anong", emb(i as f32));
        }
        gallery.save(&path).unwrap();

        let loaded = Gallery::load(&path, 2);
        let embeddings = loaded.embeddings_for("S1").unwrap();
        // Keeps the newest 2 after the cap was lowered.
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].values[0], 3.0);
        assert_eq!(embeddings[1].values[0], 4.0);
    }
}
