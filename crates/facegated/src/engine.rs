//! Recognition and check-in engine.
//!
//! Orchestrates the full pipeline for one captured face crop:
//! quality gate → liveness heuristic → embedding extraction →
//! nearest-neighbor match → cooldown gate → durable attendance write →
//! fire-and-forget fan-out.
//!
//! The engine is an explicitly owned component shared behind an `Arc`
//! between every caller path (request handlers, a camera-polling
//! loop), so all of them see one authoritative cooldown map and one
//! gallery. Everything up to the attendance write is synchronous
//! CPU-bound work; only the storage write touches I/O, and the fan-out
//! is decoupled behind a channel.

use crate::fanout::CheckinEvent;
use chrono::{DateTime, Utc};
use facegate_core::extractor::ExtractorError;
use facegate_core::gallery::GalleryError;
use facegate_core::{
    cooldown::CheckinDecision, CooldownGate, EmbeddingExtractor, Gallery, LivenessConfig,
    NearestMatcher, QualityConfig, QualityReject, SpoofReject,
};
use facegate_store::{AttendanceRecord, NewAttendance, Store, StoreError};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a capture did not produce (or augment) an identity.
///
/// The first three are recoverable input problems the caller should
/// surface for immediate re-capture; `NoMatch` is a normal negative
/// outcome; `Storage` is the only hard failure — the attendance event
/// was lost and the caller decides whether to retry from capture.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Quality(#[from] QualityReject),
    #[error("{0}")]
    Spoof(#[from] SpoofReject),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face not recognized")]
    NoMatch,
    #[error("unknown student: {0}")]
    UnknownStudent(String),
    #[error("extractor: {0}")]
    Extractor(ExtractorError),
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("gallery persistence: {0}")]
    Gallery(#[from] GalleryError),
}

impl From<ExtractorError> for EngineError {
    fn from(e: ExtractorError) -> Self {
        match e {
            // "No face" is a normal negative outcome, not an
            // inference failure.
            ExtractorError::NoFaceDetected => EngineError::NoFaceDetected,
            other => EngineError::Extractor(other),
        }
    }
}

/// Outcome of a successful recognition.
#[derive(Debug, Clone)]
pub enum CheckinOutcome {
    /// Attendance was durably recorded and fan-out dispatched.
    Recorded {
        student_id: String,
        name: String,
        confidence: f32,
        record: AttendanceRecord,
    },
    /// The face was recognized but the check-in was deduplicated by
    /// the cooldown window. Success-adjacent: distinguishable from
    /// every non-recognition outcome for UI and telemetry.
    Suppressed {
        student_id: String,
        name: String,
        confidence: f32,
    },
}

/// Engine construction parameters (init-time only, immutable after).
pub struct EngineConfig {
    pub quality: QualityConfig,
    pub liveness: LivenessConfig,
    pub confidence_threshold: f32,
    pub cooldown: chrono::Duration,
    pub max_embeddings_per_identity: usize,
    pub gallery_path: PathBuf,
}

pub struct Engine {
    quality: QualityConfig,
    liveness: LivenessConfig,
    matcher: NearestMatcher,
    gallery: Gallery,
    gallery_path: PathBuf,
    cooldown: CooldownGate,
    // Inference sessions are stateful; recognition calls serialize on
    // this lock while matching and cooldown stay concurrent.
    extractor: Mutex<Box<dyn EmbeddingExtractor>>,
    store: Arc<dyn Store>,
    events: mpsc::UnboundedSender<CheckinEvent>,
}

impl Engine {
    /// Build the engine, loading any previously persisted gallery.
    pub fn new(
        cfg: EngineConfig,
        extractor: Box<dyn EmbeddingExtractor>,
        store: Arc<dyn Store>,
        events: mpsc::UnboundedSender<CheckinEvent>,
    ) -> Self {
        let gallery = Gallery::load(&cfg.gallery_path, cfg.max_embeddings_per_identity);
        tracing::info!(
            identities = gallery.identity_count(),
            embeddings = gallery.embedding_count(),
            threshold = cfg.confidence_threshold,
            cooldown_secs = cfg.cooldown.num_seconds(),
            "engine ready"
        );

        Self {
            quality: cfg.quality,
            liveness: cfg.liveness,
            matcher: NearestMatcher::new(cfg.confidence_threshold),
            gallery,
            gallery_path: cfg.gallery_path,
            cooldown: CooldownGate::new(cfg.cooldown),
            extractor: Mutex::new(extractor),
            store,
            events,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Persist the gallery to its configured path.
    pub fn persist_gallery(&self) -> Result<(), GalleryError> {
        self.gallery.save(&self.gallery_path)
    }

    /// Enroll one face image for a rostered student.
    ///
    /// Runs the same quality and liveness gates as recognition so a
    /// bad enrollment photo cannot poison the gallery, then appends
    /// the embedding (FIFO-evicting at the cap) and persists the
    /// gallery file.
    pub fn enroll_face(
        &self,
        student_id: &str,
        name: &str,
        image: &RgbImage,
    ) -> Result<(), EngineError> {
        // The roster is authoritative: enrollment requires an existing
        // student row.
        if self.store.get_student(student_id)?.is_none() {
            return Err(EngineError::UnknownStudent(student_id.to_string()));
        }

        facegate_core::quality::assess(image, &self.quality)?;
        facegate_core::liveness::assess(image, &self.liveness)?;

        let embedding = self.extractor.lock().unwrap().extract(image)?;
        self.gallery.enroll(student_id, name, embedding);
        self.persist_gallery()?;

        tracing::info!(
            student_id,
            embeddings = self.gallery.embeddings_for(student_id).map_or(0, |e| e.len()),
            "face enrolled"
        );
        Ok(())
    }

    /// Run the full recognition-and-check-in pipeline for one capture.
    ///
    /// The attendance write is the durability boundary: once this
    /// returns `Recorded`, the event is final even if the caller has
    /// gone away. Fan-out failures never surface here.
    pub fn recognize_and_checkin(
        &self,
        image: &RgbImage,
        school_id: &str,
        camera_type: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckinOutcome, EngineError> {
        facegate_core::quality::assess(image, &self.quality)?;
        facegate_core::liveness::assess(image, &self.liveness)?;

        let embedding = self.extractor.lock().unwrap().extract(image)?;

        let matched = self
            .matcher
            .recognize(&self.gallery, &embedding)
            .ok_or(EngineError::NoMatch)?;

        match self.cooldown.try_checkin(&matched.student_id, now) {
            CheckinDecision::Suppressed => {
                tracing::debug!(
                    student_id = %matched.student_id,
                    confidence = matched.confidence,
                    "check-in suppressed by cooldown"
                );
                Ok(CheckinOutcome::Suppressed {
                    student_id: matched.student_id,
                    name: matched.name,
                    confidence: matched.confidence,
                })
            }
            CheckinDecision::Accepted => {
                let entry = NewAttendance::present(
                    &matched.student_id,
                    &matched.name,
                    school_id,
                    camera_type,
                    now,
                );
                let record = match self.store.add_attendance(&entry) {
                    Ok(record) => record,
                    Err(e) => {
                        // The event is lost; reopen the window so the
                        // caller's re-capture is not suppressed.
                        self.cooldown.revert(&matched.student_id, now);
                        return Err(e.into());
                    }
                };

                tracing::info!(
                    student_id = %matched.student_id,
                    name = %matched.name,
                    confidence = matched.confidence,
                    school_id,
                    camera_type,
                    "attendance recorded"
                );

                // At-most-once fan-out; a closed channel only loses
                // the notification, never the committed write.
                let event = CheckinEvent {
                    student_id: matched.student_id.clone(),
                    name: matched.name.clone(),
                    camera_type: camera_type.to_string(),
                    timestamp: now,
                };
                if self.events.send(event).is_err() {
                    tracing::warn!(
                        student_id = %matched.student_id,
                        "fan-out channel closed; check-in event dropped"
                    );
                }

                Ok(CheckinOutcome::Recorded {
                    student_id: matched.student_id,
                    name: matched.name,
                    confidence: matched.confidence,
                    record,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use facegate_core::Embedding;
    use facegate_store::{NewStudent, SqliteStore};
    use image::Rgb;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Extractor stub: embeds an image as its three channel means.
    /// Near-identical frames produce near-identical embeddings;
    /// differently colored faces land far apart.
    struct StubExtractor;

    impl EmbeddingExtractor for StubExtractor {
        fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError> {
            let n = (face.width() * face.height()) as f32;
            let mut sums = [0.0f32; 3];
            for p in face.pixels() {
                for c in 0..3 {
                    sums[c] += p.0[c] as f32;
                }
            }
            Ok(Embedding {
                values: sums.iter().map(|s| s / n / 128.0).collect(),
                model_version: None,
            })
        }
    }

    /// Store wrapper that can be told to fail the next attendance write.
    struct FlakyStore {
        inner: SqliteStore,
        fail_writes: AtomicBool,
    }

    impl Store for FlakyStore {
        fn add_student(&self, s: &NewStudent) -> Result<facegate_store::Student, StoreError> {
            self.inner.add_student(s)
        }
        fn get_student(&self, id: &str) -> Result<Option<facegate_store::Student>, StoreError> {
            self.inner.get_student(id)
        }
        fn get_students(
            &self,
            school: Option<&str>,
        ) -> Result<Vec<facegate_store::Student>, StoreError> {
            self.inner.get_students(school)
        }
        fn delete_student(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete_student(id)
        }
        fn add_attendance(&self, e: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::InvalidTimestamp(0, "simulated outage".into()));
            }
            self.inner.add_attendance(e)
        }
        fn get_attendance(
            &self,
            school: Option<&str>,
            date: Option<chrono::NaiveDate>,
        ) -> Result<Vec<AttendanceRecord>, StoreError> {
            self.inner.get_attendance(school, date)
        }
        fn add_behavior(
            &self,
            e: &facegate_store::NewBehavior,
        ) -> Result<facegate_store::BehaviorRecord, StoreError> {
            self.inner.add_behavior(e)
        }
        fn get_behavior(
            &self,
            school: Option<&str>,
            student: Option<&str>,
        ) -> Result<Vec<facegate_store::BehaviorRecord>, StoreError> {
            self.inner.get_behavior(school, student)
        }
    }

    /// Face of student `base`: textured, well lit, channel means far
    /// enough apart to pass the liveness color check. `jitter` nudges
    /// the texture phase to simulate consecutive camera frames.
    fn face(base: [u8; 3], jitter: u32) -> RgbImage {
        RgbImage::from_fn(128, 128, |x, y| {
            let n = ((x * 31 + y * 17 + jitter) % 97) as u8;
            Rgb([base[0] + n, base[1] + n, base[2] + n])
        })
    }

    fn s1_face(jitter: u32) -> RgbImage {
        face([60, 100, 140], jitter)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    struct Harness {
        engine: Engine,
        store: Arc<FlakyStore>,
        events: mpsc::UnboundedReceiver<CheckinEvent>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        store
            .add_student(&NewStudent {
                student_id: "S1".to_string(),
                name: "Anong".to_string(),
                class_name: Some("P.5/1".to_string()),
                school_id: Some("SCH001".to_string()),
                image_path: None,
            })
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            EngineConfig {
                quality: QualityConfig::default(),
                liveness: LivenessConfig::default(),
                confidence_threshold: 0.6,
                cooldown: Duration::seconds(30),
                max_embeddings_per_identity: 5,
                gallery_path: dir.path().join("gallery.json"),
            },
            Box::new(StubExtractor),
            Arc::clone(&store) as Arc<dyn Store>,
            tx,
        );

        Harness { engine, store, events: rx, _dir: dir }
    }

    #[test]
    fn test_enroll_requires_rostered_student() {
        let h = harness();
        let err = h.engine.enroll_face("GHOST", "Nobody", &s1_face(0)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStudent(_)));
        assert!(h.engine.gallery().is_empty());
    }

    #[test]
    fn test_enroll_rejects_poor_quality() {
        let h = harness();
        let dark = RgbImage::from_pixel(128, 128, Rgb([20, 20, 20]));
        let err = h.engine.enroll_face("S1", "Anong", &dark).unwrap_err();
        assert_eq!(err.to_string(), "poor lighting conditions");
    }

    #[test]
    fn test_enroll_rejects_spoof() {
        let h = harness();
        // Textured but monochrome: passes quality, trips liveness.
        let gray = RgbImage::from_fn(128, 128, |x, y| {
            let n = 80 + ((x * 31 + y * 17) % 97) as u8;
            Rgb([n, n, n])
        });
        let err = h.engine.enroll_face("S1", "Anong", &gray).unwrap_err();
        assert_eq!(err.to_string(), "suspicious color distribution");
    }

    #[test]
    fn test_checkin_with_empty_gallery_is_no_match() {
        let h = harness();
        let err = h
            .engine
            .recognize_and_checkin(&s1_face(0), "SCH001", "gate_in", t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::NoMatch));
    }

    #[test]
    fn test_unenrolled_face_is_no_match() {
        let h = harness();
        h.engine.enroll_face("S1", "Anong", &s1_face(0)).unwrap();

        // Opposite channel ordering: far from S1 in embedding space.
        let stranger = face([140, 100, 60], 0);
        let err = h
            .engine
            .recognize_and_checkin(&stranger, "SCH001", "gate_in", t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::NoMatch));
    }

    #[test]
    fn test_end_to_end_checkin_cooldown_cycle() {
        let mut h = harness();
        h.engine.enroll_face("S1", "Anong", &s1_face(0)).unwrap();
        h.engine.enroll_face("S1", "Anong", &s1_face(3)).unwrap();

        // First sighting: recorded.
        let outcome = h
            .engine
            .recognize_and_checkin(&s1_face(1), "SCH001", "gate_in", t0())
            .unwrap();
        let CheckinOutcome::Recorded { student_id, name, confidence, record } = outcome else {
            panic!("expected Recorded");
        };
        assert_eq!(student_id, "S1");
        assert_eq!(name, "Anong");
        assert!(confidence > 0.6, "confidence {confidence}");
        assert_eq!(record.school_id, "SCH001");
        assert_eq!(record.status, "present");

        // Next frame one second later: deduplicated, still identified.
        let outcome = h
            .engine
            .recognize_and_checkin(&s1_face(2), "SCH001", "gate_in", t0() + Duration::seconds(1))
            .unwrap();
        assert!(matches!(
            outcome,
            CheckinOutcome::Suppressed { ref student_id, .. } if student_id == "S1"
        ));

        // After the window: recorded again.
        let outcome = h
            .engine
            .recognize_and_checkin(&s1_face(1), "SCH001", "gate_in", t0() + Duration::seconds(31))
            .unwrap();
        assert!(matches!(outcome, CheckinOutcome::Recorded { .. }));

        // Exactly two durable rows for S1, and exactly two events.
        let rows = h.store.get_attendance(Some("SCH001"), None).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.student_id == "S1"));
        assert_eq!(h.events.try_recv().unwrap().student_id, "S1");
        assert_eq!(h.events.try_recv().unwrap().student_id, "S1");
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_storage_failure_is_hard_and_reopens_cooldown() {
        let mut h = harness();
        h.engine.enroll_face("S1", "Anong", &s1_face(0)).unwrap();
        h.store.fail_writes.store(true, Ordering::SeqCst);

        let err = h
            .engine
            .recognize_and_checkin(&s1_face(1), "SCH001", "gate_in", t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        // No row, no event.
        assert!(h.store.get_attendance(None, None).unwrap().is_empty());
        assert!(h.events.try_recv().is_err());

        // Backend recovers: an immediate re-capture succeeds instead
        // of being suppressed by the failed attempt's stamp.
        h.store.fail_writes.store(false, Ordering::SeqCst);
        let outcome = h
            .engine
            .recognize_and_checkin(&s1_face(1), "SCH001", "gate_in", t0() + Duration::seconds(2))
            .unwrap();
        assert!(matches!(outcome, CheckinOutcome::Recorded { .. }));
    }

    #[test]
    fn test_closed_fanout_channel_does_not_fail_checkin() {
        let mut h = harness();
        h.engine.enroll_face("S1", "Anong", &s1_face(0)).unwrap();
        h.events.close();

        let outcome = h
            .engine
            .recognize_and_checkin(&s1_face(1), "SCH001", "gate_in", t0())
            .unwrap();
        assert!(matches!(outcome, CheckinOutcome::Recorded { .. }));
        assert_eq!(h.store.get_attendance(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_gallery_survives_restart() {
        let h = harness();
        h.engine.enroll_face("S1", "Anong", &s1_face(0)).unwrap();
        let path = h._dir.path().join("gallery.json");

        let reloaded = Gallery::load(&path, 5);
        assert_eq!(reloaded.identity_count(), 1);
        assert_eq!(reloaded.embeddings_for("S1").unwrap().len(), 1);
    }
}
