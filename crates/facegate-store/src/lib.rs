//! facegate-store — backend-agnostic storage for the attendance engine.
//!
//! One [`Store`] trait, one implementation per relational backend
//! (embedded SQLite, client/server PostgreSQL). Both backends expose
//! identical observable behavior: `None` filters return all rows,
//! attendance/behavior queries come back newest first, and schema
//! creation at open is idempotent (tables created only if absent,
//! never dropped). The backend is selected once at process start;
//! backends are never mixed within one process lifetime.

pub mod postgres;
pub mod sqlite;
pub mod types;

use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use crate::postgres::PostgresStore;
pub use crate::sqlite::SqliteStore;
pub use crate::types::{
    AttendanceRecord, BehaviorRecord, NewAttendance, NewBehavior, NewStudent, Student,
    DEFAULT_ATTENDANCE_STATUS,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("invalid timestamp in row {0}: {1}")]
    InvalidTimestamp(i64, String),
}

/// Uniform CRUD surface over students, attendance, and behavior.
///
/// The recognition engine depends only on this trait; which concrete
/// backend sits behind it is deployment configuration.
pub trait Store: Send + Sync {
    fn add_student(&self, student: &NewStudent) -> Result<Student, StoreError>;
    fn get_student(&self, student_id: &str) -> Result<Option<Student>, StoreError>;
    /// All students, or only one school's when a filter is given.
    fn get_students(&self, school_id: Option<&str>) -> Result<Vec<Student>, StoreError>;
    fn delete_student(&self, student_id: &str) -> Result<(), StoreError>;

    /// Durable attendance write. Once this returns `Ok`, the event is
    /// committed regardless of any downstream fan-out outcome.
    fn add_attendance(&self, entry: &NewAttendance) -> Result<AttendanceRecord, StoreError>;
    /// Attendance rows, newest first, optionally filtered by school
    /// and/or calendar date.
    fn get_attendance(
        &self,
        school_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    fn add_behavior(&self, entry: &NewBehavior) -> Result<BehaviorRecord, StoreError>;
    /// Behavior rows, newest first. A student filter takes precedence
    /// over a school filter, matching the original accessor shape.
    fn get_behavior(
        &self,
        school_id: Option<&str>,
        student_id: Option<&str>,
    ) -> Result<Vec<BehaviorRecord>, StoreError>;
}

/// Which relational backend to deploy against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Parse a backend name; anything unrecognized falls back to
    /// SQLite, the embedded default, with a warning so a typo in the
    /// deployment config is visible at startup.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Backend::Postgres,
            "sqlite" | "" => Backend::Sqlite,
            other => {
                tracing::warn!(backend = other, "unrecognized backend name, using sqlite");
                Backend::Sqlite
            }
        }
    }
}

/// Connection settings for the PostgreSQL backend.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

/// Storage configuration, resolved once at process start.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: Backend,
    pub sqlite_path: PathBuf,
    pub pg: PgConfig,
    /// Bound on a single storage write; on timeout the event is
    /// treated as failed and the caller may retry the whole pipeline.
    pub write_timeout: Duration,
}

/// Open the configured backend and run its idempotent schema setup.
pub fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match cfg.backend {
        Backend::Sqlite => {
            tracing::info!(path = %cfg.sqlite_path.display(), "opening sqlite store");
            Ok(Arc::new(SqliteStore::open(&cfg.sqlite_path, cfg.write_timeout)?))
        }
        Backend::Postgres => {
            tracing::info!(host = %cfg.pg.host, dbname = %cfg.pg.dbname, "connecting postgres store");
            Ok(Arc::new(PostgresStore::connect(&cfg.pg, cfg.write_timeout)?))
        }
    }
}
