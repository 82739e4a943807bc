//! Embedded SQLite backend.
//!
//! Single-file deployment variant. Timestamps are stored as RFC 3339
//! text, which keeps `ORDER BY timestamp DESC` and per-day prefix
//! filtering correct without any SQLite date functions.

use crate::types::{
    AttendanceRecord, BehaviorRecord, NewAttendance, NewBehavior, NewStudent, Student,
};
use crate::{Store, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if absent) the database file and ensure the
    /// schema exists.
    pub fn open(path: &Path, write_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(conn, write_timeout)
    }

    /// In-memory database, used by tests and demos.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, write_timeout: Duration) -> Result<Self, StoreError> {
        // Bounded write timeout: a held lock fails the write instead
        // of stalling the recognition pipeline.
        conn.busy_timeout(write_timeout)?;
        create_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

/// Idempotent schema creation: tables are created only if absent,
/// never dropped or altered.
fn create_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS students (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             student_id TEXT UNIQUE NOT NULL,
             name TEXT NOT NULL,
             class_name TEXT,
             school_id TEXT,
             image_path TEXT,
             created_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS attendance (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             student_id TEXT NOT NULL,
             student_name TEXT,
             school_id TEXT,
             camera_type TEXT,
             timestamp TEXT NOT NULL,
             status TEXT DEFAULT 'present'
         );
         CREATE TABLE IF NOT EXISTS behavior (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             student_id TEXT NOT NULL,
             student_name TEXT,
             school_id TEXT,
             behavior TEXT,
             severity TEXT,
             timestamp TEXT NOT NULL
         );",
    )
}

fn parse_ts(id: i64, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(id, raw.to_string()))
}

fn student_from_row(row: &Row<'_>) -> Result<(i64, String, Student), rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let raw_ts: String = row.get(6)?;
    let student = Student {
        id,
        student_id: row.get(1)?,
        name: row.get(2)?,
        class_name: row.get(3)?,
        school_id: row.get(4)?,
        image_path: row.get(5)?,
        created_at: Utc::now(), // replaced by caller after timestamp parse
    };
    Ok((id, raw_ts, student))
}

fn finish_student((id, raw_ts, mut student): (i64, String, Student)) -> Result<Student, StoreError> {
    student.created_at = parse_ts(id, &raw_ts)?;
    Ok(student)
}

impl Store for SqliteStore {
    fn add_student(&self, student: &NewStudent) -> Result<Student, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO students (student_id, name, class_name, school_id, image_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student.student_id,
                student.name,
                student.class_name,
                student.school_id,
                student.image_path,
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Student {
            id,
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            class_name: student.class_name.clone(),
            school_id: student.school_id.clone(),
            image_path: student.image_path.clone(),
            created_at: now,
        })
    }

    fn get_student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, student_id, name, class_name, school_id, image_path, created_at
             FROM students WHERE student_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![student_id], student_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(finish_student(row?)?)),
            None => Ok(None),
        }
    }

    fn get_students(&self, school_id: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let (sql, filter): (&str, Vec<&dyn rusqlite::ToSql>) = match school_id {
            Some(ref school) => (
                "SELECT id, student_id, name, class_name, school_id, image_path, created_at
                 FROM students WHERE school_id = ?1",
                vec![school],
            ),
            None => (
                "SELECT id, student_id, name, class_name, school_id, image_path, created_at
                 FROM students",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(&filter[..], student_from_row)?;
        rows.map(|r| finish_student(r?)).collect()
    }

    fn delete_student(&self, student_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM students WHERE student_id = ?1", params![student_id])?;
        Ok(())
    }

    fn add_attendance(&self, entry: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO attendance (student_id, student_name, school_id, camera_type, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.student_id,
                entry.student_name,
                entry.school_id,
                entry.camera_type,
                entry.timestamp.to_rfc3339(),
                entry.status,
            ],
        )?;
        Ok(AttendanceRecord {
            id: conn.last_insert_rowid(),
            student_id: entry.student_id.clone(),
            student_name: entry.student_name.clone(),
            school_id: entry.school_id.clone(),
            camera_type: entry.camera_type.clone(),
            timestamp: entry.timestamp,
            status: entry.status.clone(),
        })
    }

    fn get_attendance(
        &self,
        school_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let day = date.map(|d| d.format("%Y-%m-%d").to_string());

        let (sql, filter): (&str, Vec<&dyn rusqlite::ToSql>) = match (&school_id, &day) {
            (Some(school), Some(day)) => (
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance WHERE school_id = ?1 AND substr(timestamp, 1, 10) = ?2
                 ORDER BY timestamp DESC",
                vec![school, day],
            ),
            (Some(school), None) => (
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance WHERE school_id = ?1 ORDER BY timestamp DESC",
                vec![school],
            ),
            (None, Some(day)) => (
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance WHERE substr(timestamp, 1, 10) = ?1 ORDER BY timestamp DESC",
                vec![day],
            ),
            (None, None) => (
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance ORDER BY timestamp DESC",
                vec![],
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(&filter[..], |row| {
            let id: i64 = row.get(0)?;
            let raw_ts: String = row.get(5)?;
            Ok((id, raw_ts, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?, row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(6)?))
        })?;

        rows.map(|r| {
            let (id, raw_ts, student_id, student_name, school_id, camera_type, status) = r?;
            Ok(AttendanceRecord {
                id,
                student_id,
                student_name: student_name.unwrap_or_default(),
                school_id: school_id.unwrap_or_default(),
                camera_type: camera_type.unwrap_or_default(),
                timestamp: parse_ts(id, &raw_ts)?,
                status: status.unwrap_or_else(|| "present".to_string()),
            })
        })
        .collect()
    }

    fn add_behavior(&self, entry: &NewBehavior) -> Result<BehaviorRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO behavior (student_id, student_name, school_id, behavior, severity, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.student_id,
                entry.student_name,
                entry.school_id,
                entry.behavior,
                entry.severity,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(BehaviorRecord {
            id: conn.last_insert_rowid(),
            student_id: entry.student_id.clone(),
            student_name: entry.student_name.clone(),
            school_id: entry.school_id.clone(),
            behavior: entry.behavior.clone(),
            severity: entry.severity.clone(),
            timestamp: entry.timestamp,
        })
    }

    fn get_behavior(
        &self,
        school_id: Option<&str>,
        student_id: Option<&str>,
    ) -> Result<Vec<BehaviorRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        // Student filter takes precedence over school filter.
        let (sql, filter): (&str, Vec<&dyn rusqlite::ToSql>) = match (&student_id, &school_id) {
            (Some(student), _) => (
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior WHERE student_id = ?1 ORDER BY timestamp DESC",
                vec![student],
            ),
            (None, Some(school)) => (
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior WHERE school_id = ?1 ORDER BY timestamp DESC",
                vec![school],
            ),
            (None, None) => (
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior ORDER BY timestamp DESC",
                vec![],
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(&filter[..], |row| {
            let id: i64 = row.get(0)?;
            let raw_ts: String = row.get(6)?;
            Ok((id, raw_ts, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?, row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?))
        })?;

        rows.map(|r| {
            let (id, raw_ts, student_id, student_name, school_id, behavior, severity) = r?;
            Ok(BehaviorRecord {
                id,
                student_id,
                student_name: student_name.unwrap_or_default(),
                school_id: school_id.unwrap_or_default(),
                behavior: behavior.unwrap_or_default(),
                severity: severity.unwrap_or_else(|| "normal".to_string()),
                timestamp: parse_ts(id, &raw_ts)?,
            })
        })
        .collect()
    }
}
