//! Client/server PostgreSQL backend.
//!
//! Deployed variant for multi-host installations. Observable behavior
//! is contract-identical to the SQLite backend: same filters, same
//! newest-first ordering, same idempotent schema setup.

use crate::types::{
    AttendanceRecord, BehaviorRecord, NewAttendance, NewBehavior, NewStudent, Student,
};
use crate::{PgConfig, Store, StoreError};
use chrono::{NaiveDate, Utc};
use ::postgres::types::ToSql;
use ::postgres::{Client, NoTls, Row};
use std::sync::Mutex;
use std::time::Duration;

pub struct PostgresStore {
    client: Mutex<Client>,
}

/// Connection parameters with the write bound applied twice over:
/// `connect_timeout` covers connection establishment only, so a
/// server-side `statement_timeout` bounds each statement as well. A
/// stalled write then fails with a `StoreError` instead of wedging the
/// client mutex for every later storage call.
fn client_config(cfg: &PgConfig, write_timeout: Duration) -> ::postgres::Config {
    let mut pg = ::postgres::Config::new();
    pg.host(&cfg.host)
        .port(cfg.port)
        .user(&cfg.user)
        .password(&cfg.password)
        .dbname(&cfg.dbname)
        .connect_timeout(write_timeout)
        .options(&format!("-c statement_timeout={}", write_timeout.as_millis()));
    pg
}

impl PostgresStore {
    /// Connect and ensure the schema exists.
    pub fn connect(cfg: &PgConfig, write_timeout: Duration) -> Result<Self, StoreError> {
        let client = client_config(cfg, write_timeout).connect(NoTls)?;

        let store = Self { client: Mutex::new(client) };
        store.create_schema()?;
        Ok(store)
    }

    /// Idempotent schema creation, mirroring the SQLite layout.
    fn create_schema(&self) -> Result<(), StoreError> {
        self.client.lock().unwrap().batch_execute(
            "CREATE TABLE IF NOT EXISTS students (
                 id BIGSERIAL PRIMARY KEY,
                 student_id VARCHAR(50) UNIQUE NOT NULL,
                 name VARCHAR(200) NOT NULL,
                 class_name VARCHAR(50),
                 school_id VARCHAR(50),
                 image_path TEXT,
                 created_at TIMESTAMPTZ NOT NULL
             );
             CREATE TABLE IF NOT EXISTS attendance (
                 id BIGSERIAL PRIMARY KEY,
                 student_id VARCHAR(50) NOT NULL,
                 student_name VARCHAR(200),
                 school_id VARCHAR(50),
                 camera_type VARCHAR(50),
                 timestamp TIMESTAMPTZ NOT NULL,
                 status VARCHAR(20) DEFAULT 'present'
             );
             CREATE TABLE IF NOT EXISTS behavior (
                 id BIGSERIAL PRIMARY KEY,
                 student_id VARCHAR(50) NOT NULL,
                 student_name VARCHAR(200),
                 school_id VARCHAR(50),
                 behavior TEXT,
                 severity VARCHAR(20),
                 timestamp TIMESTAMPTZ NOT NULL
             );",
        )?;
        Ok(())
    }
}

fn student_from_row(row: &Row) -> Student {
    Student {
        id: row.get(0),
        student_id: row.get(1),
        name: row.get(2),
        class_name: row.get(3),
        school_id: row.get(4),
        image_path: row.get(5),
        created_at: row.get(6),
    }
}

fn attendance_from_row(row: &Row) -> AttendanceRecord {
    AttendanceRecord {
        id: row.get(0),
        student_id: row.get(1),
        student_name: row.get::<_, Option<String>>(2).unwrap_or_default(),
        school_id: row.get::<_, Option<String>>(3).unwrap_or_default(),
        camera_type: row.get::<_, Option<String>>(4).unwrap_or_default(),
        timestamp: row.get(5),
        status: row
            .get::<_, Option<String>>(6)
            .unwrap_or_else(|| "present".to_string()),
    }
}

fn behavior_from_row(row: &Row) -> BehaviorRecord {
    BehaviorRecord {
        id: row.get(0),
        student_id: row.get(1),
        student_name: row.get::<_, Option<String>>(2).unwrap_or_default(),
        school_id: row.get::<_, Option<String>>(3).unwrap_or_default(),
        behavior: row.get::<_, Option<String>>(4).unwrap_or_default(),
        severity: row
            .get::<_, Option<String>>(5)
            .unwrap_or_else(|| "normal".to_string()),
        timestamp: row.get(6),
    }
}

impl Store for PostgresStore {
    fn add_student(&self, student: &NewStudent) -> Result<Student, StoreError> {
        let now = Utc::now();
        let row = self.client.lock().unwrap().query_one(
            "INSERT INTO students (student_id, name, class_name, school_id, image_path, created_at)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &student.student_id,
                &student.name,
                &student.class_name,
                &student.school_id,
                &student.image_path,
                &now,
            ],
        )?;
        Ok(Student {
            id: row.get(0),
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            class_name: student.class_name.clone(),
            school_id: student.school_id.clone(),
            image_path: student.image_path.clone(),
            created_at: now,
        })
    }

    fn get_student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        let row = self.client.lock().unwrap().query_opt(
            "SELECT id, student_id, name, class_name, school_id, image_path, created_at
             FROM students WHERE student_id = $1",
            &[&student_id],
        )?;
        Ok(row.as_ref().map(student_from_row))
    }

    fn get_students(&self, school_id: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let mut client = self.client.lock().unwrap();
        let rows = match school_id {
            Some(school) => client.query(
                "SELECT id, student_id, name, class_name, school_id, image_path, created_at
                 FROM students WHERE school_id = $1",
                &[&school],
            )?,
            None => client.query(
                "SELECT id, student_id, name, class_name, school_id, image_path, created_at
                 FROM students",
                &[],
            )?,
        };
        Ok(rows.iter().map(student_from_row).collect())
    }

    fn delete_student(&self, student_id: &str) -> Result<(), StoreError> {
        self.client
            .lock()
            .unwrap()
            .execute("DELETE FROM students WHERE student_id = $1", &[&student_id])?;
        Ok(())
    }

    fn add_attendance(&self, entry: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let row = self.client.lock().unwrap().query_one(
            "INSERT INTO attendance (student_id, student_name, school_id, camera_type, timestamp, status)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &entry.student_id,
                &entry.student_name,
                &entry.school_id,
                &entry.camera_type,
                &entry.timestamp,
                &entry.status,
            ],
        )?;
        Ok(AttendanceRecord {
            id: row.get(0),
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
        let mut client = self.client.lock().unwrap();
        let rows = match (school_id, date) {
            (Some(school), Some(day)) => {
                let params: &[&(dyn ToSql + Sync)] = &[&school, &day];
                client.query(
                    "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                     FROM attendance
                     WHERE school_id = $1 AND (timestamp AT TIME ZONE 'UTC')::date = $2
                     ORDER BY timestamp DESC",
                    params,
                )?
            }
            (Some(school), None) => client.query(
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance WHERE school_id = $1 ORDER BY timestamp DESC",
                &[&school],
            )?,
            (None, Some(day)) => client.query(
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance WHERE (timestamp AT TIME ZONE 'UTC')::date = $1
                 ORDER BY timestamp DESC",
                &[&day],
            )?,
            (None, None) => client.query(
                "SELECT id, student_id, student_name, school_id, camera_type, timestamp, status
                 FROM attendance ORDER BY timestamp DESC",
                &[],
            )?,
        };
        Ok(rows.iter().map(attendance_from_row).collect())
    }

    fn add_behavior(&self, entry: &NewBehavior) -> Result<BehaviorRecord, StoreError> {
        let row = self.client.lock().unwrap().query_one(
            "INSERT INTO behavior (student_id, student_name, school_id, behavior, severity, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &entry.student_id,
                &entry.student_name,
                &entry.school_id,
                &entry.behavior,
                &entry.severity,
                &entry.timestamp,
            ],
        )?;
        Ok(BehaviorRecord {
            id: row.get(0),
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
        let mut client = self.client.lock().unwrap();
        // Student filter takes precedence over school filter.
        let rows = match (student_id, school_id) {
            (Some(student), _) => client.query(
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior WHERE student_id = $1 ORDER BY timestamp DESC",
                &[&student],
            )?,
            (None, Some(school)) => client.query(
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior WHERE school_id = $1 ORDER BY timestamp DESC",
                &[&school],
            )?,
            (None, None) => client.query(
                "SELECT id, student_id, student_name, school_id, behavior, severity, timestamp
                 FROM behavior ORDER BY timestamp DESC",
                &[],
            )?,
        };
        Ok(rows.iter().map(behavior_from_row).collect())
    }
}
