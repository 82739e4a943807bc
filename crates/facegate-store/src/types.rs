use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attendance status stored when none is supplied.
pub const DEFAULT_ATTENDANCE_STATUS: &str = "present";

/// A student roster row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub school_id: Option<String>,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to enroll a student in the roster.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub school_id: Option<String>,
    pub image_path: Option<String>,
}

/// A durable attendance row. Created once per accepted check-in,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub student_name: String,
    pub school_id: String,
    pub camera_type: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

/// Fields for one attendance write.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: String,
    pub student_name: String,
    pub school_id: String,
    pub camera_type: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

impl NewAttendance {
    pub fn present(
        student_id: &str,
        student_name: &str,
        school_id: &str,
        camera_type: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            school_id: school_id.to_string(),
            camera_type: camera_type.to_string(),
            timestamp,
            status: DEFAULT_ATTENDANCE_STATUS.to_string(),
        }
    }
}

/// A behavior incident row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorRecord {
    pub id: i64,
    pub student_id: String,
    pub student_name: String,
    pub school_id: String,
    pub behavior: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields for one behavior write.
#[derive(Debug, Clone)]
pub struct NewBehavior {
    pub student_id: String,
    pub student_name: String,
    pub school_id: String,
    pub behavior: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}
