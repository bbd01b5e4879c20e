use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Attendance status for one student on one calendar day.
///
/// Serialized under its Spanish display name, which is also the value the
/// persisted documents carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Presente,
    Ausente,
    Tardanza,
    Justificado,
}

impl AttendanceStatus {
    /// Display label, identical to the serialized form.
    pub fn label(&self) -> &'static str {
        match self {
            AttendanceStatus::Presente => "Presente",
            AttendanceStatus::Ausente => "Ausente",
            AttendanceStatus::Tardanza => "Tardanza",
            AttendanceStatus::Justificado => "Justificado",
        }
    }
}

/// A student tracked for attendance, owned by exactly one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    /// Unique within the owning group. Format: "s<epoch_millis>-<seq>".
    pub id: String,
    pub name: String,
    /// Avatar URL or data URI; filled in when the student is created.
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Free-text notes. Absent input defaults to the empty string at
    /// construction time, never at read sites.
    #[serde(default)]
    pub observations: String,
}

/// Process-wide sequence folded into student ids so that rapid successive
/// calls never collide on wall-clock millisecond granularity.
static STUDENT_ID_SEQ: AtomicU64 = AtomicU64::new(0);

impl Student {
    pub fn new(name: impl Into<String>, photo_url: Option<String>, observations: Option<String>) -> Self {
        Self {
            id: Self::generate_id(),
            name: name.into(),
            photo_url,
            observations: observations.unwrap_or_default(),
        }
    }

    /// Generate a unique student id from epoch millis plus a monotonic
    /// sequence number.
    pub fn generate_id() -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = STUDENT_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("s{}-{}", millis, seq)
    }
}

/// A roster of students tracked together (e.g. one class).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Globally unique document id.
    pub id: String,
    pub name: String,
    /// Free-text classifier ("10mo A", "Secundaria", ...).
    pub grade: String,
    /// Insertion order is preserved; it only matters for display.
    #[serde(default)]
    pub students: Vec<Student>,
}

impl Group {
    /// Generate a new group document id.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// One student's status on one date. Weakly references its student through
/// `student_id`; at most one record exists per `(student_id, date)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    /// Calendar date in `YYYY-MM-DD` format.
    pub date: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub observations: String,
}

impl AttendanceRecord {
    /// Document key of this record in the attendance collection.
    pub fn doc_id(&self) -> String {
        format!("{}_{}", self.student_id, self.date)
    }
}

/// The entire persisted application state of one owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataState {
    pub groups: Vec<Group>,
    pub attendance: Vec<AttendanceRecord>,
}

/// Input for creating a student; id and avatar are assigned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub observations: Option<String>,
}

/// Partial group update; fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub grade: Option<String>,
}

/// Attendance percentage of one group, input to the AI summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAttendancePoint {
    pub name: String,
    pub attendance_pct: f64,
}

/// How many records carry a given status across all groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: AttendanceStatus,
    pub count: u32,
}

/// Aggregated attendance figures handed to the summary generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceAggregates {
    pub group_attendance: Vec<GroupAttendancePoint>,
    pub status_totals: Vec<StatusCount>,
    pub total_students: u32,
}

/// Structured analysis returned by the summary generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub title: String,
    pub summary_points: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Validate the `YYYY-MM-DD` date format used across attendance records.
pub fn is_valid_date(date: &str) -> bool {
    date.len() == 10 && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn student_ids_are_unique_under_rapid_calls() {
        let ids: HashSet<String> = (0..1000).map(|_| Student::generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn student_observations_default_to_empty() {
        let student = Student::new("Ana", None, None);
        assert_eq!(student.observations, "");

        let with_notes = Student::new("Ana", None, Some("llega tarde".to_string()));
        assert_eq!(with_notes.observations, "llega tarde");
    }

    #[test]
    fn attendance_status_serializes_to_spanish_labels() {
        let json = serde_json::to_string(&AttendanceStatus::Justificado).unwrap();
        assert_eq!(json, "\"Justificado\"");

        let parsed: AttendanceStatus = serde_json::from_str("\"Tardanza\"").unwrap();
        assert_eq!(parsed, AttendanceStatus::Tardanza);
        assert_eq!(parsed.label(), "Tardanza");
    }

    #[test]
    fn attendance_doc_id_combines_student_and_date() {
        let record = AttendanceRecord {
            student_id: "s1".to_string(),
            date: "2024-05-20".to_string(),
            status: AttendanceStatus::Presente,
            observations: String::new(),
        };
        assert_eq!(record.doc_id(), "s1_2024-05-20");
    }

    #[test]
    fn date_validation_rejects_malformed_input() {
        assert!(is_valid_date("2024-05-20"));
        assert!(is_valid_date("2024-02-29"));
        assert!(!is_valid_date("2023-02-29"));
        assert!(!is_valid_date("20-05-2024"));
        assert!(!is_valid_date("2024-5-2"));
        assert!(!is_valid_date("2024-13-01"));
        assert!(!is_valid_date(""));
    }

    #[test]
    fn data_state_round_trips_through_json() {
        let state = DataState {
            groups: vec![Group {
                id: Group::generate_id(),
                name: "Biología".to_string(),
                grade: "10mo".to_string(),
                students: vec![Student::new("Ana", Some("https://example/a.png".into()), None)],
            }],
            attendance: vec![AttendanceRecord {
                student_id: "s1".to_string(),
                date: "2024-05-20".to_string(),
                status: AttendanceStatus::Ausente,
                observations: "viaje".to_string(),
            }],
        };

        let json = serde_json::to_string(&state).unwrap();
        let restored: DataState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
