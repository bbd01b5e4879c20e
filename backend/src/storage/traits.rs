//! Storage abstraction for the attendance data layer.
//!
//! The domain layer talks to a [`DocumentStore`] and never to a concrete
//! backend, so the synchronized multi-writer store and the local
//! single-blob store are interchangeable. The capability set is
//! deliberately small: plain reads, a revision-checked conditional write
//! for read-modify-write edits, a union append for purely additive roster
//! changes, atomic batch writes/deletes for attendance, and live snapshot
//! subscriptions.

use async_trait::async_trait;
use shared::{AttendanceRecord, Group, GroupPatch, Student};
use thiserror::Error;
use tokio::sync::watch;

/// Maximum number of student ids the backing query mechanism accepts in a
/// single attendance lookup. Callers must chunk larger id sets.
pub const MAX_IN_QUERY_IDS: usize = 30;

/// Failures a backend can report. The domain layer re-wraps these into the
/// user-facing taxonomy; they never reach callers directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("permiso denegado por el almacén")]
    PermissionDenied,
    #[error("almacén no disponible: {0}")]
    Unavailable(String),
    #[error("conflicto de escritura concurrente")]
    Conflict,
    #[error("el documento no existe")]
    Missing,
    #[error("datos persistidos dañados: {0}")]
    Corrupt(String),
    #[error("consulta inválida: {0}")]
    InvalidQuery(String),
}

/// A group document together with the storage revision it was read at.
/// The revision is what conditional writes are checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    pub group: Group,
    pub revision: u64,
}

/// Outcome of a revision-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document still carried the expected revision; the write landed.
    Applied,
    /// Another writer got there first; re-read and retry.
    Conflict,
    /// The document vanished between read and write.
    Missing,
}

/// Identity of one attendance record: at most one record exists per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub student_id: String,
    pub date: String,
}

impl AttendanceKey {
    pub fn of(record: &AttendanceRecord) -> Self {
        Self {
            student_id: record.student_id.clone(),
            date: record.date.clone(),
        }
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        self.student_id == record.student_id && self.date == record.date
    }
}

pub type GroupsReceiver = watch::Receiver<Vec<Group>>;
pub type AttendanceReceiver = watch::Receiver<Vec<AttendanceRecord>>;

/// Per-identity document store over the `groups` and `attendance`
/// collections. All state is scoped under `owner` (the authenticated uid).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a group document with an empty roster; returns the new id.
    async fn create_group(&self, owner: &str, name: &str, grade: &str) -> Result<String, StoreError>;

    /// Apply a field patch to a group. Fails with [`StoreError::Missing`]
    /// when the document does not exist.
    async fn patch_group(&self, owner: &str, group_id: &str, patch: &GroupPatch) -> Result<(), StoreError>;

    /// Remove a group document. Removing an absent document is a no-op.
    async fn remove_group(&self, owner: &str, group_id: &str) -> Result<(), StoreError>;

    /// Read a group together with its current revision.
    async fn read_group(&self, owner: &str, group_id: &str) -> Result<Option<GroupSnapshot>, StoreError>;

    /// Union-append students to a group's roster. Safe under concurrent
    /// writers: appends from other sessions are never lost, and students
    /// whose id is already present are skipped.
    async fn append_students(&self, owner: &str, group_id: &str, students: Vec<Student>) -> Result<(), StoreError>;

    /// Replace the whole roster, but only if the document revision still
    /// matches `revision`. The conditional-write half of the transactional
    /// read-modify-write pattern.
    async fn write_students_checked(
        &self,
        owner: &str,
        group_id: &str,
        revision: u64,
        students: Vec<Student>,
    ) -> Result<WriteOutcome, StoreError>;

    /// Attendance records whose student id is in `student_ids`. At most
    /// [`MAX_IN_QUERY_IDS`] ids per call; larger sets are rejected with
    /// [`StoreError::InvalidQuery`].
    async fn find_attendance(&self, owner: &str, student_ids: &[String]) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Atomically delete the given records. Absent keys are ignored.
    async fn delete_attendance(&self, owner: &str, keys: &[AttendanceKey]) -> Result<(), StoreError>;

    /// Atomically upsert the given records keyed by `(student_id, date)`,
    /// applied in input order, so a later duplicate wins.
    async fn set_attendance(&self, owner: &str, records: &[AttendanceRecord]) -> Result<(), StoreError>;

    /// Live channel over the owner's groups collection. Seeded with the
    /// current snapshot; every emission fully replaces the slice.
    async fn subscribe_groups(&self, owner: &str) -> Result<GroupsReceiver, StoreError>;

    /// Live channel over the owner's attendance collection, same snapshot
    /// semantics as [`DocumentStore::subscribe_groups`].
    async fn subscribe_attendance(&self, owner: &str) -> Result<AttendanceReceiver, StoreError>;
}
