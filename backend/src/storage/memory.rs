//! In-memory document store with real multi-writer semantics.
//!
//! Stands in for the hosted, synchronized document database: documents
//! carry revisions so conditional writes genuinely conflict, union appends
//! never drop a concurrent append, attendance lookups enforce the backing
//! query's id cap, and every mutation publishes a fresh snapshot to
//! subscribers. Tests run against this backend to exercise the
//! concurrency contracts the local blob store cannot.

use async_trait::async_trait;
use shared::{AttendanceRecord, Group, GroupPatch, Student};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::storage::traits::{
    AttendanceKey, AttendanceReceiver, DocumentStore, GroupSnapshot, GroupsReceiver, StoreError,
    WriteOutcome, MAX_IN_QUERY_IDS,
};

#[derive(Debug, Clone)]
struct GroupDoc {
    group: Group,
    revision: u64,
}

struct OwnerState {
    groups: Vec<GroupDoc>,
    attendance: Vec<AttendanceRecord>,
    groups_tx: watch::Sender<Vec<Group>>,
    attendance_tx: watch::Sender<Vec<AttendanceRecord>>,
}

impl OwnerState {
    fn new() -> Self {
        let (groups_tx, _) = watch::channel(Vec::new());
        let (attendance_tx, _) = watch::channel(Vec::new());
        Self {
            groups: Vec::new(),
            attendance: Vec::new(),
            groups_tx,
            attendance_tx,
        }
    }

    fn publish_groups(&self) {
        let snapshot: Vec<Group> = self.groups.iter().map(|doc| doc.group.clone()).collect();
        self.groups_tx.send_replace(snapshot);
    }

    fn publish_attendance(&self) {
        self.attendance_tx.send_replace(self.attendance.clone());
    }
}

pub struct MemoryStore {
    owners: Mutex<HashMap<String, OwnerState>>,
    attendance_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
            attendance_queries: AtomicUsize::new(0),
        }
    }

    /// Initialize the store from validated connection parameters. Building
    /// a [`SyncConfig`] is the only path here, so missing parameters have
    /// already prevented initialization with a descriptive error.
    pub fn connect(config: &SyncConfig) -> Self {
        info!(project = %config.project_id, "conectando con el almacén de documentos");
        Self::new()
    }

    /// Number of attendance lookups issued so far. Diagnostic counter used
    /// to verify query batching behavior.
    pub fn attendance_query_count(&self) -> usize {
        self.attendance_queries.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_group(&self, owner: &str, name: &str, grade: &str) -> Result<String, StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let group = Group {
            id: Group::generate_id(),
            name: name.to_string(),
            grade: grade.to_string(),
            students: Vec::new(),
        };
        let id = group.id.clone();
        state.groups.push(GroupDoc { group, revision: 1 });
        state.publish_groups();
        Ok(id)
    }

    async fn patch_group(&self, owner: &str, group_id: &str, patch: &GroupPatch) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let doc = state
            .groups
            .iter_mut()
            .find(|doc| doc.group.id == group_id)
            .ok_or(StoreError::Missing)?;

        if let Some(name) = &patch.name {
            doc.group.name = name.clone();
        }
        if let Some(grade) = &patch.grade {
            doc.group.grade = grade.clone();
        }
        doc.revision += 1;
        state.publish_groups();
        Ok(())
    }

    async fn remove_group(&self, owner: &str, group_id: &str) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let before = state.groups.len();
        state.groups.retain(|doc| doc.group.id != group_id);
        if state.groups.len() != before {
            state.publish_groups();
        }
        Ok(())
    }

    async fn read_group(&self, owner: &str, group_id: &str) -> Result<Option<GroupSnapshot>, StoreError> {
        let owners = self.owners.lock().await;
        let Some(state) = owners.get(owner) else {
            return Ok(None);
        };
        Ok(state
            .groups
            .iter()
            .find(|doc| doc.group.id == group_id)
            .map(|doc| GroupSnapshot {
                group: doc.group.clone(),
                revision: doc.revision,
            }))
    }

    async fn append_students(&self, owner: &str, group_id: &str, students: Vec<Student>) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let doc = state
            .groups
            .iter_mut()
            .find(|doc| doc.group.id == group_id)
            .ok_or(StoreError::Missing)?;

        let existing: HashSet<String> = doc.group.students.iter().map(|s| s.id.clone()).collect();
        for student in students {
            if !existing.contains(&student.id) {
                doc.group.students.push(student);
            }
        }
        doc.revision += 1;
        state.publish_groups();
        Ok(())
    }

    async fn write_students_checked(
        &self,
        owner: &str,
        group_id: &str,
        revision: u64,
        students: Vec<Student>,
    ) -> Result<WriteOutcome, StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let Some(doc) = state.groups.iter_mut().find(|doc| doc.group.id == group_id) else {
            return Ok(WriteOutcome::Missing);
        };
        if doc.revision != revision {
            debug!(group = group_id, expected = revision, actual = doc.revision, "revisión desactualizada");
            return Ok(WriteOutcome::Conflict);
        }

        doc.group.students = students;
        doc.revision += 1;
        state.publish_groups();
        Ok(WriteOutcome::Applied)
    }

    async fn find_attendance(&self, owner: &str, student_ids: &[String]) -> Result<Vec<AttendanceRecord>, StoreError> {
        if student_ids.len() > MAX_IN_QUERY_IDS {
            return Err(StoreError::InvalidQuery(format!(
                "demasiados ids en una consulta: {} (máximo {})",
                student_ids.len(),
                MAX_IN_QUERY_IDS
            )));
        }
        self.attendance_queries.fetch_add(1, Ordering::SeqCst);

        let owners = self.owners.lock().await;
        let Some(state) = owners.get(owner) else {
            return Ok(Vec::new());
        };
        let wanted: HashSet<&str> = student_ids.iter().map(|id| id.as_str()).collect();
        Ok(state
            .attendance
            .iter()
            .filter(|record| wanted.contains(record.student_id.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_attendance(&self, owner: &str, keys: &[AttendanceKey]) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        let before = state.attendance.len();
        state
            .attendance
            .retain(|record| !keys.iter().any(|key| key.matches(record)));
        if state.attendance.len() != before {
            state.publish_attendance();
        }
        Ok(())
    }

    async fn set_attendance(&self, owner: &str, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);

        for record in records {
            match state
                .attendance
                .iter_mut()
                .find(|existing| existing.student_id == record.student_id && existing.date == record.date)
            {
                Some(existing) => *existing = record.clone(),
                None => state.attendance.push(record.clone()),
            }
        }
        state.publish_attendance();
        Ok(())
    }

    async fn subscribe_groups(&self, owner: &str) -> Result<GroupsReceiver, StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);
        state.publish_groups();
        Ok(state.groups_tx.subscribe())
    }

    async fn subscribe_attendance(&self, owner: &str) -> Result<AttendanceReceiver, StoreError> {
        let mut owners = self.owners.lock().await;
        let state = owners.entry(owner.to_string()).or_insert_with(OwnerState::new);
        state.publish_attendance();
        Ok(state.attendance_tx.subscribe())
    }
}
