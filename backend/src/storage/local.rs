//! Local-persistence backend: one serialized blob per owner.
//!
//! The whole [`DataState`] lives in a single JSON file that is restored on
//! first access and rewritten after every mutation. This store is the sole
//! writer of its files, so the revision-checked write never actually
//! conflicts; revisions are tracked in memory only to satisfy the trait.
//! Mutations are applied to a working copy and committed to memory only
//! after the rewrite succeeds, so a failed write leaves no partial state
//! behind.

use async_trait::async_trait;
use shared::{AttendanceRecord, DataState, Group, GroupPatch, Student};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::storage::traits::{
    AttendanceKey, AttendanceReceiver, DocumentStore, GroupSnapshot, GroupsReceiver, StoreError,
    WriteOutcome, MAX_IN_QUERY_IDS,
};

const DEFAULT_DIR_NAME: &str = "Asistencia Pro";

struct OwnerState {
    state: DataState,
    revisions: HashMap<String, u64>,
    groups_tx: watch::Sender<Vec<Group>>,
    attendance_tx: watch::Sender<Vec<AttendanceRecord>>,
}

impl OwnerState {
    fn new(state: DataState) -> Self {
        let (groups_tx, _) = watch::channel(state.groups.clone());
        let (attendance_tx, _) = watch::channel(state.attendance.clone());
        let revisions = state.groups.iter().map(|g| (g.id.clone(), 1)).collect();
        Self {
            state,
            revisions,
            groups_tx,
            attendance_tx,
        }
    }

    fn publish_groups(&self) {
        self.groups_tx.send_replace(self.state.groups.clone());
    }

    fn publish_attendance(&self) {
        self.attendance_tx.send_replace(self.state.attendance.clone());
    }

    fn bump_revision(&mut self, group_id: &str) {
        *self.revisions.entry(group_id.to_string()).or_insert(1) += 1;
    }
}

/// File-backed [`DocumentStore`] for devices without a remote store.
pub struct LocalStore {
    base_dir: PathBuf,
    owners: Mutex<HashMap<String, OwnerState>>,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_dir,
            owners: Mutex::new(HashMap::new()),
        })
    }

    /// Open the store in the default per-user data directory
    /// (`~/Documents/Asistencia Pro`).
    pub fn new_default() -> Result<Self, StoreError> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| StoreError::Unavailable("no se pudo determinar el directorio del usuario".to_string()))?;
        let data_dir = PathBuf::from(home).join("Documents").join(DEFAULT_DIR_NAME);
        info!(dir = %data_dir.display(), "abriendo almacén local");
        Self::new(data_dir)
    }

    fn data_file(&self, owner: &str) -> PathBuf {
        self.base_dir.join(format!("{owner}.json"))
    }

    fn restore_owner(&self, owner: &str) -> Result<OwnerState, StoreError> {
        let path = self.data_file(owner);
        let state = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?
        } else {
            debug!(owner, "sin datos previos, comenzando con estado vacío");
            DataState::default()
        };
        Ok(OwnerState::new(state))
    }

    fn persist(&self, owner: &str, state: &DataState) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(self.data_file(owner), raw).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Look up (restoring from disk on first access) the cached state of one
/// owner inside an already-locked owner map.
macro_rules! owner_entry {
    ($self:ident, $owners:ident, $owner:ident) => {
        match $owners.entry($owner.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => slot.insert($self.restore_owner($owner)?),
        }
    };
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn create_group(&self, owner: &str, name: &str, grade: &str) -> Result<String, StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let group = Group {
            id: Group::generate_id(),
            name: name.to_string(),
            grade: grade.to_string(),
            students: Vec::new(),
        };
        let id = group.id.clone();

        let mut next = cached.state.clone();
        next.groups.push(group);
        self.persist(owner, &next)?;

        cached.state = next;
        cached.revisions.insert(id.clone(), 1);
        cached.publish_groups();
        Ok(id)
    }

    async fn patch_group(&self, owner: &str, group_id: &str, patch: &GroupPatch) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        let group = next
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or(StoreError::Missing)?;
        if let Some(name) = &patch.name {
            group.name = name.clone();
        }
        if let Some(grade) = &patch.grade {
            group.grade = grade.clone();
        }
        self.persist(owner, &next)?;

        cached.state = next;
        cached.bump_revision(group_id);
        cached.publish_groups();
        Ok(())
    }

    async fn remove_group(&self, owner: &str, group_id: &str) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        let before = next.groups.len();
        next.groups.retain(|g| g.id != group_id);
        if next.groups.len() == before {
            return Ok(());
        }
        self.persist(owner, &next)?;

        cached.state = next;
        cached.revisions.remove(group_id);
        cached.publish_groups();
        Ok(())
    }

    async fn read_group(&self, owner: &str, group_id: &str) -> Result<Option<GroupSnapshot>, StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        Ok(cached.state.groups.iter().find(|g| g.id == group_id).map(|group| GroupSnapshot {
            group: group.clone(),
            revision: cached.revisions.get(group_id).copied().unwrap_or(1),
        }))
    }

    async fn append_students(&self, owner: &str, group_id: &str, students: Vec<Student>) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        let group = next
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or(StoreError::Missing)?;
        let existing: HashSet<String> = group.students.iter().map(|s| s.id.clone()).collect();
        for student in students {
            if !existing.contains(&student.id) {
                group.students.push(student);
            }
        }
        self.persist(owner, &next)?;

        cached.state = next;
        cached.bump_revision(group_id);
        cached.publish_groups();
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
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        let Some(group) = next.groups.iter_mut().find(|g| g.id == group_id) else {
            return Ok(WriteOutcome::Missing);
        };
        // Sole writer: stale revisions only occur through caller bugs.
        if cached.revisions.get(group_id).copied().unwrap_or(1) != revision {
            return Ok(WriteOutcome::Conflict);
        }

        group.students = students;
        self.persist(owner, &next)?;

        cached.state = next;
        cached.bump_revision(group_id);
        cached.publish_groups();
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

        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);
        let wanted: HashSet<&str> = student_ids.iter().map(|id| id.as_str()).collect();
        Ok(cached
            .state
            .attendance
            .iter()
            .filter(|record| wanted.contains(record.student_id.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_attendance(&self, owner: &str, keys: &[AttendanceKey]) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        let before = next.attendance.len();
        next.attendance.retain(|record| !keys.iter().any(|key| key.matches(record)));
        if next.attendance.len() == before {
            return Ok(());
        }
        self.persist(owner, &next)?;

        cached.state = next;
        cached.publish_attendance();
        Ok(())
    }

    async fn set_attendance(&self, owner: &str, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);

        let mut next = cached.state.clone();
        for record in records {
            match next
                .attendance
                .iter_mut()
                .find(|existing| existing.student_id == record.student_id && existing.date == record.date)
            {
                Some(existing) => *existing = record.clone(),
                None => next.attendance.push(record.clone()),
            }
        }
        self.persist(owner, &next)?;

        cached.state = next;
        cached.publish_attendance();
        Ok(())
    }

    async fn subscribe_groups(&self, owner: &str) -> Result<GroupsReceiver, StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);
        cached.publish_groups();
        Ok(cached.groups_tx.subscribe())
    }

    async fn subscribe_attendance(&self, owner: &str) -> Result<AttendanceReceiver, StoreError> {
        let mut owners = self.owners.lock().await;
        let cached = owner_entry!(self, owners, owner);
        cached.publish_attendance();
        Ok(cached.attendance_tx.subscribe())
    }
}
