//! The data store: owns the in-memory view of groups and attendance and
//! every mutation over the backing document store.
//!
//! Operations are optimistic-UI-free: they fully persist before resolving,
//! and the in-memory view only changes through the snapshot subscriptions.
//! Every operation rejects up front when no identity is established and
//! re-wraps backing-store failures into the user-facing taxonomy.

use shared::{AttendanceAggregates, AttendanceRecord, AttendanceSummary, DataState, GroupPatch, NewStudent, Student};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthService, AuthUser, IdentityState};
use crate::domain::avatar_service::AvatarGenerator;
use crate::errors::{describe_store_failure, DataError};
use crate::storage::{AttendanceKey, DocumentStore, WriteOutcome, MAX_IN_QUERY_IDS};

/// Bound on read-modify-write retries before the conflict is surfaced.
const MAX_TXN_RETRIES: u32 = 5;
const TXN_BACKOFF_BASE_MS: u64 = 20;

struct SyncTasks {
    groups: JoinHandle<()>,
    attendance: JoinHandle<()>,
}

pub struct DataService {
    store: Arc<dyn DocumentStore>,
    avatars: Arc<dyn AvatarGenerator>,
    auth: Arc<AuthService>,
    state: Arc<RwLock<DataState>>,
    loading: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    sync: Mutex<Option<SyncTasks>>,
}

impl DataService {
    pub fn new(store: Arc<dyn DocumentStore>, avatars: Arc<dyn AvatarGenerator>, auth: Arc<AuthService>) -> Self {
        Self {
            store,
            avatars,
            auth,
            state: Arc::new(RwLock::new(DataState::default())),
            loading: Arc::new(AtomicBool::new(true)),
            error: Arc::new(Mutex::new(None)),
            sync: Mutex::new(None),
        }
    }

    /// Current in-memory view. Replaced wholesale by snapshot emissions,
    /// never patched by the mutation operations themselves.
    pub fn state(&self) -> DataState {
        self.state.read().unwrap().clone()
    }

    /// True from identity establishment until the first groups snapshot.
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// React to identity changes: open both collection subscriptions when an
    /// identity is established, tear them down and reset state when it is
    /// cleared. Runs until the auth service is dropped.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut identity_rx = service.auth.subscribe();
        tokio::spawn(async move {
            loop {
                let identity = identity_rx.borrow_and_update().clone();
                match identity {
                    IdentityState::SignedIn(user) => service.open_subscriptions(&user.uid).await,
                    IdentityState::SignedOut => service.close_subscriptions(),
                    IdentityState::Unresolved => {}
                }
                if identity_rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn open_subscriptions(&self, uid: &str) {
        self.close_subscriptions();
        self.loading.store(true, Ordering::SeqCst);
        *self.error.lock().unwrap() = None;

        let groups_rx = match self.store.subscribe_groups(uid).await {
            Ok(rx) => rx,
            Err(err) => {
                warn!(error = %err, "no se pudo abrir la suscripción de grupos");
                *self.error.lock().unwrap() = Some("No se pudieron cargar los grupos.".to_string());
                self.loading.store(false, Ordering::SeqCst);
                return;
            }
        };
        let attendance_rx = match self.store.subscribe_attendance(uid).await {
            Ok(rx) => rx,
            Err(err) => {
                warn!(error = %err, "no se pudo abrir la suscripción de asistencia");
                *self.error.lock().unwrap() =
                    Some("No se pudieron cargar los registros de asistencia.".to_string());
                self.loading.store(false, Ordering::SeqCst);
                return;
            }
        };

        let state = Arc::clone(&self.state);
        let loading = Arc::clone(&self.loading);
        let groups_task = tokio::spawn(async move {
            let mut rx = groups_rx;
            loop {
                let snapshot = rx.borrow_and_update().clone();
                {
                    state.write().unwrap().groups = snapshot;
                }
                loading.store(false, Ordering::SeqCst);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let state = Arc::clone(&self.state);
        let attendance_task = tokio::spawn(async move {
            let mut rx = attendance_rx;
            loop {
                let snapshot = rx.borrow_and_update().clone();
                {
                    state.write().unwrap().attendance = snapshot;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        *self.sync.lock().unwrap() = Some(SyncTasks {
            groups: groups_task,
            attendance: attendance_task,
        });
    }

    fn close_subscriptions(&self) {
        if let Some(tasks) = self.sync.lock().unwrap().take() {
            tasks.groups.abort();
            tasks.attendance.abort();
        }
        *self.state.write().unwrap() = DataState::default();
        self.loading.store(false, Ordering::SeqCst);
    }

    fn require_user(&self) -> Result<AuthUser, DataError> {
        self.auth
            .current_user()
            .ok_or_else(|| DataError::Auth("Usuario no autenticado.".to_string()))
    }

    /// Create a group with an empty roster; returns the new id.
    pub async fn add_group(&self, name: &str, grade: &str) -> Result<String, DataError> {
        let user = self.require_user()?;
        let name = name.trim();
        let grade = grade.trim();
        if name.is_empty() {
            return Err(DataError::Validation("El nombre del grupo no puede estar vacío.".to_string()));
        }
        if grade.is_empty() {
            return Err(DataError::Validation("El grado del grupo no puede estar vacío.".to_string()));
        }

        info!(group = name, "creando grupo");
        self.store
            .create_group(&user.uid, name, grade)
            .await
            .map_err(|e| describe_store_failure("crear el grupo", &e))
    }

    /// In-place field update; fields left unset in the patch are untouched.
    pub async fn edit_group(&self, group_id: &str, patch: GroupPatch) -> Result<(), DataError> {
        let user = self.require_user()?;
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DataError::Validation("El nombre del grupo no puede estar vacío.".to_string()));
            }
        }
        if let Some(grade) = &patch.grade {
            if grade.trim().is_empty() {
                return Err(DataError::Validation("El grado del grupo no puede estar vacío.".to_string()));
            }
        }

        self.store
            .patch_group(&user.uid, group_id, &patch)
            .await
            .map_err(|e| describe_store_failure("editar el grupo", &e))
    }

    /// Cascade delete: the group's attendance goes first, chunked so each
    /// lookup stays under the backing query's id cap and each chunk removed
    /// in one atomic batch, then the group document itself. Deleting an
    /// absent group is a no-op. A failure mid-cascade surfaces as a single
    /// error; already-committed batches are not retried.
    pub async fn delete_group(&self, group_id: &str) -> Result<(), DataError> {
        let user = self.require_user()?;
        let operation = "eliminar el grupo y su asistencia";

        let snapshot = self
            .store
            .read_group(&user.uid, group_id)
            .await
            .map_err(|e| describe_store_failure(operation, &e))?;
        let Some(snapshot) = snapshot else {
            debug!(group = group_id, "el grupo ya no existe, nada que eliminar");
            return Ok(());
        };

        let student_ids: Vec<String> = snapshot.group.students.iter().map(|s| s.id.clone()).collect();
        info!(group = group_id, students = student_ids.len(), "eliminando grupo");

        for chunk in student_ids.chunks(MAX_IN_QUERY_IDS) {
            let matches = self
                .store
                .find_attendance(&user.uid, chunk)
                .await
                .map_err(|e| describe_store_failure(operation, &e))?;
            if matches.is_empty() {
                continue;
            }
            let keys: Vec<AttendanceKey> = matches.iter().map(AttendanceKey::of).collect();
            self.store
                .delete_attendance(&user.uid, &keys)
                .await
                .map_err(|e| describe_store_failure(operation, &e))?;
        }

        self.store
            .remove_group(&user.uid, group_id)
            .await
            .map_err(|e| describe_store_failure(operation, &e))
    }

    /// Create a student with a freshly generated id and avatar and append it
    /// to the group's roster with union semantics.
    pub async fn add_student(&self, group_id: &str, new_student: NewStudent) -> Result<Student, DataError> {
        let user = self.require_user()?;
        let name = new_student.name.trim().to_string();
        if name.is_empty() {
            return Err(DataError::Validation("El nombre del estudiante no puede estar vacío.".to_string()));
        }

        let photo_url = self.avatars.generate_avatar(&name).await;
        let student = Student {
            id: Student::generate_id(),
            name,
            photo_url: Some(photo_url),
            observations: new_student.observations.unwrap_or_default(),
        };

        self.store
            .append_students(&user.uid, group_id, vec![student.clone()])
            .await
            .map_err(|e| describe_store_failure("añadir el estudiante", &e))?;
        Ok(student)
    }

    /// Transactional read-modify-write: replace the matching student by id,
    /// retried with growing backoff while other writers interleave.
    pub async fn edit_student(&self, group_id: &str, updated: Student) -> Result<(), DataError> {
        let user = self.require_user()?;
        self.rewrite_roster(&user.uid, group_id, "editar el estudiante", move |students| {
            students
                .iter()
                .map(|s| if s.id == updated.id { updated.clone() } else { s.clone() })
                .collect()
        })
        .await
    }

    /// Delete the student's attendance in one atomic batch, then remove the
    /// student from the roster via the checked read-modify-write.
    pub async fn delete_student(&self, group_id: &str, student_id: &str) -> Result<(), DataError> {
        let user = self.require_user()?;
        let operation = "eliminar el estudiante";

        let matches = self
            .store
            .find_attendance(&user.uid, &[student_id.to_string()])
            .await
            .map_err(|e| describe_store_failure(operation, &e))?;
        if !matches.is_empty() {
            let keys: Vec<AttendanceKey> = matches.iter().map(AttendanceKey::of).collect();
            self.store
                .delete_attendance(&user.uid, &keys)
                .await
                .map_err(|e| describe_store_failure(operation, &e))?;
        }

        let student_id = student_id.to_string();
        self.rewrite_roster(&user.uid, group_id, operation, move |students| {
            students.iter().filter(|s| s.id != student_id).cloned().collect()
        })
        .await
    }

    /// Union the given students into the roster. Purely additive, so no
    /// transaction is needed; empty input is a no-op.
    pub async fn add_students_bulk(&self, group_id: &str, students: Vec<Student>) -> Result<(), DataError> {
        let user = self.require_user()?;
        if students.is_empty() {
            return Ok(());
        }

        info!(group = group_id, count = students.len(), "importando estudiantes");
        self.store
            .append_students(&user.uid, group_id, students)
            .await
            .map_err(|e| describe_store_failure("importar los estudiantes", &e))
    }

    /// Upsert each record keyed by `(student_id, date)` in one atomic batch;
    /// the later duplicate in the input wins.
    pub async fn set_attendance(&self, records: Vec<AttendanceRecord>) -> Result<(), DataError> {
        let user = self.require_user()?;
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            if record.student_id.trim().is_empty() {
                return Err(DataError::Validation(
                    "Cada registro de asistencia debe indicar un estudiante.".to_string(),
                ));
            }
            if !shared::is_valid_date(&record.date) {
                return Err(DataError::Validation(format!(
                    "Fecha inválida: \"{}\". Usa el formato AAAA-MM-DD.",
                    record.date
                )));
            }
        }

        info!(records = records.len(), "guardando asistencia");
        self.store
            .set_attendance(&user.uid, &records)
            .await
            .map_err(|e| describe_store_failure("guardar la asistencia", &e))
    }

    /// Structured AI analysis of aggregated figures; no fallback on failure.
    pub async fn attendance_summary(&self, aggregates: &AttendanceAggregates) -> Result<AttendanceSummary, DataError> {
        self.require_user()?;
        self.avatars.attendance_summary(aggregates).await
    }

    async fn rewrite_roster<F>(&self, uid: &str, group_id: &str, operation: &str, rewrite: F) -> Result<(), DataError>
    where
        F: Fn(&[Student]) -> Vec<Student>,
    {
        for attempt in 0..MAX_TXN_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(TXN_BACKOFF_BASE_MS << attempt)).await;
            }

            let snapshot = self
                .store
                .read_group(uid, group_id)
                .await
                .map_err(|e| describe_store_failure(operation, &e))?;
            let Some(snapshot) = snapshot else {
                return Err(DataError::NotFound("El grupo ya no existe.".to_string()));
            };

            let students = rewrite(&snapshot.group.students);
            let outcome = self
                .store
                .write_students_checked(uid, group_id, snapshot.revision, students)
                .await
                .map_err(|e| describe_store_failure(operation, &e))?;
            match outcome {
                WriteOutcome::Applied => return Ok(()),
                WriteOutcome::Missing => {
                    return Err(DataError::NotFound("El grupo ya no existe.".to_string()));
                }
                WriteOutcome::Conflict => {
                    debug!(group = group_id, attempt, "conflicto de escritura, reintentando");
                }
            }
        }

        warn!(group = group_id, retries = MAX_TXN_RETRIES, "reintentos agotados");
        Err(DataError::Unavailable(format!(
            "No se pudo {operation}. Hay demasiados cambios simultáneos, inténtalo de nuevo."
        )))
    }
}
