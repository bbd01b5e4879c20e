//! Auth gate: every data operation requires an established identity.
//!
//! [`AuthService`] resolves the initial session exactly once per process,
//! publishes identity changes on a watch channel, and supports two login
//! strategies: anonymous (reusing an active session when one exists) and
//! fixed-admin (a single allowed username signed in with a fixed credential
//! pair, auto-provisioned on first use). The provider behind it is a trait
//! so tests run against a throwaway directory.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::DataError;

/// Constants of the fixed-admin strategy. A single username is accepted
/// and mapped onto one provisioned credential pair.
pub mod fixed_admin {
    pub const USERNAME: &str = "admin";
    pub const EMAIL: &str = "admin@asistencia-pro.app";
    pub const PASSWORD: &str = "asistencia-pro-2024";
}

/// An established identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    /// Present for credential-based identities, absent for anonymous ones.
    pub username: Option<String>,
    pub anonymous: bool,
}

/// Identity state machine: `Unresolved` until the one-shot initial session
/// check finishes, then `SignedIn` or `SignedOut`.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityState {
    Unresolved,
    SignedIn(AuthUser),
    SignedOut,
}

/// Login strategies supported by [`AuthService::login`].
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Anonymous,
    FixedAdmin { username: String },
}

/// The identity provider is an external collaborator; only its capability
/// surface is specified here.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The active session, if one survives from a previous run.
    async fn current_session(&self) -> Result<Option<AuthUser>, DataError>;
    async fn sign_in_anonymously(&self) -> Result<AuthUser, DataError>;
    /// Fails with [`DataError::NotFound`] when the credential was never
    /// provisioned, which callers turn into a create-on-first-use.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser, DataError>;
    async fn create_user(&self, email: &str, password: &str, username: &str) -> Result<AuthUser, DataError>;
    async fn sign_out(&self) -> Result<(), DataError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    user: AuthUser,
    signed_in_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    uid: String,
    username: String,
    password: String,
    created_at: String,
}

/// File-backed identity provider: the active session and provisioned
/// credentials live as JSON documents under a base directory.
pub struct FileIdentityProvider {
    base_dir: PathBuf,
}

impl FileIdentityProvider {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, DataError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|e| provider_error("preparar el proveedor de identidad", &e))?;
        Ok(Self { base_dir })
    }

    fn session_path(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    fn credentials_path(&self) -> PathBuf {
        self.base_dir.join("credenciales.json")
    }

    fn read_session(&self) -> Result<Option<StoredSession>, DataError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| provider_error("leer la sesión", &e))?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DataError::Auth(format!("La sesión guardada está dañada: {e}")))
    }

    fn write_session(&self, user: &AuthUser) -> Result<(), DataError> {
        let session = StoredSession {
            user: user.clone(),
            signed_in_at: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&session)
            .map_err(|e| DataError::Auth(format!("No se pudo serializar la sesión: {e}")))?;
        fs::write(self.session_path(), raw).map_err(|e| provider_error("guardar la sesión", &e))
    }

    fn read_credentials(&self) -> Result<HashMap<String, StoredCredential>, DataError> {
        let path = self.credentials_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| provider_error("leer las credenciales", &e))?;
        serde_json::from_str(&raw)
            .map_err(|e| DataError::Auth(format!("Las credenciales guardadas están dañadas: {e}")))
    }

    fn write_credentials(&self, credentials: &HashMap<String, StoredCredential>) -> Result<(), DataError> {
        let raw = serde_json::to_string_pretty(credentials)
            .map_err(|e| DataError::Auth(format!("No se pudieron serializar las credenciales: {e}")))?;
        fs::write(self.credentials_path(), raw).map_err(|e| provider_error("guardar las credenciales", &e))
    }
}

fn provider_error(action: &str, err: &std::io::Error) -> DataError {
    DataError::Auth(format!("No se pudo {action}: {err}. Verifica tu conexión e inténtalo de nuevo."))
}

#[async_trait]
impl IdentityProvider for FileIdentityProvider {
    async fn current_session(&self) -> Result<Option<AuthUser>, DataError> {
        Ok(self.read_session()?.map(|session| session.user))
    }

    async fn sign_in_anonymously(&self) -> Result<AuthUser, DataError> {
        let user = AuthUser {
            uid: format!("anon-{}", uuid::Uuid::new_v4()),
            username: None,
            anonymous: true,
        };
        self.write_session(&user)?;
        Ok(user)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser, DataError> {
        let credentials = self.read_credentials()?;
        let Some(stored) = credentials.get(email) else {
            return Err(DataError::NotFound(format!("No existe una cuenta para {email}.")));
        };
        if stored.password != password {
            return Err(DataError::Auth("Credenciales inválidas.".to_string()));
        }
        let user = AuthUser {
            uid: stored.uid.clone(),
            username: Some(stored.username.clone()),
            anonymous: false,
        };
        self.write_session(&user)?;
        Ok(user)
    }

    async fn create_user(&self, email: &str, password: &str, username: &str) -> Result<AuthUser, DataError> {
        let mut credentials = self.read_credentials()?;
        let stored = StoredCredential {
            uid: format!("u-{}", uuid::Uuid::new_v4()),
            username: username.to_string(),
            password: password.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        let user = AuthUser {
            uid: stored.uid.clone(),
            username: Some(stored.username.clone()),
            anonymous: false,
        };
        credentials.insert(email.to_string(), stored);
        self.write_credentials(&credentials)?;
        self.write_session(&user)?;
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), DataError> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| provider_error("cerrar la sesión", &e))?;
        }
        Ok(())
    }
}

/// Owner of the identity state machine.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    state_tx: watch::Sender<IdentityState>,
    resolved: AtomicBool,
    error: Mutex<Option<String>>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state_tx, _) = watch::channel(IdentityState::Unresolved);
        Self {
            provider,
            state_tx,
            resolved: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// One-shot initial session check; subsequent calls are no-ops. A
    /// provider failure resolves to signed-out and fills the error slot.
    pub async fn resolve(&self) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.provider.current_session().await {
            Ok(Some(user)) => {
                info!(uid = %user.uid, "sesión previa restaurada");
                self.state_tx.send_replace(IdentityState::SignedIn(user));
            }
            Ok(None) => {
                self.state_tx.send_replace(IdentityState::SignedOut);
            }
            Err(err) => {
                warn!(error = %err, "no se pudo comprobar la sesión inicial");
                *self.error.lock().unwrap() = Some(err.to_string());
                self.state_tx.send_replace(IdentityState::SignedOut);
            }
        }
    }

    /// True until the initial session check resolves.
    pub fn loading(&self) -> bool {
        *self.state_tx.borrow() == IdentityState::Unresolved
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        match &*self.state_tx.borrow() {
            IdentityState::SignedIn(user) => Some(user.clone()),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// Identity-change subscription, seeded with the current state.
    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state_tx.subscribe()
    }

    pub async fn login(&self, credentials: Credentials) -> Result<(), DataError> {
        *self.error.lock().unwrap() = None;

        let user = match credentials {
            Credentials::Anonymous => {
                // Only sign in when there is no current user.
                if let Some(user) = self.current_user() {
                    self.state_tx.send_replace(IdentityState::SignedIn(user));
                    return Ok(());
                }
                match self.provider.sign_in_anonymously().await {
                    Ok(user) => user,
                    Err(err) => return Err(self.record_failure(err)),
                }
            }
            Credentials::FixedAdmin { username } => {
                if !username.trim().eq_ignore_ascii_case(fixed_admin::USERNAME) {
                    let err = DataError::Auth("Usuario no autorizado para esta aplicación.".to_string());
                    return Err(self.record_failure(err));
                }
                match self
                    .provider
                    .sign_in_with_password(fixed_admin::EMAIL, fixed_admin::PASSWORD)
                    .await
                {
                    Ok(user) => user,
                    Err(DataError::NotFound(_)) => {
                        info!("provisionando la credencial de administración");
                        match self
                            .provider
                            .create_user(fixed_admin::EMAIL, fixed_admin::PASSWORD, fixed_admin::USERNAME)
                            .await
                        {
                            Ok(user) => user,
                            Err(err) => return Err(self.record_failure(err)),
                        }
                    }
                    Err(err) => return Err(self.record_failure(err)),
                }
            }
        };

        info!(uid = %user.uid, anonymous = user.anonymous, "sesión iniciada");
        self.state_tx.send_replace(IdentityState::SignedIn(user));
        Ok(())
    }

    /// Clears the identity. On provider failure local state is left
    /// untouched so the caller can retry.
    pub async fn logout(&self) -> Result<(), DataError> {
        match self.provider.sign_out().await {
            Ok(()) => {
                info!("sesión cerrada");
                self.state_tx.send_replace(IdentityState::SignedOut);
                Ok(())
            }
            Err(err) => Err(self.record_failure(err)),
        }
    }

    fn record_failure(&self, err: DataError) -> DataError {
        warn!(error = %err, "fallo de autenticación");
        *self.error.lock().unwrap() = Some(err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> AuthService {
        let provider = Arc::new(FileIdentityProvider::new(dir.path()).unwrap());
        AuthService::new(provider)
    }

    #[tokio::test]
    async fn starts_unresolved_and_resolves_to_signed_out() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);

        assert!(auth.loading());
        assert_eq!(auth.current_user(), None);

        auth.resolve().await;
        assert!(!auth.loading());
        assert_eq!(*auth.subscribe().borrow(), IdentityState::SignedOut);
    }

    #[tokio::test]
    async fn anonymous_login_persists_and_reuses_the_session() {
        let dir = TempDir::new().unwrap();

        let auth = service(&dir);
        auth.resolve().await;
        auth.login(Credentials::Anonymous).await.unwrap();
        let first = auth.current_user().unwrap();
        assert!(first.anonymous);

        // A repeated login keeps the active session.
        auth.login(Credentials::Anonymous).await.unwrap();
        assert_eq!(auth.current_user().unwrap().uid, first.uid);

        // A new process restores the same session from the provider.
        let restarted = service(&dir);
        restarted.resolve().await;
        assert_eq!(restarted.current_user().unwrap().uid, first.uid);
    }

    #[tokio::test]
    async fn fixed_admin_rejects_unknown_usernames() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.resolve().await;

        let err = auth
            .login(Credentials::FixedAdmin { username: "otra".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Auth(_)));
        assert_eq!(auth.current_user(), None);
        assert!(auth.last_error().is_some());
    }

    #[tokio::test]
    async fn fixed_admin_provisions_on_first_use_and_reuses_afterwards() {
        let dir = TempDir::new().unwrap();

        let auth = service(&dir);
        auth.resolve().await;
        auth.login(Credentials::FixedAdmin { username: "Admin".to_string() })
            .await
            .unwrap();
        let first = auth.current_user().unwrap();
        assert_eq!(first.username.as_deref(), Some("admin"));
        assert!(!first.anonymous);

        // A later sign-in finds the provisioned credential, same uid.
        let again = service(&dir);
        again.resolve().await;
        again.logout().await.unwrap();
        again
            .login(Credentials::FixedAdmin { username: "admin".to_string() })
            .await
            .unwrap();
        assert_eq!(again.current_user().unwrap().uid, first.uid);
    }

    #[tokio::test]
    async fn logout_clears_the_identity_and_the_session_file() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.resolve().await;
        auth.login(Credentials::Anonymous).await.unwrap();

        auth.logout().await.unwrap();
        assert_eq!(auth.current_user(), None);

        let restarted = service(&dir);
        restarted.resolve().await;
        assert_eq!(restarted.current_user(), None);
    }

    #[tokio::test]
    async fn resolve_runs_exactly_once() {
        let dir = TempDir::new().unwrap();
        let auth = service(&dir);
        auth.resolve().await;
        auth.login(Credentials::Anonymous).await.unwrap();

        // A second resolve must not clobber the signed-in state.
        auth.resolve().await;
        assert!(auth.current_user().is_some());
    }
}
