//! Error taxonomy of the data layer.
//!
//! Every operation catches backing-store specific failures and re-wraps them
//! here with a message a teacher can read on screen. Provider-internal error
//! shapes never escape to callers.

use crate::storage::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// Bad credentials, provider rejection, or connectivity failure during
    /// login/logout.
    #[error("{0}")]
    Auth(String),

    /// The backing store denied the operation.
    #[error("Error de Permisos: {0}")]
    Permission(String),

    /// The backing store is unreachable.
    #[error("Servicio no disponible: {0}")]
    Unavailable(String),

    /// A referenced group or student vanished concurrently.
    #[error("{0}")]
    NotFound(String),

    /// Empty or invalid required field, caught before any persistence call.
    #[error("{0}")]
    Validation(String),

    /// The avatar/summary generator failed or is unconfigured.
    #[error("{0}")]
    ExternalService(String),
}

/// Wrap a store failure into the taxonomy, phrased around the operation the
/// user attempted ("crear el grupo", "guardar la asistencia", ...).
pub fn describe_store_failure(operation: &str, err: &StoreError) -> DataError {
    match err {
        StoreError::PermissionDenied => DataError::Permission(format!(
            "No se pudo {operation}. Por favor, revisa las reglas de seguridad de tu base de datos."
        )),
        StoreError::Unavailable(_) => DataError::Unavailable(format!(
            "No se pudo {operation}. Revisa tu conexión a internet."
        )),
        StoreError::Missing => DataError::NotFound(format!(
            "No se pudo {operation}: el documento ya no existe."
        )),
        StoreError::Conflict => DataError::Unavailable(format!(
            "No se pudo {operation}. Hay demasiados cambios simultáneos, inténtalo de nuevo."
        )),
        StoreError::Corrupt(detail) => DataError::Unavailable(format!(
            "No se pudo {operation}. Los datos guardados están dañados: {detail}"
        )),
        StoreError::InvalidQuery(detail) => DataError::Unavailable(format!(
            "No se pudo {operation}. Consulta rechazada por el almacén: {detail}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_failures_point_to_security_rules() {
        let err = describe_store_failure("crear el grupo", &StoreError::PermissionDenied);
        match &err {
            DataError::Permission(msg) => {
                assert!(msg.contains("crear el grupo"));
                assert!(msg.contains("reglas de seguridad"));
            }
            other => panic!("expected Permission, got {:?}", other),
        }
        assert!(err.to_string().starts_with("Error de Permisos:"));
    }

    #[test]
    fn unavailable_failures_mention_connectivity() {
        let err = describe_store_failure(
            "guardar la asistencia",
            &StoreError::Unavailable("timeout".to_string()),
        );
        match err {
            DataError::Unavailable(msg) => assert!(msg.contains("conexión a internet")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[test]
    fn missing_documents_become_not_found() {
        let err = describe_store_failure("editar el grupo", &StoreError::Missing);
        assert!(matches!(err, DataError::NotFound(_)));
    }
}
