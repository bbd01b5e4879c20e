//! Avatar and AI-summary boundary.
//!
//! The generative provider is an external collaborator; only its capability
//! surface lives here. Avatar generation never fails: any provider problem
//! falls back to a deterministic placeholder URL derived from the student's
//! name. Summaries have no fallback and fail with a user-facing error when
//! the feature is unconfigured.

use async_trait::async_trait;
use shared::{AttendanceAggregates, AttendanceSummary};
use tracing::debug;

use crate::errors::DataError;

/// Host of the deterministic placeholder images.
pub const PLACEHOLDER_HOST: &str = "https://picsum.photos";

#[async_trait]
pub trait AvatarGenerator: Send + Sync {
    /// Avatar URL for a student. Never fails; provider failures and missing
    /// configuration fall back to the placeholder scheme
    /// `<host>/seed/<slug>/100`.
    async fn generate_avatar(&self, student_name: &str) -> String;

    /// Structured analysis of aggregated attendance figures. No fallback:
    /// an unconfigured or failing provider is an error the caller handles.
    async fn attendance_summary(&self, aggregates: &AttendanceAggregates) -> Result<AttendanceSummary, DataError>;
}

/// Turn a display name into a URL-safe placeholder seed.
/// "José María" -> "jose_maria".
pub fn avatar_seed(name: &str) -> String {
    let seed: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c.is_whitespace() {
                '_'
            } else {
                // Fold case first so accented capitals reach the arms below.
                match c.to_lowercase().next().unwrap_or(c) {
                    'á' | 'à' | 'ä' | 'â' => 'a',
                    'é' | 'è' | 'ë' | 'ê' => 'e',
                    'í' | 'ì' | 'ï' | 'î' => 'i',
                    'ó' | 'ò' | 'ö' | 'ô' => 'o',
                    'ú' | 'ù' | 'ü' | 'û' => 'u',
                    'ñ' => 'n',
                    'ç' => 'c',
                    _ => '_',
                }
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string();

    if seed.is_empty() {
        "estudiante".to_string()
    } else {
        seed
    }
}

/// The shipped generator: deterministic placeholders only. Used whenever
/// the generative provider is not configured.
pub struct PlaceholderAvatars {
    host: String,
}

impl PlaceholderAvatars {
    pub fn new() -> Self {
        Self {
            host: PLACEHOLDER_HOST.to_string(),
        }
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for PlaceholderAvatars {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AvatarGenerator for PlaceholderAvatars {
    async fn generate_avatar(&self, student_name: &str) -> String {
        let url = format!("{}/seed/{}/100", self.host, avatar_seed(student_name));
        debug!(student = student_name, %url, "avatar de reserva generado");
        url
    }

    async fn attendance_summary(&self, _aggregates: &AttendanceAggregates) -> Result<AttendanceSummary, DataError> {
        Err(DataError::ExternalService(
            "La función de análisis con IA no está disponible. Por favor, configura la \
             clave de API del proveedor generativo."
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_url_follows_the_placeholder_scheme() {
        let avatars = PlaceholderAvatars::new();
        let url = avatars.generate_avatar("José María").await;
        assert_eq!(url, "https://picsum.photos/seed/jose_maria/100");
    }

    #[tokio::test]
    async fn fallback_is_deterministic_per_name() {
        let avatars = PlaceholderAvatars::new();
        assert_eq!(
            avatars.generate_avatar("Ana").await,
            avatars.generate_avatar("Ana").await
        );
    }

    #[test]
    fn seed_handles_degenerate_names() {
        assert_eq!(avatar_seed("Ana López"), "ana_lopez");
        assert_eq!(avatar_seed("  ¡¡!!  "), "estudiante");
        assert_eq!(avatar_seed(""), "estudiante");
    }

    #[test]
    fn seed_folds_accented_capitals() {
        assert_eq!(avatar_seed("JOSÉ MARÍA"), "jose_maria");
        assert_eq!(avatar_seed("Ángela"), "angela");
        assert_eq!(avatar_seed("ÑANDÚ"), "nandu");
    }

    #[tokio::test]
    async fn summary_fails_when_unconfigured() {
        let avatars = PlaceholderAvatars::new();
        let aggregates = AttendanceAggregates {
            group_attendance: Vec::new(),
            status_totals: Vec::new(),
            total_students: 0,
        };
        let err = avatars.attendance_summary(&aggregates).await.unwrap_err();
        assert!(matches!(err, DataError::ExternalService(_)));
    }
}
