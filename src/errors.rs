use crate::models::{EntityType, QuotaKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("CONFLICT: {entity} {id} expected status {expected} but found {actual}")]
    Conflict {
        entity: EntityType,
        id: String,
        expected: String,
        actual: String,
    },
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),
    #[error("QUOTA_EXCEEDED: {0}")]
    QuotaExceeded(QuotaKind),
    #[error("FORBIDDEN: {0}")]
    Forbidden(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl DeskError {
    pub fn conflict(entity: EntityType, id: &str, expected: &[&str], actual: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            expected: expected.join("|"),
            actual: actual.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Stable code a caller can branch on without parsing the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "CONFLICT",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for DeskError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for DeskError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for DeskError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for DeskError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Validation(format!("settings file: {}", value))
    }
}

pub type DeskResult<T> = Result<T, DeskError>;

#[cfg(test)]
mod tests {
    use super::DeskError;
    use crate::models::{EntityType, QuotaKind};

    #[test]
    fn conflict_message_names_expected_and_actual_status() {
        let error = DeskError::conflict(EntityType::Lead, "lead-1", &["pending"], "claimed");
        assert_eq!(error.code(), "CONFLICT");
        assert!(error.is_conflict());
        assert_eq!(
            error.to_string(),
            "CONFLICT: lead lead-1 expected status pending but found claimed"
        );
    }

    #[test]
    fn quota_message_names_the_cap() {
        let error = DeskError::QuotaExceeded(QuotaKind::Daily);
        assert!(error.to_string().starts_with("QUOTA_EXCEEDED: daily"));
    }
}
