use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

/// Error payload returned to message callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code (e.g. "insufficient_stock")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Medicine {0} not found")]
    MedicineNotFound(i32),

    #[error("Item {item_id} is not stocked at branch {branch_id}")]
    ItemNotFound { branch_id: i32, item_id: i32 },

    #[error("Delivery orders require an address")]
    MissingAddress,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Medicine {0} requires a prescription")]
    PrescriptionRequired(i32),

    #[error("Prescription {0} not found")]
    PrescriptionNotFound(i32),

    #[error("Prescription mismatch: {0}")]
    PrescriptionMismatch(String),

    /// The commit itself failed, so the outcome of the unit of work is unknown.
    #[error("Transaction commit failed: {0}")]
    CommitFailed(DbErr),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::ValidationError(format!("Malformed payload: {}", err))
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

/// Fragments of driver messages that mark a statement as safe to retry
/// once its transaction has been rolled back.
const TRANSIENT_DB_MESSAGES: [&str; 6] = [
    "deadlock",
    "could not serialize",
    "serialization failure",
    "database is locked",
    "lock timeout",
    "lock wait timeout",
];

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Stable code used in serialized error payloads and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::CommitFailed(_) => "persistence_failure",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MedicineNotFound(_) => "medicine_not_found",
            Self::ItemNotFound { .. } => "item_not_found",
            Self::MissingAddress => "missing_address",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::PrescriptionRequired(_) => "prescription_required",
            Self::PrescriptionNotFound(_) => "prescription_not_found",
            Self::PrescriptionMismatch(_) => "prescription_mismatch",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// True for transient infrastructure failures a caller may retry with backoff.
    ///
    /// Commit failures never qualify: the work may already be durable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DatabaseError(err) => match err {
                DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
                DbErr::Exec(_) | DbErr::Query(_) => {
                    let message = err.to_string().to_ascii_lowercase();
                    TRANSIENT_DB_MESSAGES
                        .iter()
                        .any(|fragment| message.contains(fragment))
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Returns the error message suitable for callers.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::CommitFailed(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Upstream service unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::RuntimeErr;

    #[test]
    fn database_errors_are_masked() {
        let err = ServiceError::db_error("relation \"orders\" does not exist");
        assert_eq!(err.response_message(), "Database error");
        assert_eq!(err.code(), "persistence_failure");
    }

    #[test]
    fn insufficient_stock_is_reported_verbatim() {
        let err = ServiceError::InsufficientStock {
            item_id: 9,
            requested: 100,
            available: 10,
        };
        let response = err.to_response();
        assert_eq!(response.error, "insufficient_stock");
        assert!(response.message.contains("item 9"));
        assert!(response.message.contains("available 10"));
    }

    #[test]
    fn lock_contention_is_retryable() {
        let err = ServiceError::DatabaseError(DbErr::Exec(RuntimeErr::Internal(
            "error returned from database: database is locked".into(),
        )));
        assert!(err.is_retryable());
    }

    #[test]
    fn commit_failures_are_not_retryable() {
        let err = ServiceError::CommitFailed(DbErr::Conn(RuntimeErr::Internal(
            "connection reset during COMMIT".into(),
        )));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "persistence_failure");
        assert_eq!(err.response_message(), "Database error");

        let locked = ServiceError::CommitFailed(DbErr::Exec(RuntimeErr::Internal(
            "database is locked".into(),
        )));
        assert!(!locked.is_retryable());
    }

    #[test]
    fn dropped_connections_are_retryable_outside_commit() {
        let err = ServiceError::DatabaseError(DbErr::Conn(RuntimeErr::Internal(
            "connection reset".into(),
        )));
        assert!(err.is_retryable());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!ServiceError::MissingAddress.is_retryable());
        assert!(!ServiceError::InvalidTransition {
            from: "completed".into(),
            to: "pending".into(),
        }
        .is_retryable());
        assert!(!ServiceError::db_error("constraint violated").is_retryable());
    }

    #[test]
    fn validation_errors_convert() {
        let errors = validator::ValidationErrors::new();
        let err: ServiceError = errors.into();
        assert_eq!(err.code(), "validation_error");
    }
}
