//! Structured error types for transition operations.

use serde::Serialize;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not found errors
    CompanyNotFound,
    CondominiumNotFound,
    DepartmentNotFound,
    EmployeeNotFound,
    TaskNotFound,

    // Rejected operations
    TaskAlreadyCompleted,
    DepartmentHasActiveTask,
    InvalidFieldValue,

    // Channel degradation
    ChannelUnavailable,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Error type surfaced by store operations and client sessions.
///
/// Store methods return `anyhow::Result` internally; meaningful failures
/// are `CoreError` values pushed through it and recovered at the edge via
/// the `From<anyhow::Error>` downcast below.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Company not found: {0}")]
    CompanyNotFound(String),

    #[error("Condominium not found: {0}")]
    CondominiumNotFound(String),

    #[error("Department not found: {0}")]
    DepartmentNotFound(String),

    #[error("Employee not found: {0}")]
    EmployeeNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} is completed; assign the department again to start new work")]
    TaskAlreadyCompleted(String),

    #[error("Department {0} still has an active task")]
    DepartmentHasActiveTask(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("{channel} unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::CompanyNotFound(_) => ErrorCode::CompanyNotFound,
            CoreError::CondominiumNotFound(_) => ErrorCode::CondominiumNotFound,
            CoreError::DepartmentNotFound(_) => ErrorCode::DepartmentNotFound,
            CoreError::EmployeeNotFound(_) => ErrorCode::EmployeeNotFound,
            CoreError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            CoreError::TaskAlreadyCompleted(_) => ErrorCode::TaskAlreadyCompleted,
            CoreError::DepartmentHasActiveTask(_) => ErrorCode::DepartmentHasActiveTask,
            CoreError::InvalidFieldValue { .. } => ErrorCode::InvalidFieldValue,
            CoreError::ChannelUnavailable { .. } => ErrorCode::ChannelUnavailable,
            CoreError::Database(_) => ErrorCode::DatabaseError,
            CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidFieldValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn channel_unavailable(channel: &str, reason: impl Into<String>) -> Self {
        CoreError::ChannelUnavailable {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to CoreError first
        match err.downcast::<CoreError>() {
            Ok(core_err) => core_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db_err) => CoreError::Database(db_err.to_string()),
                Err(err) => CoreError::Internal(err.to_string()),
            },
        }
    }
}

/// Result type for transition operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_round_trip_preserves_variant() {
        let err: anyhow::Error = CoreError::DepartmentNotFound("d1".into()).into();
        let back = CoreError::from(err);
        assert_eq!(back.code(), ErrorCode::DepartmentNotFound);
        assert!(back.to_string().contains("d1"));
    }

    #[test]
    fn foreign_errors_become_internal() {
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(CoreError::from(err).code(), ErrorCode::InternalError);
    }

    #[test]
    fn sqlite_errors_become_database_errors() {
        let err: anyhow::Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(CoreError::from(err).code(), ErrorCode::DatabaseError);
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::TaskAlreadyCompleted).unwrap();
        assert_eq!(json, "\"TASK_ALREADY_COMPLETED\"");
    }
}
