use http::StatusCode;
use sea_orm::error::{DbErr, SqlErr};
use serde::Serialize;
use uuid::Uuid;

/// A single order item that could not be moved during an order-level cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeFailure {
    pub order_item_id: Uuid,
    pub reason: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Illegal {entity} transition from {from} to {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error(
        "Cascade on order {order_id} partially applied: {} succeeded, {} failed",
        .succeeded.len(),
        .failed.len()
    )]
    PartialCascade {
        order_id: Uuid,
        succeeded: Vec<Uuid>,
        failed: Vec<CascadeFailure>,
    },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a store error, turning unique-key races on ledger rows into
    /// `ConcurrentModification` for the entity being written.
    pub fn from_ledger_write(error: DbErr, entity_id: Uuid) -> Self {
        match error.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::ConcurrentModification(entity_id)
            }
            _ => ServiceError::DatabaseError(error),
        }
    }

    pub fn illegal_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::IllegalTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidReference(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::IllegalTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::PartialCascade { .. } => StatusCode::MULTI_STATUS,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_reports_both_statuses() {
        let err = ServiceError::illegal_transition("order item", "DRAFT", "DELIVERED");
        assert_eq!(
            err.to_string(),
            "Illegal order item transition from DRAFT to DELIVERED"
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn database_errors_are_not_leaked() {
        let err = ServiceError::DatabaseError(DbErr::Custom("disk on fire".into()));
        assert_eq!(err.response_message(), "Database error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn partial_cascade_counts_outcomes() {
        let err = ServiceError::PartialCascade {
            order_id: Uuid::nil(),
            succeeded: vec![Uuid::new_v4()],
            failed: vec![
                CascadeFailure {
                    order_item_id: Uuid::new_v4(),
                    reason: "nope".into(),
                },
                CascadeFailure {
                    order_item_id: Uuid::new_v4(),
                    reason: "nope".into(),
                },
            ],
        };
        assert!(err.to_string().contains("1 succeeded, 2 failed"));
        assert_eq!(err.status_code(), StatusCode::MULTI_STATUS);
    }

    #[test]
    fn custom_db_errors_stay_database_errors() {
        let err = ServiceError::from_ledger_write(DbErr::Custom("boom".into()), Uuid::nil());
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }
}
