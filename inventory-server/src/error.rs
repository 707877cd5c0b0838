use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("inventory already exists for this SKU and store")]
    DuplicateInventory,

    #[error("insufficient inventory: current quantity is {current}, cannot adjust by {delta}")]
    InsufficientQuantity { current: i32, delta: i32 },

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::DuplicateInventory => StatusCode::CONFLICT,
            ServiceError::InsufficientQuantity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        match err {
            DieselError::NotFound => ServiceError::NotFound("record"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                ServiceError::DuplicateInventory
            }
            other => ServiceError::Infrastructure(other.into()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {:#}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        assert_eq!(
            ServiceError::NotFound("inventory").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::DuplicateInventory.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientQuantity { current: 7, delta: -10 }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Infrastructure(anyhow::anyhow!("kafka down")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unique_violation_becomes_duplicate_inventory() {
        let err = diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_string()),
        );
        assert!(matches!(ServiceError::from(err), ServiceError::DuplicateInventory));
    }

    #[test]
    fn insufficient_quantity_names_both_sides() {
        let msg = ServiceError::InsufficientQuantity { current: 7, delta: -10 }.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains("-10"));
    }
}
