use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use stockflow_infra::command_dispatcher::DispatchError;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub status: u16,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<JsonValue>,
}

pub fn dispatch_error_to_response(err: DispatchError, path: &str) -> Response {
    match err {
        DispatchError::ReservationShortfall(backorders) => {
            let message = format!("insufficient stock for {} line(s)", backorders.len());
            with_errors(StatusCode::CONFLICT, message, path, json!(backorders))
        }
        DispatchError::InsufficientStock(_)
        | DispatchError::CapacityExceeded(_)
        | DispatchError::InvalidStateTransition(_)
        | DispatchError::Conflict(_)
        | DispatchError::Concurrency(_) => json_error(StatusCode::CONFLICT, err.to_string(), path),
        DispatchError::Validation(_) | DispatchError::InvalidReceptionQuantity(_) => {
            json_error(StatusCode::BAD_REQUEST, err.to_string(), path)
        }
        DispatchError::NotFound(_) => json_error(StatusCode::NOT_FOUND, err.to_string(), path),
        DispatchError::LockTimeout(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string(), path)
        }
        DispatchError::InvariantViolation(_) => {
            tracing::error!(error = %err, path, "invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), path)
        }
        DispatchError::Deserialize(_) | DispatchError::Store(_) => {
            tracing::error!(error = %err, path, "persistence failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), path)
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>, path: &str) -> Response {
    body(status, message.into(), path, None)
}

fn with_errors(status: StatusCode, message: String, path: &str, errors: JsonValue) -> Response {
    body(status, message, path, Some(errors))
}

fn body(status: StatusCode, message: String, path: &str, errors: Option<JsonValue>) -> Response {
    (
        status,
        axum::Json(ErrorBody {
            message,
            status: status.as_u16(),
            path: path.to_string(),
            errors,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::ProductId;
    use stockflow_inventory::BackorderInfo;

    #[test]
    fn business_outcomes_map_to_conflict() {
        for err in [
            DispatchError::InsufficientStock("x".into()),
            DispatchError::CapacityExceeded("x".into()),
            DispatchError::InvalidStateTransition("x".into()),
            DispatchError::Concurrency("x".into()),
        ] {
            assert_eq!(dispatch_error_to_response(err, "/p").status(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn shortfall_maps_to_conflict() {
        let err = DispatchError::ReservationShortfall(vec![BackorderInfo {
            product_id: ProductId::new(),
            sku: "SKU-1".into(),
            requested_qty: 14,
            reserved_qty: 0,
            shortfall_qty: 10,
        }]);
        assert_eq!(dispatch_error_to_response(err, "/p").status(), StatusCode::CONFLICT);
    }

    #[test]
    fn remaining_mappings() {
        let cases = [
            (DispatchError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (DispatchError::InvalidReceptionQuantity("x".into()), StatusCode::BAD_REQUEST),
            (DispatchError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (DispatchError::LockTimeout("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (DispatchError::InvariantViolation("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(dispatch_error_to_response(err, "/p").status(), status);
        }
    }
}
