use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bookwell_infra::CoreError;

pub fn core_error_to_response(err: CoreError) -> axum::response::Response {
    match err {
        CoreError::SlotConflict { appointment_id } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "slot_conflict",
                "message": format!("slot conflicts with appointment {appointment_id}"),
                "conflicting_appointment_id": appointment_id,
            })),
        )
            .into_response(),
        CoreError::ConcurrentModification(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        e @ CoreError::InvalidTransition { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", e.to_string())
        }
        CoreError::NotAuthorized => json_error(StatusCode::FORBIDDEN, "not_authorized", "not authorized"),
        e @ CoreError::UnknownCapability(_) => json_error(StatusCode::BAD_REQUEST, "unknown_capability", e.to_string()),
        CoreError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        CoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        CoreError::Infrastructure(msg) => {
            tracing::error!(error = %msg, "request failed on infrastructure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
