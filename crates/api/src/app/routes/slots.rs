use std::sync::Arc;

use axum::{Json, Router, extract::Extension, response::IntoResponse, routing::post};
use serde_json::json;

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route("/check", post(check_slot))
}

/// POST /slots/check - advisory pre-flight; creation re-checks.
pub async fn check_slot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(_ctx): Extension<ActorContext>,
    Json(body): Json<dto::CheckSlotRequest>,
) -> axum::response::Response {
    match services
        .appointments
        .check_slot(body.provider_id, body.scheduled_at, body.duration_minutes)
    {
        Ok(()) => Json(json!({ "available": true })).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}
