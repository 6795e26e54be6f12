use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use bookwell_infra::NewAppointment;
use bookwell_scheduling::AppointmentId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_appointment).get(list_appointments))
        .route("/:id", get(get_appointment).delete(purge_appointment))
        .route("/:id/transition", post(transition_appointment))
        .route("/:id/capabilities", get(appointment_capabilities))
}

/// POST /appointments - request an appointment as the caller.
pub async fn create_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::CreateAppointmentRequest>,
) -> axum::response::Response {
    let created = match services.appointments.request(
        ctx.actor(),
        NewAppointment {
            provider_id: body.provider_id,
            scheduled_at: body.scheduled_at,
            duration_minutes: body.duration_minutes,
            kind: body.kind,
            notes: body.notes,
        },
    ) {
        Ok(rm) => rm,
        Err(e) => return errors::core_error_to_response(e),
    };

    (StatusCode::CREATED, Json(services.view(created))).into_response()
}

/// GET /appointments - the caller's appointments (all, for operators).
pub async fn list_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    let items: Vec<_> = services
        .appointments
        .list_for(ctx.actor())
        .into_iter()
        .map(|rm| services.view(rm))
        .collect();

    Json(serde_json::json!({ "items": items })).into_response()
}

pub async fn get_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AppointmentId = match errors::parse_id(&id, "appointment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.appointments.get(ctx.actor(), id) {
        Ok(rm) => Json(services.view(rm)).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

/// POST /appointments/:id/transition - move to `to`; repeating a move the
/// caller could make returns `changed: false`.
pub async fn transition_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TransitionRequest>,
) -> axum::response::Response {
    let id: AppointmentId = match errors::parse_id(&id, "appointment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.appointments.transition(ctx.actor(), id, body.to) {
        Ok(outcome) => Json(dto::TransitionResponse {
            appointment: services.view(outcome.appointment),
            changed: outcome.changed,
        })
        .into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn appointment_capabilities(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AppointmentId = match errors::parse_id(&id, "appointment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.appointments.capabilities(ctx.actor(), id) {
        Ok(caps) => Json(caps).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

/// DELETE /appointments/:id - operator purge.
pub async fn purge_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::PurgeQuery>,
) -> axum::response::Response {
    let id: AppointmentId = match errors::parse_id(&id, "appointment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.appointments.purge(ctx.actor(), id, query.reason) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}
