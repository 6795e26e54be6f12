//! Operator administration: menus, the capability catalog, grant management
//! and the audit trail.
//!
//! `/explain` exists to answer "why was I denied?" without reading logs.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use bookwell_auth::{Actor, Capability, RbacRegistry, Role};
use bookwell_core::UserId;
use bookwell_infra::{AuditLog, AuditSubject, CoreError};
use bookwell_scheduling::AppointmentId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/menu", get(menu))
        .route("/capabilities", get(capability_catalog))
        .route("/explain", get(explain))
        .route("/operators", get(list_operators))
        .route("/operators/:id/grants", get(get_grants).put(set_grants))
        .route("/operators/:id/grants/:capability", post(grant).delete(revoke))
        .route("/audit", get(audit_trail))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/menu - navigation visible to the caller.
pub async fn menu(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    let groups = services.grants.resolver().visible_menu_for(ctx.actor());
    Json(serde_json::json!({ "role": ctx.role(), "groups": groups })).into_response()
}

/// GET /admin/capabilities - roles and the full capability catalog.
pub async fn capability_catalog(Extension(_ctx): Extension<ActorContext>) -> axum::response::Response {
    Json(RbacRegistry::catalog()).into_response()
}

/// GET /admin/explain?capability=&user_id=
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Query(query): Query<dto::ExplainQuery>,
) -> axum::response::Response {
    let capability: Capability = match query.capability.parse() {
        Ok(c) => c,
        Err(e) => return errors::core_error_to_response(CoreError::from(e)),
    };

    let subject = match query.user_id.as_deref() {
        None => *ctx.actor(),
        Some(raw) => {
            let user_id: UserId = match errors::parse_id(raw, "user") {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            if user_id != ctx.user_id() {
                if let Err(e) = services.grants.resolver().require(ctx.actor(), Capability::ManageTeam) {
                    return errors::core_error_to_response(e.into());
                }
            }
            // Grants only ever belong to operators.
            Actor::new(user_id, Role::Operator)
        }
    };

    Json(services.grants.resolver().explain(&subject, capability)).into_response()
}

/// GET /admin/operators - every operator with stored grants.
pub async fn list_operators(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    match services.grants.list(ctx.actor()) {
        Ok(items) => Json(serde_json::json!({ "items": items })).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn get_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&id, "user") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.grants.grants_of(ctx.actor(), user_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

/// PUT /admin/operators/:id/grants - replace the whole grant set.
pub async fn set_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetGrantsRequest>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&id, "user") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.grants.set_grants(ctx.actor(), user_id, body.capabilities) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((id, capability)): Path<(String, String)>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&id, "user") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.grants.grant(ctx.actor(), user_id, &capability) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn revoke(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((id, capability)): Path<(String, String)>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&id, "user") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.grants.revoke(ctx.actor(), user_id, &capability) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

/// GET /admin/audit?appointment_id=|user_id= - requires `manage-team`.
pub async fn audit_trail(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Query(query): Query<dto::AuditQuery>,
) -> axum::response::Response {
    if let Err(e) = services.grants.resolver().require(ctx.actor(), Capability::ManageTeam) {
        return errors::core_error_to_response(e.into());
    }

    let subject = match (query.appointment_id.as_deref(), query.user_id.as_deref()) {
        (Some(_), Some(_)) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "filter by appointment_id or user_id, not both",
            );
        }
        (Some(raw), None) => match errors::parse_id::<AppointmentId>(raw, "appointment") {
            Ok(id) => Some(AuditSubject::Appointment(id)),
            Err(resp) => return resp,
        },
        (None, Some(raw)) => match errors::parse_id::<UserId>(raw, "user") {
            Ok(id) => Some(AuditSubject::Grants(id)),
            Err(resp) => return resp,
        },
        (None, None) => None,
    };

    match services.audit.list(subject) {
        Ok(records) => Json(serde_json::json!({ "items": records })).into_response(),
        Err(e) => errors::core_error_to_response(CoreError::Infrastructure(e.to_string())),
    }
}
