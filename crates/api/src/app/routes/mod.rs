use axum::{Router, routing::get};

pub mod admin;
pub mod appointments;
pub mod slots;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/slots", slots::router())
        .nest("/appointments", appointments::router())
        .nest("/admin", admin::router())
}
