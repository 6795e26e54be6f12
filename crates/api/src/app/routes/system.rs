use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, sse::Event as SseEvent},
};

use crate::app::dto::MeResponse;
use crate::app::services::{self, AppServices};
use crate::context::ActorContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> impl IntoResponse {
    let capabilities = services
        .grants
        .resolver()
        .effective_for(ctx.actor())
        .map(|caps| caps.iter().collect::<Vec<_>>())
        .unwrap_or_else(|e| {
            tracing::warn!(user_id = %ctx.user_id(), error = %e, "grant lookup failed for whoami");
            Vec::new()
        });

    Json(MeResponse {
        user_id: ctx.user_id(),
        role: ctx.role().as_str(),
        capabilities,
    })
}

/// Realtime appointment notifications for the caller.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::user_sse_stream(&services, ctx.user_id())
}
