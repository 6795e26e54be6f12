use anyhow::Context;

use bookwell_api::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bookwell_observability::init();

    let settings = Settings::from_env()?;
    let bind_addr = settings.bind_addr;

    let app = bookwell_api::app::build_app(settings).await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}
