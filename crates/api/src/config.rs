//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

use bookwell_core::UserId;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub permission_cache_ttl: Duration,
    /// Seeded with the full capability catalog at startup.
    pub bootstrap_operator_id: Option<UserId>,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub notify_channel: String,
}

impl Settings {
    /// In-memory defaults around the given signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: jwt_secret.into(),
            permission_cache_ttl: Duration::from_secs(30),
            bootstrap_operator_id: None,
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            notify_channel: "bookwell.notifications".to_string(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });
        let mut settings = Self::new(jwt_secret);

        if let Some(addr) = var("BIND_ADDR") {
            settings.bind_addr = addr.parse().with_context(|| format!("invalid BIND_ADDR '{addr}'"))?;
        }
        if let Some(secs) = var("PERMISSION_CACHE_TTL_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid PERMISSION_CACHE_TTL_SECS '{secs}'"))?;
            settings.permission_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(id) = var("BOOTSTRAP_OPERATOR_ID") {
            settings.bootstrap_operator_id =
                Some(id.parse().with_context(|| format!("invalid BOOTSTRAP_OPERATOR_ID '{id}'"))?);
        }
        settings.use_persistent_stores = var("USE_PERSISTENT_STORES")
            .map(|v| v.parse::<bool>().unwrap_or(false))
            .unwrap_or(false);
        settings.database_url = var("DATABASE_URL");
        settings.redis_url = var("REDIS_URL");
        if let Some(channel) = var("NOTIFY_CHANNEL") {
            settings.notify_channel = channel;
        }

        if settings.use_persistent_stores && settings.database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        }

        Ok(settings)
    }
}

/// Set and non-blank.
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
