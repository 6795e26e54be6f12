//! HTTP API: configuration, authentication and routing.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
