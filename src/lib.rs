use std::sync::Arc;

use axum::{middleware, routing::get, Router};

pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod tools;

use config::Config;
use mcp::{router::RequestRouter, session::SessionTable};
use tools::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
}

impl AppState {
    pub fn new(config: &Config, registry: Arc<dyn ToolRegistry>) -> Self {
        let sessions = Arc::new(SessionTable::new(
            config.max_sessions,
            config.session_idle_timeout,
        ));
        Self {
            router: Arc::new(RequestRouter::new(
                config.session_mode,
                registry,
                sessions,
            )),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(
            "/mcp",
            get(http::handlers::mcp_get)
                .post(http::handlers::mcp_post)
                .delete(http::handlers::mcp_delete),
        )
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
