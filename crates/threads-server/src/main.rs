mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use threads_api::error::ApiError;
use threads_api::middleware::{BAD_TOKEN, NO_TOKEN, bearer_token, decode_token};
use threads_api::state::{AppState, AppStateInner};
use threads_api::users::UPLOADS_ROUTE;
use threads_gateway::connection;
use threads_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threads=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = threads_db::Database::open(&config.db_path)?;

    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        uploads_dir: config.uploads_dir.clone(),
    });

    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(app_state.clone());

    let app = Router::new()
        .merge(threads_api::router(app_state))
        .merge(ws_route)
        .nest_service(UPLOADS_ROUTE, ServeDir::new(&config.uploads_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Threads server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`. It is checked before upgrading.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or(ApiError::Unauthorized(NO_TOKEN))?;

    let claims = decode_token(&state.jwt_secret, token).ok_or_else(|| {
        warn!("Rejected socket handshake with an invalid token");
        ApiError::Unauthorized(BAD_TOKEN)
    })?;

    let ctx = state.gateway();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, ctx, claims.sub, claims.username)
    }))
}
