//! LockedIn - time tracking with a tool-calling assistant
//!
//! Serves the dashboard, the SQL console and the chat assistant over one
//! embedded SQLite database. The assistant reads and changes that database
//! through tools and streams its replies as line frames.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audio;
mod config;
mod conversation;
mod core;
mod db;
mod graphs;
mod providers;
mod routes;
mod session;
mod state;
mod stream;
mod tools;

use config::Config;
use crate::core::ChatEngine;
use db::Database;
use providers::{OpenAICompatProvider, Transcriber};
use session::SessionManager;
use state::AppStore;
use tools::ToolExecutor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ChatEngine>,
    pub db: Database,
    pub store: Arc<AppStore>,
    pub sessions: Arc<SessionManager>,
    pub transcriber: Arc<dyn Transcriber>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockedin=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database ready at {}", config.database_url);

    let provider = Arc::new(OpenAICompatProvider::new(config.provider_config())?);
    let store = Arc::new(AppStore::new());

    let engine = ChatEngine::new(
        provider.clone(),
        ToolExecutor::new(db.clone()),
        Arc::clone(&store),
    )
    .with_system_prompt(config.base_prompt().await?)
    .with_max_tool_roundtrips(config.max_tool_roundtrips);

    tracing::info!(
        "Assistant using {} with up to {} tool round(s) per turn",
        config.chat_model,
        config.max_tool_roundtrips
    );

    let state = AppState {
        config,
        engine: Arc::new(engine),
        db,
        store,
        sessions: Arc::new(SessionManager::new()),
        transcriber: provider,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("LockedIn API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
