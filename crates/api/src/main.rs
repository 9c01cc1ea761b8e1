// OTPGate API Server
// HTTP surface for the manual login approval handshake

mod config;
mod handlers;
mod routes;

use config::{Config, StoreBackend};
use dotenvy::dotenv;
use otpgate_auth::{AdminConsole, GateConfig, SessionHandle};
use otpgate_database::{ApprovalRecordRepository, Database, MemoryRecordStore, RecordStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub gate: GateConfig,
    pub console: AdminConsole,
    pub sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, gate: GateConfig) -> Self {
        Self {
            console: AdminConsole::new(store.clone()),
            store,
            gate,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Drop handles of sessions that have closed, returning how many went.
    pub async fn evict_closed_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_closed());
        before - sessions.len()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,otpgate_api=debug,otpgate_auth=debug,tower_http=debug")
            }),
        )
        .init();

    tracing::info!("🚀 Starting OTPGate API Server");
    tracing::info!("📦 Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("🔌 Server: {}:{}", config.server_host, config.server_port);
    tracing::info!(
        "⏱️  Poll interval {:?}, reset delay {:?}",
        config.gate.poll_interval,
        config.gate.reset_delay
    );

    // Initialize record store
    let store: Arc<dyn RecordStore> = match config.store_backend {
        StoreBackend::Postgres => {
            tracing::info!("🗄️  Connecting to database...");
            let database = Database::new(config.database.clone()).await?;
            database.ping().await?;
            database.migrate().await?;
            tracing::info!("✅ Database connected and migrated");

            Arc::new(ApprovalRecordRepository::connect(&database).await?)
        }
        StoreBackend::Memory => {
            tracing::warn!("🧪 Using in-memory record store, records are lost on restart");
            Arc::new(MemoryRecordStore::new())
        }
    };

    // Create app state
    let state = Arc::new(AppState::new(store, config.gate.clone()));

    // Admin console follows the change feed for the lifetime of the server
    let _subscription = state.console.start().await?;
    tracing::info!("🛂 Admin console initialized");

    // Idle sessions close themselves, their handles are swept here
    let sweeper = state.clone();
    let sweep_every = config.gate.session_idle_timeout.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let evicted = sweeper.evict_closed_sessions().await;
            if evicted > 0 {
                tracing::info!("🧹 Evicted {} closed client sessions", evicted);
            }
        }
    });

    // Create router
    let app = routes::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::info!("📡 Routes configured:");
    tracing::info!("   GET  /health");
    tracing::info!("   POST /api/sessions");
    tracing::info!("   GET  /api/sessions/:id/events");
    tracing::info!("   GET  /api/admin/records");
    tracing::info!("   GET  /api/admin/records/live");

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("✅ Server ready at http://{}", addr);
    tracing::info!("🎯 Ready to accept requests!");

    axum::serve(listener, app).await?;

    Ok(())
}
