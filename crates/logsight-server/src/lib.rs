//! logsight-server
//!
//! The HTTP surface: a stateless axum router over the session, upload,
//! and file managers, plus the SSE tickers and the WebSocket upload
//! protocol. Handlers receive their collaborators through `AppState`;
//! the only process-wide singletons live below this crate (the intern
//! pool and the parser registry).

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;
pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use logsight_session::{FileStore, SessionConfig, SessionManager, UploadManager};

pub use config::ServerConfig;
pub use routes::router;
pub use state::AppState;

/// Whether tracing has been initialized
static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the default tracing subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    if TRACING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
        .is_ok()
    {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,logsight=info"));

        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Startup failures, separated so the binary can exit precisely
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// Data directories or managers could not be created
    #[error("initialization failed: {0}")]
    Init(#[from] logsight_core::Error),

    /// The listen address could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed after startup
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Build the application state, creating the persistent layout
pub fn build_state(config: &ServerConfig) -> Result<AppState, logsight_core::Error> {
    std::fs::create_dir_all(config.uploads_dir())?;
    std::fs::create_dir_all(config.staging_dir())?;
    std::fs::create_dir_all(config.sessions_dir())?;
    std::fs::create_dir_all(config.defaults_dir().join("maps"))?;

    let rules = config.defaults_dir().join("rules.yaml");
    if rules.exists() {
        tracing::info!(path = %rules.display(), "Default rules file present");
    }

    // Touch the intern pool so its capacity is fixed at startup.
    let pool = logsight_core::global_pool();
    tracing::info!(capacity = pool.capacity(), "Intern pool ready");

    let files = Arc::new(FileStore::new(config.uploads_dir())?);
    let uploads = Arc::new(UploadManager::new(config.staging_dir(), Arc::clone(&files))?);

    let mut session_config = SessionConfig::new(config.sessions_dir());
    session_config.idle_timeout = config.session_idle_timeout;
    let sessions = SessionManager::new(session_config);
    sessions.spawn_eviction_loop();

    Ok(AppState::new(sessions, uploads, files))
}

/// Bind and serve until shutdown
pub async fn serve(config: ServerConfig) -> Result<(), StartError> {
    let state = build_state(&config)?;
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|source| StartError::Bind {
            addr: config.addr,
            source,
        })?;
    tracing::info!(addr = %config.addr, data_dir = %config.data_dir.display(), "logsight listening");

    let sessions = state.sessions.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await;

    sessions.shutdown();
    result.map_err(StartError::Serve)
}
