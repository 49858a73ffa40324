use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mentiby_admin::config;
use mentiby_admin::services::SyncScheduler;
use mentiby_admin::{app, AppState};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, XP_API_KEY, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config::config().clone();
    tracing::info!("Starting MentiBY admin API in {:?} mode", config.environment);

    let schedule = config.xp.schedule_interval_secs.map(Duration::from_secs);
    let port = config.server.port;

    let state = AppState::from_config(config).unwrap_or_else(|e| panic!("failed to initialise state: {}", e));
    let scheduler = match (&state.sync, schedule) {
        (Some(sync), Some(interval)) => Some(SyncScheduler::start(sync.clone(), interval)),
        (None, Some(_)) => {
            tracing::warn!("XP_SYNC_INTERVAL_SECS is set but XP sync is disabled");
            None
        }
        _ => None,
    };

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("MentiBY admin API listening on http://{}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server");

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received");
}
