use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use coupon_push_service::config;
use coupon_push_service::handlers;
use coupon_push_service::state;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    tracing::info!("Starting coupon push service...");

    let settings = config::Settings::new()?;
    tracing::info!("Configuration loaded successfully");

    // Fails here when the FCM service account material is absent; the
    // service is useless without it, so exit immediately.
    let app_state = Arc::new(state::AppState::new(settings).await?);
    tracing::info!("Application state initialized (Redis pool, FCM client)");

    let app = handlers::router(Arc::clone(&app_state));

    let addr: SocketAddr = app_state.settings.server.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Coupon push service stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");
}
