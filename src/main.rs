//! confab-auth binary entry point

use confab_auth::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions and device codes are pruned
const CLEANUP_INTERVAL_SECS: u64 = 600;

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Build Axum router
/// 6. Start background cleanup and the HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("CONFAB__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "confab_auth=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "confab_auth=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting confab-auth...");

    // 2. Initialize metrics
    confab_auth::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        base_url = %config.server.base_url(),
        frontend_url = %config.server.frontend_url(),
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = confab_auth::build_router(state.clone());

    // 6. Start background tasks and HTTP server
    spawn_cleanup_task(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn background task removing expired sessions and device codes
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));

        loop {
            interval.tick().await;

            match state.prune_expired().await {
                Ok(removed) => {
                    confab_auth::metrics::EXPIRED_ROWS_PRUNED.set(removed as i64);
                    if removed > 0 {
                        tracing::info!(removed, "Expired auth rows pruned");
                    }
                }
                Err(error) => tracing::error!(%error, "Cleanup of expired auth rows failed"),
            }
        }
    });

    tracing::info!("Cleanup task spawned");
}
