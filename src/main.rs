use quotelinker_api::api::handlers::AppState;
use quotelinker_api::api::routes::build_router;
use quotelinker_api::config::Config;
use quotelinker_api::core::ingestion::{DeliveryDispatcher, LeadIngestion};
use quotelinker_api::core::rate_limiter::FixedWindowLimiter;
use quotelinker_api::db::Database;
use quotelinker_api::db_storage::{LeadStore, PgLeadStore};
use quotelinker_api::integrations::delivery::{DeliveryClient, ReqwestTransport, RetryPolicy};
use quotelinker_api::integrations::notifier::LogNotifier;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection.
/// - The delivery client, fallback notifier and submission rate limiter.
/// - HTTP routes and middleware.
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotelinker_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config).await?;
    tracing::info!("Database connection pool established");
    let store: Arc<dyn LeadStore> = Arc::new(PgLeadStore::new(db.pool.clone()));

    let transport = ReqwestTransport::new()?;
    let client = DeliveryClient::new(
        Arc::new(transport),
        config.webhook_url.clone(),
        config.webhook_timeout(),
        RetryPolicy::new(config.webhook_max_retries, config.webhook_retry_base()),
    );
    tracing::info!(
        "Delivery client initialized: {} attempt(s) max per run",
        client.policy().max_attempts()
    );

    let notifier = LogNotifier::new(config.alert_fallback_email.clone());
    let dispatcher = DeliveryDispatcher::new(store.clone(), Arc::new(client), Arc::new(notifier));

    let limiter =
        FixedWindowLimiter::new(config.rate_limit_max_requests, config.rate_limit_window());
    tracing::info!(
        "Submission rate limit: {} per {}s per source",
        config.rate_limit_max_requests,
        config.rate_limit_window_secs
    );
    let ingestion = LeadIngestion::new(Arc::new(limiter), store.clone(), dispatcher.clone());

    if let Some(interval) = config.delivery_sweep_interval() {
        dispatcher.spawn_sweeper(interval);
        tracing::info!("Undelivered lead sweep enabled every {}s", interval.as_secs());
    }

    let port = config.port;
    let app_state = Arc::new(AppState::new(config, store, ingestion, dispatcher));
    let app = build_router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer address feeds the per-source limiter when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
