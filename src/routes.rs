use crate::handlers::{self, AppState};
use crate::openapi::ApiDoc;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest accepted lead submission body.
pub const MAX_SUBMISSION_BYTES: usize = 64 * 1024;

/// Public intake. Throttling happens per source inside the pipeline.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", post(handlers::submit_lead))
        .layer(RequestBodyLimitLayer::new(MAX_SUBMISSION_BYTES))
}

/// Token-protected administration, behind a per-IP GCRA limiter.
pub fn admin_routes() -> anyhow::Result<Router<Arc<AppState>>> {
    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid admin rate limiter configuration"))?,
    );

    Ok(Router::new()
        .route("/api/notify", post(handlers::notify_lead))
        .route(
            "/api/admin/leads",
            get(handlers::list_leads).put(handlers::update_lead),
        )
        .route("/api/admin/export", get(handlers::export_leads))
        .route("/api/admin/auth", post(handlers::admin_auth))
        .layer(ServiceBuilder::new().layer(GovernorLayer {
            config: governor_conf,
        })))
}

/// Full application router. Health and docs bypass every limiter.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes())
        .merge(admin_routes()?)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
