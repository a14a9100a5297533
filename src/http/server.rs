//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the health, breaker and cache handlers
//! - Wire up middleware (request ID, tracing, request timeout, rate limiting)
//! - Serve on a listener until the shutdown future resolves

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::CacheStore;
use crate::health::HealthRegistry;
use crate::http::handlers;
use crate::http::middleware::rate_limit_middleware;
use crate::rate_limit::TieredRateLimiter;
use crate::resilience::BreakerRegistry;

/// Singletons shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheStore,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<TieredRateLimiter>,
    pub health: Arc<HealthRegistry>,
}

/// Build the router. Only `/v1` routes pass through the rate limiter.
#[allow(deprecated)]
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/breakers", get(handlers::list_breakers))
        .route("/breakers/{resource}/reset", post(handlers::reset_breaker))
        .route("/cache/{resource}", delete(handlers::clear_cache))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .nest("/v1", api)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Serve `app` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
