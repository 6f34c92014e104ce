//! passcore is a self-service password change portal for LDAP and Active
//! Directory.

#![forbid(unsafe_code)]
pub mod config;
pub mod directory;
pub mod error;
mod middleware;
pub mod password;
pub mod provider;
mod router;
pub mod settings;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use provider::PasswordChangeProvider;

/// Lowest upper bound of a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Time left to answer once the provider has given up.
const RESPONSE_MARGIN: Duration = Duration::from_secs(5);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State without metrics, for router tests.
#[cfg(test)]
pub fn test_state(
    config: config::Configuration,
    provider: Arc<dyn PasswordChangeProvider>,
) -> AppState {
    AppState {
        config: Arc::new(config),
        provider,
        metrics: None,
    }
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub provider: Arc<dyn PasswordChangeProvider>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    // Providers report their own failure before the layer answers 408.
    let timeout = REQUEST_TIMEOUT
        .max(state.provider.deadline().saturating_add(RESPONSE_MARGIN));

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /api/password` returns client settings, `POST` changes it.
        .route(
            "/api/password",
            get(router::password::settings).post(router::password::handler),
        )
        .route("/api/password/generated", get(router::password::generated))
        .route("/metrics", get(render_metrics))
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::https_redirect,
        ))
        .with_state(state)
        .layer(middleware)
}

/// Prometheus exposition.
async fn render_metrics(State(state): State<AppState>) -> error::Result<String> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(ServerError::NotFound)
}

/// Initialize the application state.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var(config::CONFIG_PATH_ENV).unwrap_or_default();
    let config = config::Configuration::default().path(path).read()?;

    let provider =
        provider::build(&config, Arc::new(directory::LdapConnector))?;

    Ok(AppState {
        config,
        provider,
        metrics,
    })
}
