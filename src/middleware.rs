//! Middlewares for routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use url::Url;

use crate::config::Configuration;

/// Header set by the reverse proxy with the scheme used by the client.
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Redirect requests the reverse proxy received over plain HTTP to the
/// same location over HTTPS. Requests without `X-Forwarded-Proto` pass
/// through.
pub async fn https_redirect(
    State(config): State<Arc<Configuration>>,
    req: Request,
    next: Next,
) -> Response {
    if !config.web_settings.enable_https_redirect {
        return next.run(req).await;
    }

    let plain_http = req
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("http"));

    match https_location(&req) {
        Some(location) if plain_http => {
            tracing::debug!(%location, "redirecting to https");
            Redirect::permanent(&location).into_response()
        },
        _ => next.run(req).await,
    }
}

fn https_location(req: &Request) -> Option<String> {
    let host = req.headers().get(header::HOST)?.to_str().ok()?;
    let path = req
        .uri()
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");

    Url::parse(&format!("https://{host}{path}"))
        .ok()
        .map(String::from)
}
