use crate::api::handlers::auth::{
    self,
    rate_limit::{general_limit, strip_proxy_headers},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware, Extension, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod sweep;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the full application: documented routes, Swagger UI at
/// `/api/docs`, and the middleware stack.
///
/// Proxy address headers are stripped first, then the general per-address
/// limit applies to every route.
///
/// # Errors
/// Returns an error if the frontend base URL cannot be turned into a CORS origin.
pub fn app(auth_state: Arc<auth::AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, openapi) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", openapi))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            general_limit,
        ))
        .layer(middleware::from_fn(strip_proxy_headers))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        );

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, auth_state: Arc<auth::AuthState>) -> Result<()> {
    let app = app(auth_state.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = sweep::spawn_sweeper(auth_state.clone(), shutdown_rx);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!(
        "Listening on [::]:{} (mode: {}, sessions: {})",
        port,
        auth_state.config().run_mode(),
        auth_state.sessions().backend_name()
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper.await {
        warn!("Sweeper task ended abnormally: {err}");
    }

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::harness;
    use axum::{body::to_bytes, extract::connect_info::MockConnectInfo, http::StatusCode};
    use std::net::{Ipv4Addr, SocketAddr};
    use tower::ServiceExt;

    #[test]
    fn frontend_origin_keeps_scheme_host_and_port() -> Result<()> {
        assert_eq!(
            frontend_origin("https://app.example.com/some/path")?,
            "https://app.example.com"
        );
        assert_eq!(
            frontend_origin("http://localhost:5173")?,
            "http://localhost:5173"
        );
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn app_serves_health_with_request_id() -> Result<()> {
        let harness = harness();
        let app = app(harness.state)?.layer(MockConnectInfo(SocketAddr::from((
            Ipv4Addr::new(10, 0, 0, 1),
            4000,
        ))));
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        Ok(())
    }

    #[tokio::test]
    async fn app_serves_openapi_document() -> Result<()> {
        let harness = harness();
        let response = app(harness.state)?
            .oneshot(Request::get("/api/openapi.json").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body = String::from_utf8(body.to_vec())?;
        assert!(body.contains("/api/auth/login"));
        Ok(())
    }

    #[tokio::test]
    async fn general_limit_applies_per_peer() -> Result<()> {
        let harness = harness();
        let app = app(harness.state)?.layer(MockConnectInfo(SocketAddr::from((
            Ipv4Addr::new(10, 0, 0, 9),
            4000,
        ))));
        for _ in 0..auth::rate_limit::GENERAL_LIMIT {
            let response = app
                .clone()
                .oneshot(Request::get("/api/openapi.json").body(Body::empty())?)
                .await?;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(
                Request::get("/api/openapi.json")
                    .header("x-forwarded-for", "203.0.113.7")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        Ok(())
    }
}
