use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Extension, Query},
    http::{
        header::{CONTENT_TYPE, USER_AGENT},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracklog_core::{format_timestamp, SessionError, SessionResult, SessionService};

use crate::config::{CorsConfig, ServerConfig};

/// Carries the follower's next cursor on every follow response.
pub const FOLLOW_POSITION_HEADER: HeaderName = HeaderName::from_static("x-follow-position");

#[derive(Clone)]
struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    service: Arc<SessionService>,
}

impl HttpState {
    fn new(service: Arc<SessionService>) -> Self {
        Self {
            inner: Arc::new(HttpStateInner { service }),
        }
    }

    fn service(&self) -> Arc<SessionService> {
        Arc::clone(&self.inner.service)
    }
}

#[derive(Debug)]
enum ApiError {
    /// `public` is what a server-side failure looks like to the client.
    Session {
        err: SessionError,
        public: &'static str,
    },
    Internal(anyhow::Error),
}

impl ApiError {
    fn session(public: &'static str) -> impl FnOnce(SessionError) -> Self {
        move |err| ApiError::Session { err, public }
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Session { err, .. } if err.is_client_error() => {
                tracing::warn!("rejected request: {err}");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "status": "error",
                        "code": err.code(),
                        "error": err.to_string(),
                    })),
                )
                    .into_response()
            }
            ApiError::Session { err, public } => {
                tracing::error!("{public}: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "status": "error",
                        "code": err.code(),
                        "error": public,
                    })),
                )
                    .into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("HTTP handler error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "status": "error", "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    upload_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowParams {
    upload_key: Option<String>,
    position: Option<String>,
}

pub fn build_router(service: Arc<SessionService>, config: &ServerConfig) -> Router {
    let state = HttpState::new(service);

    let mut router = Router::new()
        .route("/api/new-upload-key", post(new_upload_key))
        .route("/api/upload", post(upload))
        .route("/api/follow", get(follow))
        .route("/health", get(health));

    if let Some(dir) = &config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(build_cors_layer(config.cors.as_ref()))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(service: Arc<SessionService>, config: ServerConfig) -> Result<()> {
    let addr = config.bind_addr()?;
    let router = build_router(service, &config);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind tracklog server to {addr}"))?;

    tracing::info!(
        "Serving http on {addr} (uploads in {})",
        config.upload_dir.display()
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server encountered an unrecoverable error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Runs a blocking core operation off the async executor.
async fn run_blocking<T, F>(op: F, public: &'static str) -> Result<T, ApiError>
where
    F: FnOnce() -> SessionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::session(public))
}

async fn new_upload_key(Extension(state): Extension<HttpState>) -> Result<Response, ApiError> {
    let issued = state
        .service()
        .issue_key()
        .map_err(ApiError::session("failed to generate upload key"))?;

    Ok(Json(json!({
        "status": "ok",
        "name": issued.name,
        "upload_key": issued.key.as_str(),
    }))
    .into_response())
}

async fn upload(
    Extension(state): Extension<HttpState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let service = state.service();
    let receipt = run_blocking(
        move || service.upload(params.upload_key.as_deref(), body.as_ref(), &user_agent),
        "failed to store upload",
    )
    .await?;

    Ok(Json(json!({
        "status": "ok",
        "records": receipt.records,
        "received_at": format_timestamp(&receipt.received_at),
        "file_path": receipt.file_path.display().to_string(),
        "upload_name": receipt.upload_name,
    }))
    .into_response())
}

async fn follow(
    Extension(state): Extension<HttpState>,
    Query(params): Query<FollowParams>,
) -> Result<Response, ApiError> {
    let service = state.service();
    let outcome = run_blocking(
        move || service.follow(params.upload_key.as_deref(), params.position.as_deref()),
        "failed to read upload",
    )
    .await?;

    let position = HeaderValue::from(outcome.position);
    if !outcome.has_new_data() {
        return Ok((StatusCode::NO_CONTENT, [(FOLLOW_POSITION_HEADER, position)]).into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (FOLLOW_POSITION_HEADER, position),
            (
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
        ],
        outcome.body(),
    )
        .into_response())
}

async fn health(Extension(state): Extension<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "issued_keys": state.service().registry().len(),
    }))
}

fn build_cors_layer(config: Option<&CorsConfig>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([FOLLOW_POSITION_HEADER]);

    if let Some(cors) = config {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        if !origins.is_empty() {
            return layer.allow_origin(AllowOrigin::list(origins));
        }
    }

    layer
}
