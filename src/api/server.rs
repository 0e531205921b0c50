use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handler_utils::{into_json, ApiObject};
use crate::api::session::TryOnSession;
use crate::edit::catalog::CategoryFamily;
use crate::pipeline::PipelineController;
use crate::remote::health::{HealthError, HealthProbe, HealthStatus};
use crate::remote::http::HttpEditService;
use crate::remote::{RemoteEditError, SharedRemoteEditService};
use crate::settings::TryOnSettings;

const MAX_IMAGE_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub family: CategoryFamily,
    pub session: Arc<TryOnSession>,
    pub upstream: Arc<HealthProbe>,
    /// Latest status from the background monitor. Without one, each request probes.
    pub upstream_status: Option<watch::Receiver<HealthStatus>>,
}

impl AppState {
    pub fn new(
        settings: &TryOnSettings,
        service: SharedRemoteEditService,
    ) -> Result<Self, ServerError> {
        let controller = PipelineController::new(service, settings.family);
        let upstream = HealthProbe::new(
            &settings.api_base,
            settings.health_path.as_str(),
            settings.request_timeout,
        )?;
        Ok(Self {
            service_name: "tryon-pipeline",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            family: settings.family,
            session: Arc::new(TryOnSession::new(controller)),
            upstream: Arc::new(upstream),
            upstream_status: None,
        })
    }

    pub fn with_upstream_status(mut self, status: watch::Receiver<HealthStatus>) -> Self {
        self.upstream_status = Some(status);
        self
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    EditService(#[from] RemoteEditError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error("http server error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_router(settings: &TryOnSettings) -> Result<Router, ServerError> {
    let service: SharedRemoteEditService =
        Arc::new(HttpEditService::new(settings.edit_service_config())?);
    build_router_with_service(settings, service)
}

pub fn build_router_with_service(
    settings: &TryOnSettings,
    service: SharedRemoteEditService,
) -> Result<Router, ServerError> {
    Ok(build_router_with_state(AppState::new(settings, service)?))
}

pub fn build_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/upstream/health", get(upstream_health_handler))
        .route("/api/catalog", get(crate::api::catalog::get_catalog_handler))
        .route("/api/session", get(crate::api::session::get_session_handler))
        .route(
            "/api/session/base",
            put(crate::api::session::put_base_handler),
        )
        .route(
            "/api/session/apply-one",
            post(crate::api::session::apply_one_handler),
        )
        .route(
            "/api/session/apply-all",
            post(crate::api::session::apply_all_handler),
        )
        .route("/api/session/reset", post(crate::api::session::reset_handler))
        .route(
            "/api/session/image",
            get(crate::api::session::get_image_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_IMAGE_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: TryOnSettings) -> Result<(), ServerError> {
    let service = HttpEditService::new(settings.edit_service_config())?;
    let endpoint = service.endpoint().clone();
    let state = AppState::new(&settings, Arc::new(service))?;
    let (upstream_status, _monitor) = state
        .upstream
        .clone()
        .spawn_monitor(settings.health_interval);
    let state = state.with_upstream_status(upstream_status);

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    info!(
        bind = %settings.bind,
        endpoint = %endpoint,
        family = %settings.family,
        "starting tryon-pipeline HTTP surface"
    );
    axum::serve(listener, build_router_with_state(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "family": state.family,
        })),
    )
}

async fn upstream_health_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let (source, status) = match &state.upstream_status {
        Some(status) => ("monitor", status.borrow().clone()),
        None => ("probe", state.upstream.check().await),
    };
    (
        StatusCode::OK,
        into_json(json!({
            "ok": true,
            "url": state.upstream.url().as_str(),
            "source": source,
            "upstream": status,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
