use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokenwatch_config::{IntSetting, StringSetting, WebConfig};
use tokenwatch_core_types::Chain;
use tokenwatch_pipeline::StatusSnapshot;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::monitor::ChainMonitors;

#[derive(Clone)]
pub(crate) struct WebState {
    monitors: Arc<ChainMonitors>,
    auth_token: Arc<str>,
}

impl WebState {
    pub(crate) fn new(monitors: Arc<ChainMonitors>, auth_token: &str) -> Self {
        Self {
            monitors,
            auth_token: Arc::from(auth_token.trim()),
        }
    }
}

pub(crate) async fn run_server(state: WebState, web_config: WebConfig) -> Result<()> {
    if state.auth_token.is_empty() {
        warn!("web auth token is empty; operator endpoints are unauthenticated");
    }
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&web_config.bind_addr)
        .await
        .with_context(|| format!("failed to bind web server on {}", web_config.bind_addr))?;
    info!(bind = %web_config.bind_addr, "web server started");
    axum::serve(listener, app)
        .await
        .context("axum web server failed")?;
    Ok(())
}

pub(crate) fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/monitor/:chain/start", post(start_monitoring))
        .route("/monitor/:chain/stop", post(stop_monitoring))
        .route("/settings", get(get_settings).post(update_setting))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "status": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

fn ensure_authorized(state: &WebState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.auth_token.as_ref();
    if expected.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if provided == Some(expected) {
        return Ok(());
    }
    Err(ApiError::unauthorized("invalid bearer token"))
}

fn parse_chain(raw: &str) -> Result<Chain, ApiError> {
    raw.parse::<Chain>().map_err(ApiError::bad_request)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn status(
    State(state): State<WebState>,
    headers: HeaderMap,
) -> Result<Json<StatusSnapshot>, ApiError> {
    ensure_authorized(&state, &headers)?;
    Ok(Json(state.monitors.status()))
}

#[derive(Debug, Serialize)]
struct MonitorResponse {
    chain: Chain,
    changed: bool,
    monitoring_active: bool,
}

async fn start_monitoring(
    State(state): State<WebState>,
    Path(chain): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MonitorResponse>, ApiError> {
    ensure_authorized(&state, &headers)?;
    let chain = parse_chain(&chain)?;
    let changed = state.monitors.start(chain).await;
    Ok(Json(MonitorResponse {
        chain,
        changed,
        monitoring_active: state.monitors.is_active(chain),
    }))
}

async fn stop_monitoring(
    State(state): State<WebState>,
    Path(chain): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MonitorResponse>, ApiError> {
    ensure_authorized(&state, &headers)?;
    let chain = parse_chain(&chain)?;
    let changed = state.monitors.stop(chain).await;
    Ok(Json(MonitorResponse {
        chain,
        changed,
        monitoring_active: state.monitors.is_active(chain),
    }))
}

fn settings_view(state: &WebState) -> BTreeMap<&'static str, Value> {
    let settings = state.monitors.settings();
    let mut view: BTreeMap<&'static str, Value> = IntSetting::ALL
        .into_iter()
        .filter_map(|setting| {
            settings
                .get_int(setting.key())
                .ok()
                .map(|value| (setting.key(), Value::from(value)))
        })
        .collect();
    view.insert(
        StringSetting::NotifyChatId.key(),
        Value::from(settings.snapshot().chat_id),
    );
    view
}

async fn get_settings(
    State(state): State<WebState>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<&'static str, Value>>, ApiError> {
    ensure_authorized(&state, &headers)?;
    Ok(Json(settings_view(&state)))
}

#[derive(Debug, Deserialize)]
struct SettingUpdate {
    key: String,
    value: String,
}

async fn update_setting(
    State(state): State<WebState>,
    headers: HeaderMap,
    Json(update): Json<SettingUpdate>,
) -> Result<Json<BTreeMap<&'static str, Value>>, ApiError> {
    ensure_authorized(&state, &headers)?;
    let settings = state.monitors.settings();
    let applied = if update.key.parse::<StringSetting>().is_ok() {
        settings.set_string(&update.key, &update.value)
    } else {
        settings.set_int(&update.key, &update.value).map(|_| ())
    };
    if let Err(error) = applied {
        warn!(key = %update.key, error = %error, "setting update rejected");
        return Err(ApiError::bad_request(error.to_string()));
    }
    info!(key = %update.key, value = %update.value, "setting updated");
    Ok(Json(settings_view(&state)))
}
