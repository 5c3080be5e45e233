//! HTTP RPC surface and static file serving.
//!
//! Every handler dispatches through the same `Arc<tokio::sync::Mutex<Registry>>`
//! the scheduler holds across a tick; there is no separate read-only snapshot.

use crate::error::ControllerError;
use crate::registry::Registry;
use crate::settings::Settings;
use crate::simulator::{SimulatorHandle, SimulatorInput};
use axum::{
    Json, Router,
    extract::{OriginalUri, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Mutex<Registry>>,
    pub settings: Settings,
    pub doc_root: PathBuf,
    /// Present only when the simulator plugin is registered in place of the
    /// real producer/consumer pair (§4.7); `None` routes 404 for its RPCs.
    pub simulator: Option<SimulatorHandle>,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Installed as every API route's method-mismatch fallback so an
/// unsupported verb on a matched path reports 400, matching the error
/// taxonomy (§6), instead of axum's default 405.
async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "method not allowed")
}

async fn get_policies(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    let policies: Vec<_> = registry
        .list_policies()
        .into_iter()
        .map(|(index, info)| {
            json!({
                "index": index,
                "name": info.name,
                "icon": info.icon,
                "label": info.label,
                "description": info.description,
            })
        })
        .collect();
    Json(policies)
}

async fn get_curcap(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    let budget = registry.snapshot_budget();
    let curcap = match registry.snapshot_situation() {
        Some(situation) => {
            (budget.current * situation.grid_voltage() * situation.grid.len() as f64).round()
                as i64
        }
        None => 0,
    };
    Json(curcap)
}

async fn get_monitor(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    let budget = registry.snapshot_budget();
    let situation = match registry.snapshot_situation() {
        Some(situation) => json!({
            "battery_state": situation.battery_state(),
            "inverter_output": situation.inverter_output,
            "battery_output": situation.battery_output,
            "solar_output": situation.solar_output(),
            "consumption": situation.consumption(),
            "grid": situation.grid.iter().map(|p| json!({
                "voltage": p.voltage,
                "current": p.current,
                "power": p.power(),
            })).collect::<Vec<_>>(),
        }),
        None => serde_json::Value::Null,
    };
    Json(json!({
        "budget": { "current": budget.current },
        "situation": situation,
    }))
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.to_json())
}

async fn post_settings(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(updates) = body.as_object() else {
        return (StatusCode::BAD_REQUEST, "expected a JSON object").into_response();
    };
    match state.settings.apply_and_persist(updates) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn post_activate_policy(
    State(state): State<AppState>,
    Json(index): Json<u32>,
) -> impl IntoResponse {
    let mut registry = state.registry.lock().await;
    if registry.policy(index).is_none() {
        return ControllerError::policy_not_found(index).into_response();
    }
    registry.set_active_policy(index);
    StatusCode::NO_CONTENT.into_response()
}

async fn get_simulator_input(State(state): State<AppState>) -> Response {
    match &state.simulator {
        Some(handle) => Json(handle.get_input()).into_response(),
        None => (StatusCode::NOT_FOUND, "simulator not enabled").into_response(),
    }
}

async fn post_simulator_input(
    State(state): State<AppState>,
    Json(input): Json<SimulatorInput>,
) -> Response {
    match &state.simulator {
        Some(handle) => {
            handle.set_input(input);
            StatusCode::NO_CONTENT.into_response()
        }
        None => (StatusCode::NOT_FOUND, "simulator not enabled").into_response(),
    }
}

async fn get_simulator_output(State(state): State<AppState>) -> Response {
    match &state.simulator {
        Some(handle) => Json(handle.get_output()).into_response(),
        None => (StatusCode::NOT_FOUND, "simulator not enabled").into_response(),
    }
}

fn content_type_for(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

async fn static_file(State(state): State<AppState>, OriginalUri(uri): OriginalUri) -> Response {
    let requested = uri.path().trim_start_matches('/').to_string();
    if requested.contains("..") {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }
    let relative = if requested.is_empty() || requested.ends_with('/') {
        format!("{requested}index.html")
    } else {
        requested
    };
    let full_path = state.doc_root.join(&relative);
    match tokio::fs::read(&full_path).await {
        Ok(bytes) => {
            let content_type = content_type_for(&full_path);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
        Err(e) => {
            error!("static file read failed for {}: {e}", full_path.display());
            (StatusCode::INTERNAL_SERVER_ERROR, "i/o error").into_response()
        }
    }
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/health", get(health).fallback(method_not_allowed))
        .route(
            "/api/policies",
            get(get_policies).fallback(method_not_allowed),
        )
        .route("/api/curcap", get(get_curcap).fallback(method_not_allowed))
        .route("/api/monitor", get(get_monitor).fallback(method_not_allowed))
        .route(
            "/api/settings",
            get(get_settings)
                .post(post_settings)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/activate_policy",
            post(post_activate_policy).fallback(method_not_allowed),
        )
        .route(
            "/api/simulator/input",
            get(get_simulator_input)
                .post(post_simulator_input)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/simulator/output",
            get(get_simulator_output).fallback(method_not_allowed),
        )
        .fallback(get(static_file))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    #[cfg(feature = "compression")]
    let router = router.layer(tower_http::compression::CompressionLayer::new());

    router
}

pub async fn serve(state: AppState, host: &str, port: u16) -> crate::error::Result<()> {
    let router = router(state);
    let addr: std::net::SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ControllerError::web(format!("invalid bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::web(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| ControllerError::web(format!("server error: {e}")))
}
