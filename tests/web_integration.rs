//! Exercises the HTTP RPC surface through the axum router directly (no
//! bound socket) via `tower::ServiceExt::oneshot`.

use axum::http::{StatusCode, header};
use http_body_util::BodyExt;
use p1gen::config::{Config, parse_f64};
use p1gen::policies::CommonTunables;
use p1gen::registry::Registry;
use p1gen::settings::Settings;
use p1gen::web::{AppState, router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

fn build_state(settings_path: std::path::PathBuf) -> (Config, AppState) {
    let config = Config::new();
    let _common = CommonTunables::subscribe(&config);
    let registry = Registry::new();
    let state = AppState {
        registry: Arc::new(Mutex::new(registry)),
        settings: Settings::new(settings_path),
        doc_root: std::env::temp_dir(),
        simulator: None,
    };
    (config, state)
}

/// Scenario E — a settings write that returns 204 persists to disk, and a
/// freshly constructed `Settings`/`Config` pair (simulating process restart)
/// observes the written value.
#[tokio::test]
async fn settings_write_survives_a_simulated_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let (config, state) = build_state(path.clone());
    let settings_param = p1gen::settings::SettingsParam::subscribe(
        &state.settings,
        &config,
        "max_current",
        16.0,
        parse_f64,
    );

    let app = router(state);
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/settings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from(r#"{"max_current": 20.0}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(settings_param.get(), 20.0);

    // Simulate a process restart: a fresh Config/Settings pair reading the
    // same on-disk path.
    let restarted_config = Config::new();
    let restarted_settings = Settings::new(path);
    let restarted_param = p1gen::settings::SettingsParam::subscribe(
        &restarted_settings,
        &restarted_config,
        "max_current",
        16.0,
        parse_f64,
    );
    assert_eq!(restarted_param.get(), 20.0);

    let restarted_state = AppState {
        registry: Arc::new(Mutex::new(Registry::new())),
        settings: restarted_settings,
        doc_root: std::env::temp_dir(),
        simulator: None,
    };
    let app = router(restarted_state);
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/settings")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["max_current"], 20.0);
}

/// Unknown API routes report 404 per the §6 error taxonomy, while unknown
/// static paths also report 404 (same status, different reason).
#[tokio::test]
async fn unknown_api_route_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (_config, state) = build_state(dir.path().join("settings.json"));
    let app = router(state);
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/does_not_exist")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
