//! Integration tests for the Meshy HTTP client against a local test server.
//!
//! A small axum app stands in for the Meshy API so the real reqwest client
//! is exercised end to end: auth header, request bodies, status mapping and
//! streaming downloads.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use meshforge_core::runner::{JobRunner, RemoteStatus, RunnerError, StageRequest};
use meshforge_core::work_item::GenerationParams;
use meshforge_meshy::{MeshyApi, MeshyConfig};
use serde_json::{json, Value};

const API_KEY: &str = "test-key";
const MODEL_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct FakeMeshy {
    addr: SocketAddr,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn create_task(
    State(state): State<FakeMeshy>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != format!("Bearer {API_KEY}") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad key"})));
    }
    state.bodies.lock().unwrap().push(body);
    (StatusCode::ACCEPTED, Json(json!({"result": "task-1"})))
}

async fn get_task(State(state): State<FakeMeshy>, Path(id): Path<String>) -> impl IntoResponse {
    match id.as_str() {
        "task-1" => (
            StatusCode::OK,
            Json(json!({
                "id": "task-1",
                "status": "SUCCEEDED",
                "progress": 100,
                "model_urls": {"glb": format!("http://{}/files/model.glb", state.addr)},
                "task_error": {"message": ""}
            })),
        ),
        "running" => (
            StatusCode::OK,
            Json(json!({"id": "running", "status": "IN_PROGRESS", "progress": 35})),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "boom"})),
        ),
    }
}

async fn model_file() -> impl IntoResponse {
    vec![7u8; MODEL_BYTES]
}

async fn missing_file() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "gone")
}

/// Spawn the fake API on an ephemeral port and return a client pointed at it.
async fn spawn_fake() -> (MeshyApi, FakeMeshy) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = FakeMeshy {
        addr,
        bodies: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/openapi/v2/text-to-3d", post(create_task))
        .route("/openapi/v2/text-to-3d/{id}", get(get_task))
        .route("/files/model.glb", get(model_file))
        .route("/files/missing.glb", get(missing_file))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (client_for(addr, API_KEY), state)
}

fn client_for(addr: SocketAddr, key: &str) -> MeshyApi {
    let mut config = MeshyConfig::new(key);
    config.base_url = format!("http://{addr}/openapi/v2");
    MeshyApi::new(config)
}

fn preview_request() -> StageRequest {
    StageRequest::Preview(GenerationParams {
        prompt: "Low-poly goblin".to_string(),
        negative_prompt: "photorealistic".to_string(),
        target_polycount: 5000,
        art_style: "realistic".to_string(),
        topology: "triangle".to_string(),
        should_remesh: true,
        enable_pbr: true,
    })
}

// ---------------------------------------------------------------------------
// submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_sends_bearer_and_preview_body() {
    let (api, fake) = spawn_fake().await;

    let id = api.submit(&preview_request()).await.unwrap();

    assert_eq!(id, "task-1");
    let bodies = fake.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["mode"], "preview");
    assert_eq!(bodies[0]["prompt"], "Low-poly goblin");
}

#[tokio::test]
async fn submit_refine_sends_preview_id() {
    let (api, fake) = spawn_fake().await;

    let req = StageRequest::Refine {
        preview_task_id: "prev-1".to_string(),
        enable_pbr: true,
    };
    api.submit(&req).await.unwrap();

    let bodies = fake.bodies.lock().unwrap();
    assert_eq!(bodies[0]["mode"], "refine");
    assert_eq!(bodies[0]["preview_task_id"], "prev-1");
}

#[tokio::test]
async fn submit_with_wrong_key_is_service_error() {
    let (_, fake) = spawn_fake().await;
    let api = client_for(fake.addr, "wrong");

    let err = api.submit(&preview_request()).await.unwrap_err();

    assert_matches!(err, RunnerError::Service { status: 401, .. });
}

#[tokio::test]
async fn submit_to_unreachable_host_is_transport_error() {
    // Bind then drop to get a port nobody is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = client_for(addr, API_KEY);

    let err = api.submit(&preview_request()).await.unwrap_err();

    assert_matches!(err, RunnerError::Transport(_));
}

// ---------------------------------------------------------------------------
// query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_succeeded_task_returns_model_url() {
    let (api, fake) = spawn_fake().await;

    let snap = api.query("task-1").await;

    assert_eq!(snap.status, RemoteStatus::Succeeded);
    assert_eq!(
        snap.model_urls.glb,
        Some(format!("http://{}/files/model.glb", fake.addr))
    );
}

#[tokio::test]
async fn query_running_task_reports_progress() {
    let (api, _) = spawn_fake().await;

    let snap = api.query("running").await;

    assert_eq!(snap.status, RemoteStatus::InProgress);
    assert_eq!(snap.progress, 35);
}

#[tokio::test]
async fn query_server_error_maps_to_error_status() {
    let (api, _) = spawn_fake().await;

    let snap = api.query("broken").await;

    assert_eq!(snap.status, RemoteStatus::Error);
    assert!(snap.error.unwrap().contains("500"));
}

// ---------------------------------------------------------------------------
// fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_streams_artifact_to_nested_destination() {
    let (api, fake) = spawn_fake().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("Models/Enemies/goblin.glb");

    let written = api
        .fetch(&format!("http://{}/files/model.glb", fake.addr), &dest)
        .await
        .unwrap();

    assert_eq!(written, MODEL_BYTES as u64);
    assert_eq!(std::fs::read(&dest).unwrap().len(), MODEL_BYTES);
}

#[tokio::test]
async fn fetch_not_found_leaves_no_file() {
    let (api, fake) = spawn_fake().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("goblin.glb");

    let err = api
        .fetch(&format!("http://{}/files/missing.glb", fake.addr), &dest)
        .await
        .unwrap_err();

    assert_matches!(err, RunnerError::Service { status: 404, .. });
    assert!(!dest.exists());
    assert!(!meshforge_meshy::download::part_path(&dest).exists());
}
