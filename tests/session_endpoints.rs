use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use tryon_pipeline::api::server::{build_router_with_service, build_router_with_state, AppState};
use tryon_pipeline::edit::{EditOperation, EditableImage};
use tryon_pipeline::remote::health::HealthStatus;
use tryon_pipeline::remote::{RemoteEditError, RemoteEditService, StepResult};
use tryon_pipeline::settings::TryOnSettings;

#[tokio::test]
async fn upload_apply_all_and_download_flow() {
    let service = Arc::new(FakeEditService::default());
    let app = test_app(service.clone());

    let uploaded = send_raw(
        app.clone(),
        Method::PUT,
        "/api/session/base",
        png_bytes("face"),
        StatusCode::OK,
    )
    .await;
    assert_eq!(uploaded["has_base"], json!(true));
    assert_eq!(uploaded["base"]["media_type"], json!("image/png"));
    assert_eq!(uploaded["snapshot"]["state"]["status"], json!("idle"));

    let applied = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-all",
        Body::from(
            json!({"operations": [
                {"category": "lipstick", "parameters": {"color": "#CF2F3A"}},
                {"category": "foundation"},
                {"category": "blush", "parameters": {"intensity": "0.6"}}
            ]})
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;
    assert_eq!(applied["ok"], json!(true));
    assert_eq!(applied["snapshot"]["state"]["status"], json!("completed"));
    assert_eq!(applied["snapshot"]["progress"]["completed"], json!(3));
    assert_eq!(
        applied["snapshot"]["operations"],
        json!(["foundation", "blush", "lipstick"])
    );
    assert_eq!(service.categories(), vec!["foundation", "blush", "lipstick"]);

    let (status, content_type, bytes) = fetch_image(app.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(bytes, layered(&png_bytes("face"), &["foundation", "blush", "lipstick"]));

    let snapshot = send_json(
        app.clone(),
        Method::GET,
        "/api/session",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(snapshot["snapshot"]["current_image"], applied["image"]);
}

#[tokio::test]
async fn apply_one_builds_on_the_current_image() {
    let service = Arc::new(FakeEditService::default());
    let app = test_app(service.clone());
    upload(app.clone(), "face").await;

    for category in ["kohl", "mascara"] {
        let applied = send_json(
            app.clone(),
            Method::POST,
            "/api/session/apply-one",
            Body::from(json!({"category": category}).to_string()),
            StatusCode::OK,
        )
        .await;
        assert_eq!(applied["snapshot"]["progress"]["total"], json!(1));
    }

    let (_, _, bytes) = fetch_image(app.clone()).await;
    assert_eq!(bytes, layered(&png_bytes("face"), &["kohl", "mascara"]));
}

#[tokio::test]
async fn validation_errors_use_the_taxonomy() {
    let service = Arc::new(FakeEditService::default());
    let app = test_app(service.clone());

    let missing_base = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-all",
        Body::from(json!({"operations": [{"category": "blush"}]}).to_string()),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(missing_base["ok"], json!(false));
    assert_eq!(missing_base["error_kind"], json!("validation"));
    assert_eq!(missing_base["error_code"], json!("missing_base_image"));

    upload(app.clone(), "face").await;
    let empty = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-all",
        Body::from(json!({"operations": []}).to_string()),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(empty["error_code"], json!("nothing_selected"));

    let blank = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-one",
        Body::from(json!({"category": "  "}).to_string()),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(blank["error_code"], json!("invalid_operation"));

    let malformed = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-all",
        Body::from("{not json"),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(malformed["error_code"], json!("invalid_request"));

    let not_image = send_raw(
        app.clone(),
        Method::PUT,
        "/api/session/base",
        b"plain text".to_vec(),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(not_image["error_code"], json!("invalid_image"));

    assert!(service.categories().is_empty());
}

#[tokio::test]
async fn service_failure_keeps_last_good_image() {
    let service = Arc::new(FakeEditService::failing_on("lipstick", "invalid color"));
    let app = test_app(service.clone());
    upload(app.clone(), "face").await;

    let failed = send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-all",
        Body::from(
            json!({"operations": [
                {"category": "foundation"},
                {"category": "blush"},
                {"category": "lipstick"}
            ]})
            .to_string(),
        ),
        StatusCode::BAD_GATEWAY,
    )
    .await;
    assert_eq!(failed["error"], json!("invalid color"));
    assert_eq!(failed["error_kind"], json!("provider"));
    assert_eq!(failed["failed_step"]["step"], json!(3));

    let session = send_json(
        app.clone(),
        Method::GET,
        "/api/session",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(
        session["snapshot"]["state"],
        json!({"status": "failed", "reason": "invalid color"})
    );

    let (_, _, bytes) = fetch_image(app.clone()).await;
    assert_eq!(bytes, layered(&png_bytes("face"), &["foundation", "blush"]));
}

#[tokio::test]
async fn reset_returns_to_the_base_image() {
    let service = Arc::new(FakeEditService::default());
    let app = test_app(service.clone());

    let (status, _, _) = fetch_image(app.clone()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    upload(app.clone(), "face").await;
    send_json(
        app.clone(),
        Method::POST,
        "/api/session/apply-one",
        Body::from(json!({"category": "blush"}).to_string()),
        StatusCode::OK,
    )
    .await;

    let reset = send_json(
        app.clone(),
        Method::POST,
        "/api/session/reset",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(reset["has_base"], json!(true));
    assert_eq!(reset["snapshot"]["state"]["status"], json!("idle"));
    assert!(reset["snapshot"].get("current_image").is_none());

    let (_, _, bytes) = fetch_image(app.clone()).await;
    assert_eq!(bytes, png_bytes("face"));
}

#[tokio::test]
async fn catalog_lists_categories_in_layering_order() {
    let app = test_app(Arc::new(FakeEditService::default()));
    let catalog = send_json(
        app,
        Method::GET,
        "/api/catalog",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(catalog["family"], json!("makeup"));
    let keys = catalog["categories"]
        .as_array()
        .expect("categories should be an array")
        .iter()
        .map(|c| c["key"].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            json!("foundation"),
            json!("blush"),
            json!("eyeshadow"),
            json!("kohl"),
            json!("mascara"),
            json!("lipstick")
        ]
    );
    assert_eq!(catalog["categories"][5]["api_name"], json!("lips"));
    assert_eq!(catalog["categories"][5]["default_intensity"], json!(85));
}

#[tokio::test]
async fn health_reports_service_identity() {
    let app = test_app(Arc::new(FakeEditService::default()));
    let health = send_json(app, Method::GET, "/health", Body::empty(), StatusCode::OK).await;
    assert_eq!(health["ok"], json!(true));
    assert_eq!(health["service"], json!("tryon-pipeline"));
    assert_eq!(health["family"], json!("makeup"));
}

#[tokio::test]
async fn upstream_health_serves_the_monitored_status() {
    let (tx, rx) = watch::channel(HealthStatus {
        connected: true,
        checked_at: String::from("2026-10-16T09:00:00Z"),
        status_code: Some(200),
        detail: Some(json!({"status": "ok"})),
        error: None,
    });
    let state = AppState::new(
        &TryOnSettings::default(),
        Arc::new(FakeEditService::default()),
    )
    .expect("state should build")
    .with_upstream_status(rx);
    let app = build_router_with_state(state);

    let health = send_json(
        app.clone(),
        Method::GET,
        "/api/upstream/health",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(health["source"], json!("monitor"));
    assert_eq!(health["upstream"]["connected"], json!(true));
    assert_eq!(health["upstream"]["checked_at"], json!("2026-10-16T09:00:00Z"));

    tx.send_replace(HealthStatus {
        connected: false,
        checked_at: String::from("2026-10-16T09:00:03Z"),
        status_code: None,
        detail: None,
        error: Some(String::from("connection refused")),
    });
    let health = send_json(
        app,
        Method::GET,
        "/api/upstream/health",
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(health["upstream"]["connected"], json!(false));
    assert_eq!(health["upstream"]["error"], json!("connection refused"));
}

#[derive(Default)]
struct FakeEditService {
    seen: Mutex<Vec<String>>,
    failure: Option<(String, String)>,
}

impl FakeEditService {
    fn failing_on(category: &str, message: &str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            failure: Some((category.to_string(), message.to_string())),
        }
    }

    fn categories(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("fake edit service mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl RemoteEditService for FakeEditService {
    async fn apply(&self, image: &EditableImage, operation: &EditOperation) -> StepResult {
        self.seen
            .lock()
            .expect("fake edit service mutex poisoned")
            .push(operation.category.clone());
        if let Some((category, message)) = &self.failure {
            if category == &operation.category {
                return Err(RemoteEditError::Service {
                    status: Some(500),
                    message: message.clone(),
                });
            }
        }
        let out = layered(image.bytes(), &[operation.category.as_str()]);
        Ok(EditableImage::from_bytes(out).expect("fake output should be an image"))
    }
}

fn test_app(service: Arc<FakeEditService>) -> axum::Router {
    build_router_with_service(&TryOnSettings::default(), service).expect("router should build")
}

fn png_bytes(tag: &str) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    out.extend_from_slice(tag.as_bytes());
    out
}

fn layered(input: &[u8], categories: &[&str]) -> Vec<u8> {
    let mut out = input.to_vec();
    for category in categories {
        out.push(b'|');
        out.extend_from_slice(category.as_bytes());
    }
    out
}

async fn upload(app: axum::Router, tag: &str) {
    send_raw(
        app,
        Method::PUT,
        "/api/session/base",
        png_bytes(tag),
        StatusCode::OK,
    )
    .await;
}

async fn fetch_image(app: axum::Router) -> (StatusCode, Option<String>, Vec<u8>) {
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/session/image")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, content_type, body.to_vec())
}

async fn send_raw(
    app: axum::Router,
    method: Method,
    uri: &str,
    bytes: Vec<u8>,
    expected_status: StatusCode,
) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/octet-stream")
        .body(Body::from(bytes))
        .expect("request should build");
    read_json(app, request, expected_status).await
}

async fn send_json(
    app: axum::Router,
    method: Method,
    uri: &str,
    body: Body,
    expected_status: StatusCode,
) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .expect("request should build");
    read_json(app, request, expected_status).await
}

async fn read_json(
    app: axum::Router,
    request: Request<Body>,
    expected_status: StatusCode,
) -> Value {
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), expected_status);

    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(body.as_ref()).expect("response should be valid JSON")
}
