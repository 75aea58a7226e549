//! Upload client tests against a local mock of the inference service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use emoscan_client::{InferenceClient, UploadRequest};
use emoscan_core::config::ServerConfig;
use emoscan_core::error::EmoscanError;
use emoscan_core::types::MediaKind;

// =============================================================================
// Mock service
// =============================================================================

const HAPPY_BODY: &str = r#"{"status":"success","filename":"clip.mp4","prediction":{"emotion":"happy","emotion_id":2,"confidence":0.92},"probabilities":{"happy":0.92,"sad":0.08},"features":{"audio_shape":[40],"video_shape":[30,3],"image_shape":[]}}"#;

#[derive(Clone, Debug, Default)]
struct Captured {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: String,
    hits: Arc<AtomicUsize>,
    parts: Arc<Mutex<Vec<Captured>>>,
}

async fn predict(State(state): State<MockState>, mut multipart: Multipart) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    while let Some(field) = multipart.next_field().await.unwrap() {
        let captured = Captured {
            name: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            data: field.bytes().await.unwrap().to_vec(),
        };
        state.parts.lock().unwrap().push(captured);
    }
    (state.status, state.body.clone())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "device": "cpu", "model_loaded": true}))
}

async fn model_info() -> Json<Value> {
    Json(json!({
        "model_name": "LateFusionModel",
        "num_classes": 8,
        "emotions": ["neutral", "calm", "happy", "sad", "angry", "fearful", "disgust", "surprised"],
        "total_parameters": 1000,
        "trainable_parameters": 900,
        "input_dimensions": {"audio": 40, "video": 3, "image": 512}
    }))
}

async fn spawn_service(status: StatusCode, body: &str) -> (SocketAddr, MockState) {
    let state = MockState {
        status,
        body: body.to_string(),
        hits: Arc::new(AtomicUsize::new(0)),
        parts: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .route("/model-info", get(model_info))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn client_for(addr: SocketAddr) -> InferenceClient {
    let config = ServerConfig {
        base_url: format!("http://{}", addr),
        connect_timeout_secs: 2,
        read_timeout_secs: 5,
        write_timeout_secs: 5,
    };
    InferenceClient::new(&config).unwrap()
}

fn write_media(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_predict_success_sends_all_form_fields() {
    let (addr, state) = spawn_service(StatusCode::OK, HAPPY_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "clip.mp4", b"fake video bytes");

    let request = UploadRequest::new(&path).with_description("birthday");
    let response = client_for(addr).predict(&request).await.unwrap();

    assert_eq!(response.prediction.emotion, "happy");
    assert_eq!(response.prediction.emotion_id, 2);
    assert!((response.prediction.confidence - 0.92).abs() < 1e-6);

    let parts = state.parts.lock().unwrap().clone();
    let field = |name: &str| parts.iter().find(|p| p.name == name).cloned().unwrap();

    let file = field("file");
    assert_eq!(file.file_name.as_deref(), Some("clip.mp4"));
    assert_eq!(file.content_type.as_deref(), Some("video/*"));
    assert_eq!(file.data, b"fake video bytes");

    assert_eq!(field("description").data, b"birthday");
    assert_eq!(field("media_type").data, b"video");
    let upload_time: i64 = String::from_utf8(field("upload_time").data)
        .unwrap()
        .parse()
        .unwrap();
    assert!(upload_time > 0);
}

#[tokio::test]
async fn test_upload_returns_raw_body() {
    let (addr, _state) = spawn_service(StatusCode::OK, HAPPY_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "face.jpg", &[0xFF, 0xD8, 0xFF]);

    let body = client_for(addr)
        .upload(&UploadRequest::new(&path))
        .await
        .unwrap();
    assert_eq!(body, HAPPY_BODY);
}

#[tokio::test]
async fn test_image_upload_content_type() {
    let (addr, state) = spawn_service(StatusCode::OK, HAPPY_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "face.png", b"png");

    client_for(addr)
        .upload(&UploadRequest::new(&path))
        .await
        .unwrap();

    let parts = state.parts.lock().unwrap();
    let file = parts.iter().find(|p| p.name == "file").unwrap();
    assert_eq!(file.content_type.as_deref(), Some("image/*"));
    let kind = parts.iter().find(|p| p.name == "media_type").unwrap();
    assert_eq!(kind.data, b"image");
}

#[tokio::test]
async fn test_server_error_is_reported_once_without_retry() {
    let (addr, state) = spawn_service(StatusCode::INTERNAL_SERVER_ERROR, "server error").await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "clip.mp4", b"x");

    let err = client_for(addr)
        .upload(&UploadRequest::new(&path))
        .await
        .unwrap_err();

    match &err {
        EmoscanError::Server { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "server error");
        }
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(err.to_string(), "Server returned error: 500 - server error");
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_status_in_body_is_a_decode_failure() {
    let (addr, _state) = spawn_service(
        StatusCode::OK,
        r#"{"status":"error","message":"no face found"}"#,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "face.jpg", b"x");

    let err = client_for(addr)
        .predict(&UploadRequest::new(&path))
        .await
        .unwrap_err();
    assert!(matches!(err, EmoscanError::Decode(_)));
    assert!(err.to_string().contains("no face found"));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let path = write_media(&dir, "clip.mp4", b"x");

    let err = client_for(addr)
        .upload(&UploadRequest::new(&path))
        .await
        .unwrap_err();
    assert!(matches!(err, EmoscanError::Network(_)));
    assert!(err.to_string().starts_with("Network error: "));
}

#[tokio::test]
async fn test_invalid_input_never_reaches_server() {
    let (addr, state) = spawn_service(StatusCode::OK, HAPPY_BODY).await;
    let dir = tempfile::tempdir().unwrap();
    let notes = write_media(&dir, "notes.txt", b"hello");

    let client = client_for(addr);
    assert!(matches!(
        client.upload(&UploadRequest::new(&notes)).await,
        Err(EmoscanError::InvalidInput(_))
    ));
    assert!(matches!(
        client
            .upload(&UploadRequest::new(dir.path().join("gone.mp4")))
            .await,
        Err(EmoscanError::InvalidInput(_))
    ));
    let forced = UploadRequest::new(&notes).with_media_kind(MediaKind::Generic);
    assert!(client.upload(&forced).await.is_err());

    assert_eq!(state.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_and_model_info() {
    let (addr, _state) = spawn_service(StatusCode::OK, HAPPY_BODY).await;
    let client = client_for(addr);

    let health = client.health().await.unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.device, "cpu");

    let info = client.model_info().await.unwrap();
    assert_eq!(info.model_name, "LateFusionModel");
    assert_eq!(info.num_classes, 8);
    assert_eq!(info.input_dimensions.get("audio"), Some(&40));
}
