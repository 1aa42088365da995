// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! HTTP route tests driven through the router without a socket.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{FakeSegmenter, encoded_image, pipeline, pipeline_with, settings};
use image::ImageFormat;
use segment_serve::codec;
use segment_serve::config::DEFAULT_BODY_LIMIT;
use segment_serve::server::dto::{Base64Response, ErrorResponse, HealthResponse, InfoResponse};
use segment_serve::server::handlers::NO_OBJECTS;
use segment_serve::server::{AppState, build_router};
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "segment-serve-test-boundary";

fn app() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(pipeline(dir.path()));
    (build_router(state, DEFAULT_BODY_LIMIT), dir)
}

fn empty_app() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(pipeline_with(FakeSegmenter::empty(2), settings(dir.path())));
    (build_router(state, DEFAULT_BODY_LIMIT), dir)
}

fn multipart_request(uri: &str, file_name: Option<&str>, data: &[u8]) -> Request<Body> {
    let disposition = match file_name {
        Some(name) => format!("form-data; name=\"image\"; filename=\"{name}\""),
        None => "form-data; name=\"note\"".to_string(),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, value: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn content_type(response: &axum::response::Response) -> &str {
    response.headers()[header::CONTENT_TYPE].to_str().unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let (app, _dir) = app();

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, segment_serve::VERSION);
}

#[tokio::test]
async fn test_openapi_is_served() {
    let (app, _dir) = app();
    let response = app.oneshot(get("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc: serde_json::Value = body_json(response).await;
    for path in ["/visualize", "/extract", "/base64", "/changemodel"] {
        assert!(doc["paths"].get(path).is_some(), "missing {path}");
    }
}

#[tokio::test]
async fn test_info_reports_active_model() {
    let (app, _dir) = app();
    let response = app.oneshot(get("/info")).await.unwrap();
    let info: InfoResponse = body_json(response).await;
    assert_eq!(info.model_name, "fake");
    assert_eq!(info.generation, 0);
    assert_eq!(info.num_classes, Some(2));
    assert_eq!(info.class_names, common::NAMES);
}

#[tokio::test]
async fn test_extract_returns_first_crop() {
    let (app, dir) = app();
    let data = encoded_image(64, 48, ImageFormat::Png);

    let response = app
        .oneshot(multipart_request("/extract", Some("photo.png"), &data))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/png");

    let crop = codec::decode(&body_bytes(response).await, None).unwrap();
    let roi = common::fake_rois(64, 48)[0];
    assert_eq!(crop.dims(), (roi.height(), roi.width()));

    // The request directory is gone once the crop is served.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_repeated_extract_keeps_output_root_bounded() {
    let (app, dir) = app();
    let data = encoded_image(64, 48, ImageFormat::Png);

    for _ in 0..4 {
        let response = app
            .clone()
            .oneshot(multipart_request("/extract", Some("photo.png"), &data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_extract_without_detections() {
    let (app, _dir) = empty_app();
    let data = encoded_image(32, 32, ImageFormat::Png);

    let response = app
        .oneshot(multipart_request("/extract", Some("photo.png"), &data))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, NO_OBJECTS.as_bytes());
}

#[tokio::test]
async fn test_extract_rejects_missing_or_broken_upload() {
    let (app, _dir) = app();

    let response = app
        .clone()
        .oneshot(multipart_request("/extract", None, b"just text"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(multipart_request("/extract", Some("photo.png"), b"not an image"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = body_json(response).await;
    assert!(error.error.starts_with("Decode error"));
}

#[tokio::test]
async fn test_visualize_returns_jpeg() {
    let (app, _dir) = app();
    let data = encoded_image(64, 48, ImageFormat::Png);

    let response = app
        .oneshot(multipart_request("/visualize", Some("photo.png"), &data))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/jpeg");

    let overlay = codec::decode(&body_bytes(response).await, None).unwrap();
    assert_eq!(overlay.dims(), (64, 48));
}

#[tokio::test]
async fn test_base64_returns_crops_and_detections() {
    let (app, _dir) = app();
    let text = STANDARD.encode(encoded_image(64, 48, ImageFormat::Png));

    let response = app
        .oneshot(json_request("/base64", &json!({ "base64Image": text })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = body_json(response).await;
    assert!(body.get("failedInstances").is_none());
    let parsed: Base64Response = serde_json::from_value(body).unwrap();
    assert_eq!(parsed.cropped_image_list.len(), 2);
    assert_eq!(parsed.detections[0].class_name, "circle");
    assert_eq!(parsed.detections[1].class_id, 2);

    let crop = codec::from_base64(&parsed.cropped_image_list[1], None).unwrap();
    assert_eq!(crop.format(), ImageFormat::Png);
}

#[tokio::test]
async fn test_base64_reports_failed_instances() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(FakeSegmenter::new(2).with_bad_instance(), settings(dir.path()));
    let app = build_router(AppState::new(pipeline), DEFAULT_BODY_LIMIT);
    let text = STANDARD.encode(encoded_image(64, 48, ImageFormat::Png));

    let response = app
        .oneshot(json_request("/base64", &json!({ "base64Image": text })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed: Base64Response = body_json(response).await;
    assert_eq!(parsed.cropped_image_list.len(), 2);
    assert_eq!(parsed.failed_instances.len(), 1);
    assert_eq!(parsed.failed_instances[0].index, 2);
}

#[tokio::test]
async fn test_base64_rejects_invalid_text() {
    let (app, _dir) = app();
    let response = app
        .oneshot(json_request("/base64", &json!({ "base64Image": "%%% not base64" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = body_json(response).await;
    assert!(error.error.starts_with("Base64 error"));
}

#[tokio::test]
async fn test_change_model() {
    let (app, _dir) = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "/changemodel",
            &json!({ "modelName": "balloon", "modelUrl": "fake:1", "classNames": ["BG", "balloon"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_bytes(response).await,
        b"Successfully updated model to balloon"
    );

    let info: InfoResponse = body_json(app.oneshot(get("/info")).await.unwrap()).await;
    assert_eq!(info.model_name, "balloon");
    assert_eq!(info.generation, 1);
    assert_eq!(info.class_names, ["BG", "balloon"]);
}

#[tokio::test]
async fn test_failed_change_model_keeps_serving_old_model() {
    let (app, _dir) = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "/changemodel",
            &json!({ "modelName": "broken", "modelUrl": "/nowhere.onnx", "classNames": ["BG", "x"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .clone()
        .oneshot(json_request(
            "/changemodel",
            &json!({ "modelName": "short", "modelUrl": "fake:5", "classNames": ["BG", "x"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let info: InfoResponse = body_json(app.oneshot(get("/info")).await.unwrap()).await;
    assert_eq!(info.model_name, "fake");
    assert_eq!(info.generation, 0);
}

#[tokio::test]
async fn test_body_limit() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(AppState::new(pipeline(dir.path())), 1024);
    let data = vec![0u8; 4096];

    let response = app
        .oneshot(multipart_request("/extract", Some("big.png"), &data))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
