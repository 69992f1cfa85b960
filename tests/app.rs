mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use homeprice::artifact::{ArtifactError, ARTIFACT_FORMAT_VERSION};
use homeprice::{server, training, Predictor};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn trained_app(dir: &Path) -> Router {
    let csv = dir.join("listings.csv");
    common::write_essendon_csv(&csv, 160);
    let out = dir.join("outputs");
    let mut config = common::quick_config(&csv, &out);
    config.cv_folds = 0;
    training::run(&config).unwrap();
    let predictor = Predictor::load(&out.join("pipeline.json")).unwrap();
    server::router(Arc::new(predictor))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn json_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn json_prediction_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path());
    let body = json!({
        "suburb": "Essendon",
        "property_type": "house",
        "bedrooms": 3,
        "bathrooms": 2,
        "land_size": 450
    });

    let (status, first) = send(&app, json_request(body.clone())).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    let (_, second) = send(&app, json_request(body)).await;
    assert_eq!(first, second);

    let parsed: Value = serde_json::from_str(&first).unwrap();
    let price = parsed["predicted_price"].as_f64().unwrap();
    assert!(price.is_finite() && price > 0.0);
}

#[tokio::test]
async fn negative_bedrooms_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path());

    let (status, body) = send(
        &app,
        json_request(json!({
            "suburb": "Essendon",
            "property_type": "house",
            "bedrooms": -1,
            "bathrooms": 2,
            "land_size": 450
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["field"], "bedrooms");

    let form = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "suburb=Essendon&property_type=house&bedrooms=-1&bathrooms=2&land_size=450",
        ))
        .unwrap();
    let (status, html) = send(&app, form).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(html.contains("Invalid input for bedrooms"));
    assert!(!html.contains("Estimated sale price"));
}

#[tokio::test]
async fn form_page_and_metadata_routes() {
    let dir = tempfile::tempdir().unwrap();
    let app = trained_app(dir.path());

    let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, html) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("<form method=\"post\" action=\"/predict\">"));

    let (status, _) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/v1/model")).await;
    assert_eq!(status, StatusCode::OK);
    let info: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["format_version"], ARTIFACT_FORMAT_VERSION);
    assert!(info["features"]["categorical"]
        .as_array()
        .unwrap()
        .contains(&json!("suburb")));

    let form = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "suburb=Essendon&property_type=house&bedrooms=3&bathrooms=2&land_size=450&car_spaces=",
        ))
        .unwrap();
    let (status, html) = send(&app, form).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Estimated sale price: <strong>$"));
}

#[tokio::test]
async fn error_router_answers_503() {
    let app = server::error_router("pipeline artifact not found at outputs/pipeline.json");
    let request = Request::builder()
        .uri("/v1/predict")
        .body(Body::empty())
        .unwrap();
    let (status, html) = send(&app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(html.contains("outputs/pipeline.json"));
}

#[test]
fn incompatible_artifact_is_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let _ = trained_app(dir.path());
    let path = dir.path().join("outputs/pipeline.json");
    let mut value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value["format_version"] = json!(ARTIFACT_FORMAT_VERSION + 1);
    fs::write(&path, value.to_string()).unwrap();

    let err = Predictor::load(&path).unwrap_err();
    assert!(matches!(err, ArtifactError::IncompatibleVersion { .. }));
    assert!(err.to_string().contains("format version"));
}

#[test]
fn truncated_preprocessor_state_is_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let _ = trained_app(dir.path());
    let path = dir.path().join("outputs/pipeline.json");
    let mut value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value["preprocessor"]["means"].as_array_mut().unwrap().pop();
    fs::write(&path, value.to_string()).unwrap();

    let err = Predictor::load(&path).unwrap_err();
    assert!(matches!(err, ArtifactError::Inconsistent(_)), "{err}");
    assert!(err.to_string().contains("means"));
}
