//! Integration tests for the valuation API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use valuation_lib::data::InMemoryDataSource;
use valuation_lib::trainer::{BoostingConfig, TrainerConfig};
use valuation_lib::{ArtifactStore, LabeledRow, TrainingConfig, TrainingPipeline};
use valuation_server::api::{create_router, AppState};
use valuation_server::build_state;
use valuation_server::config::ServerConfig;

const API_KEY: &str = "test-key";

fn row(i: usize) -> LabeledRow {
    let sectors = [("Las Condes", 95.0), ("Providencia", 85.0), ("La Florida", 45.0)];
    let (sector, per_m2) = sectors[i % sectors.len()];
    let kind = if i % 2 == 0 { "departamento" } else { "casa" };
    let area = 40.0 + ((i * 29) % 120) as f64;
    let rooms = 1 + (i % 4);
    let price = (area * per_m2).round();

    serde_json::from_value(json!({
        "type": kind,
        "sector": sector,
        "net_usable_area": area,
        "net_area": area + 5.0,
        "n_rooms": rooms,
        "n_bathroom": 1,
        "latitude": -33.45,
        "longitude": -70.6,
        "price": price
    }))
    .unwrap()
}

async fn setup_test_app() -> (TempDir, Router, Arc<AppState>) {
    setup_app_with_threshold(TrainerConfig::default().mape_threshold).await
}

async fn setup_app_with_threshold(mape_threshold: f64) -> (TempDir, Router, Arc<AppState>) {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        model_dir: dir.path().to_path_buf(),
        api_keys: vec![API_KEY.to_string()],
        ..ServerConfig::default()
    };

    let training = TrainingConfig {
        trainer: TrainerConfig {
            boosting: BoostingConfig {
                learning_rate: 0.1,
                n_rounds: 40,
                ..BoostingConfig::default()
            },
            mape_threshold,
            ..TrainerConfig::default()
        },
        ..TrainingConfig::default()
    };
    let store = ArtifactStore::open(&config.model_dir, &config.model_name);
    TrainingPipeline::new(training, store)
        .run(&InMemoryDataSource::new((0..90).map(row).collect()))
        .unwrap();

    let state = build_state(&config).await.unwrap();
    (dir, create_router(state.clone()), state)
}

fn predict_request(key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/predict")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn listing() -> Value {
    json!({
        "type": "departamento",
        "sector": "Las Condes",
        "net_usable_area": 65,
        "net_area": 70,
        "n_rooms": 2,
        "n_bathroom": 1,
        "latitude": -33.45,
        "longitude": -70.65
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_predict_returns_estimate_and_metadata() {
    let (_dir, app, state) = setup_test_app().await;

    let mut request = predict_request(Some(API_KEY), listing());
    request
        .headers_mut()
        .insert("x-request-id", "req-42".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let json = json_body(response).await;
    assert_eq!(json["request_id"], "req-42");
    assert!(json["prediction"].as_f64().unwrap() > 0.0);
    assert!(json["confidence"].as_f64().unwrap() <= 1.0);
    assert_eq!(json["model_version"], state.service.model_version());
    assert_eq!(json["metadata"]["train_rows"], 72);
    assert!(json["metadata"]["holdout_mape"].is_number());
}

#[tokio::test]
async fn test_predict_generates_request_id() {
    let (_dir, app, _state) = setup_test_app().await;

    let response = app
        .oneshot(predict_request(Some(API_KEY), listing()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["request_id"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn test_predict_requires_api_key() {
    let (_dir, app, _state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(predict_request(None, listing()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(predict_request(Some("wrong"), listing()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn test_invalid_field_returns_422() {
    let (_dir, app, _state) = setup_test_app().await;

    let mut body = listing();
    body["n_rooms"] = json!(0);
    let response = app
        .oneshot(predict_request(Some(API_KEY), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
    assert_eq!(json["field"], "n_rooms");
    assert!(json["message"].as_str().unwrap().contains("n_rooms"));
}

#[tokio::test]
async fn test_missing_field_returns_422() {
    let (_dir, app, _state) = setup_test_app().await;

    let mut body = listing();
    body.as_object_mut().unwrap().remove("sector");
    let response = app
        .oneshot(predict_request(Some(API_KEY), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["field"], "sector");
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let (_dir, app, _state) = setup_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/predict")
        .header("content-type", "application/json")
        .header("X-API-Key", API_KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_body");
}

#[tokio::test]
async fn test_health_and_readiness() {
    let (_dir, app, state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["components"]["predictor"]["status"], "healthy");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.health_registry.set_ready(false).await;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unhealthy_component_returns_503() {
    let (_dir, app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy("predictor", "Scoring failed")
        .await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_model_above_mape_threshold_reports_degraded() {
    let (_dir, app, state) = setup_app_with_threshold(1e-9).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["model_version"], state.service.model_version());
    assert_eq!(json["components"]["artifact"]["status"], "healthy");
    assert_eq!(json["components"]["predictor"]["status"], "degraded");
    assert!(json["components"]["predictor"]["message"]
        .as_str()
        .unwrap()
        .contains("threshold"));

    // Still serving
    let response = app
        .oneshot(predict_request(Some(API_KEY), listing()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_root_reports_model_version() {
    let (_dir, app, state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model_version"], state.service.model_version());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (_dir, app, _state) = setup_test_app().await;

    app.clone()
        .oneshot(predict_request(Some(API_KEY), listing()))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("property_valuation_predictions_total"));
    assert!(text.contains("property_valuation_model_version_info"));
}

#[tokio::test]
async fn test_startup_fails_without_artifact() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        model_dir: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };

    assert!(build_state(&config).await.is_err());
}
