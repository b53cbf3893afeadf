//! HTTP API tests over fake adapters

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use dissforge_gen::adapters::{ScrapeError, StageError};
use dissforge_gen::AppState;
use helpers::fakes::{count, FakeServices};
use helpers::{in_memory_store, orchestrator, POST_URL};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn create_test_app(services: &FakeServices) -> Router {
    let state = AppState::new(orchestrator(services, in_memory_store()));
    dissforge_gen::build_router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("request handled");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body readable")
        .to_bytes()
        .to_vec();
    (status, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let json = serde_json::from_slice(&body).expect("JSON body");
    (status, json)
}

fn post_generate(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("valid request")
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(&FakeServices::new());

    let (status, json) = send_json(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "dissforge-gen");
    assert_eq!(json["active_runs"], 0);
}

#[tokio::test]
async fn test_generate_then_fetch_status_and_track() {
    let services = FakeServices::new();
    let app = create_test_app(&services);

    let (status, json) = send_json(&app, post_generate(json!({ "url": POST_URL, "style": "playful" }))).await;
    assert_eq!(status, StatusCode::OK, "body: {}", json);
    assert_eq!(json["lyrics"].as_array().map(Vec::len), Some(4));
    assert!(json["duration_seconds"].as_f64().unwrap_or(0.0) > 2.0);

    let run_id = json["run_id"].as_str().expect("run id").to_string();
    assert_eq!(json["track_url"], format!("/tracks/{}", run_id));

    let (status, run) = send_json(&app, get(&format!("/runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["state"]["state"], "DONE");
    assert_eq!(run["stages"].as_array().map(Vec::len), Some(9));

    let response = app
        .clone()
        .oneshot(get(&format!("/tracks/{}", run_id)))
        .await
        .expect("request handled");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    let wav = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&wav[..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    // Default beat from config was used
    assert_eq!(count(&services.calls.beat), 1);
}

#[tokio::test]
async fn test_generate_diss_query_form() {
    let app = create_test_app(&FakeServices::new());
    let url = POST_URL.replace(':', "%3A").replace('/', "%2F");

    let (status, json) = send_json(
        &app,
        get(&format!("/generate_diss?url={}&beat=boom_bap.wav&flow_complexity=7", url)),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", json);
    assert!(json["run_id"].is_string());
}

#[tokio::test]
async fn test_rejects_non_reddit_url() {
    let services = FakeServices::new();
    let app = create_test_app(&services);

    let (status, json) = send_json(&app, post_generate(json!({ "url": "https://example.com/post/1" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
    assert_eq!(services.calls.total(), 0);
}

#[tokio::test]
async fn test_rejects_out_of_range_flow() {
    let app = create_test_app(&FakeServices::new());

    let (status, _) = send_json(
        &app,
        post_generate(json!({ "url": POST_URL, "flow_complexity": 11 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limited_scrape_is_bad_gateway() {
    let services = FakeServices::new().with_scrape_error(StageError::from(ScrapeError::RateLimited));
    let app = create_test_app(&services);

    let (status, json) = send_json(&app, post_generate(json!({ "url": POST_URL }))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "RateLimited");
    assert_eq!(json["error"]["stage"], "scrape");

    let run_id = json["error"]["run_id"].as_str().expect("run id");
    let (status, run) = send_json(&app, get(&format!("/runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["state"]["state"], "FAILED");
    assert_eq!(run["state"]["cause"], "RateLimited");
}

#[tokio::test]
async fn test_missing_post_is_unprocessable() {
    let services = FakeServices::new().with_scrape_error(StageError::from(ScrapeError::NotFound));
    let app = create_test_app(&services);

    let (status, json) = send_json(&app, post_generate(json!({ "url": POST_URL }))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "NotFound");
    assert_eq!(count(&services.calls.scrape), 1);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let app = create_test_app(&FakeServices::new());

    let (status, json) = send_json(&app, get(&format!("/runs/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, get(&format!("/tracks/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
