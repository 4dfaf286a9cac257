//! HTTP surface against the in-memory backend

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bingo_hall::api::ApiServer;
use bingo_hall::common::types::{Player, PlayerRole};
use bingo_hall::config::{ApiConfig, GameConfig};
use bingo_hall::games::{EventBus, LogAnnouncer, RoundEngine};
use bingo_hall::metrics::GameMetrics;
use bingo_hall::store::GameStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let store = Arc::new(GameStore::in_memory());
    let mut admin = Player::new(1, "admin", 0, "admin-token");
    admin.role = PlayerRole::Admin;
    store.upsert_player(admin).unwrap();
    for id in 2..=3 {
        store
            .upsert_player(Player::new(id, format!("player{}", id), 100, format!("tok{}", id)))
            .unwrap();
    }

    let metrics = Arc::new(GameMetrics::new().unwrap());
    let engine = Arc::new(RoundEngine::new(
        GameConfig::default(),
        store,
        EventBus::new(64),
        Arc::new(LogAnnouncer),
        metrics.clone(),
    ));
    ApiServer::new(ApiConfig::default(), engine, metrics).create_app()
}

fn request(method: &str, uri: &str, auth: Option<(u64, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((player_id, token)) = auth {
        builder = builder
            .header("x-player-id", player_id.to_string())
            .header("x-session-token", token);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

#[tokio::test]
async fn test_health_and_idle_lobby() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Running");

    let (status, body) = send(&app, request("GET", "/rounds/current", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["round"].is_null());
}

#[tokio::test]
async fn test_credentials_are_checked() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/players/me/sync", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(body["request_id"].is_string());

    let (status, _) = send(&app, request("GET", "/players/me/sync", Some((2, "wrong")), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, request("GET", "/players/me/sync", Some((2, "tok2")), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 100);
}

#[tokio::test]
async fn test_round_opening_and_card_purchase() {
    let app = app();

    let open = json!({ "stake": 10, "shape": "any_line" });
    let (status, body) = send(&app, request("POST", "/rounds", Some((2, "tok2")), Some(open.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, body) = send(&app, request("POST", "/rounds", Some((1, "admin-token")), Some(open))).await;
    assert_eq!(status, StatusCode::CREATED);
    let round_id = body["round_id"].as_u64().unwrap();
    assert_eq!(body["status"], "pending");

    let (_, body) = send(&app, request("GET", &format!("/rounds/{}/catalog", round_id), Some((2, "tok2")), None)).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 100);

    let purchase = format!("/rounds/{}/cards/7/purchase", round_id);
    let (status, body) = send(&app, request("POST", &purchase, Some((2, "tok2")), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["balance"], 90);
    assert_eq!(body["pool"], 8);

    let (status, body) = send(&app, request("POST", &purchase, Some((3, "tok3")), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CARD_TAKEN");

    let (status, body) = send(&app, request("GET", &format!("/rounds/{}/cards", round_id), Some((2, "tok2")), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["catalog_id"], 7);

    // Claims only make sense once drawing has started
    let claim = json!({ "catalog_id": 7, "marked": [] });
    let (status, body) = send(
        &app,
        request("POST", &format!("/rounds/{}/claims", round_id), Some((2, "tok2")), Some(claim)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ROUND_CLOSED");

    let (status, body) = send(&app, request("GET", "/metrics", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("bingo_cards_sold_total 1"));
}

#[tokio::test]
async fn test_preferences_need_premium() {
    let app = app();
    let body = json!({ "auto_claim": false });
    let (status, body) = send(&app, request("PUT", "/players/me/preferences", Some((3, "tok3")), Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
