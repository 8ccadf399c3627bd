//! HTTP-level tests for the sync and feature endpoints

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use tower::ServiceExt;

use fieldsync_server::db::{connect_in_memory, ProjectRepository};
use fieldsync_server::{routes, AppState, Config};

const USER: &str = "x-user-id";

async fn app() -> (axum::Router, i64) {
    let pool = connect_in_memory().await.unwrap();
    let project = ProjectRepository::new(&pool).create("Utilities").await.unwrap();
    let state = AppState::new(Config::default(), pool).unwrap();
    (routes::router(state), project.id)
}

async fn server() -> (TestServer, i64) {
    let (router, project_id) = app().await;
    (TestServer::new(router).unwrap(), project_id)
}

fn user(id: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(USER), HeaderValue::from_static(id))
}

fn line_feature(client_id: &str, last_modified: &str, coordinates: Value) -> Value {
    json!({
        "clientId": client_id,
        "lastModified": last_modified,
        "data": {
            "name": "Fence",
            "draw_layer": "Fence Line",
            "type": "Line",
            "coordinates": coordinates
        }
    })
}

#[tokio::test]
async fn test_health() {
    let (server, _) = server().await;

    for path in ["/health", "/api/v1/health"] {
        let response = server.get(path).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }
}

#[tokio::test]
async fn test_sync_round_trip() {
    let (server, project_id) = server().await;
    let path = format!("/api/v1/projects/{}/sync", project_id);
    let (name, value) = user("7");

    let pushed = server
        .post(&path)
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "features": [{
                "clientId": "a1",
                "lastModified": "2024-01-01T00:00:00Z",
                "data": {
                    "name": "Hydrant",
                    "draw_layer": "Water",
                    "type": "Point",
                    "attributes": {},
                    "points": [{"client_id": "a1-p", "fcode": "WATER", "coords": [-104.99, 39.74]}]
                }
            }],
            "timezone": "America/Denver"
        }))
        .await;
    pushed.assert_status_ok();

    let body = pushed.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], json!(["a1"]));
    assert_eq!(body["failed"], json!([]));
    assert_eq!(body["changes"], json!([]));
    assert!(body["serverTimestamp"].as_str().unwrap().ends_with('Z'));

    let (other, other_value) = user("8");
    let pulled = server
        .post(&path)
        .add_header(other, other_value)
        .json(&json!({"features": [], "lastSyncTimestamp": "2023-01-01T00:00:00Z"}))
        .await;
    pulled.assert_status_ok();

    let changes = pulled.json::<Value>()["changes"].clone();
    assert_eq!(changes.as_array().unwrap().len(), 1);
    assert_eq!(changes[0]["clientId"], "a1");
    assert_eq!(changes[0]["deleted"], false);
    assert_eq!(changes[0]["data"]["points"].as_array().unwrap().len(), 1);
    assert_eq!(changes[0]["data"]["points"][0]["coords"], json!([-104.99, 39.74]));
    // Feature codes always follow the draw layer
    assert_eq!(changes[0]["data"]["points"][0]["fcode"], "Water");
    assert_eq!(changes[0]["data"]["timezone"], "America/Denver");
    assert_eq!(changes[0]["data"]["created_by"], 7);
}

#[tokio::test]
async fn test_batch_with_missing_client_id_commits() {
    let (server, project_id) = server().await;
    let (name, value) = user("1");

    let response = server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .add_header(name, value)
        .json(&json!({
            "features": [
                line_feature("l1", "2024-01-01T00:00:00Z", json!([[0, 0], [1, 1]])),
                {"lastModified": "2024-01-01T00:00:00Z", "data": {"type": "Line"}},
                line_feature("l3", "2024-01-01T00:00:00Z", json!([[2, 2], [3, 3]]))
            ]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["processed"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_sync_errors() {
    let (server, project_id) = server().await;
    let (name, value) = user("1");

    let anonymous = server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .json(&json!({"features": []}))
        .await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.json::<Value>()["error"], "unauthorized");

    let unknown = server
        .post(&format!("/api/v1/projects/{}/sync", project_id + 50))
        .add_header(name.clone(), value.clone())
        .json(&json!({"features": []}))
        .await;
    assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(unknown.json::<Value>()["success"], false);

    let shapeless = server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .add_header(name, value)
        .json(&json!({"features": "none"}))
        .await;
    assert_eq!(shapeless.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_gets_error_body() {
    let (router, project_id) = app().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/projects/{}/sync", project_id))
                .header("content-type", "application/json")
                .header(USER, "1")
                .body(Body::from("{\"features\": ["))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_non_numeric_project_is_bad_request() {
    let (router, _) = app().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/projects/main-street/sync")
                .header(USER, "1")
                .body(Body::from("{\"features\": []}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_feature_views_and_history() {
    let (server, project_id) = server().await;
    let (name, value) = user("3");
    let sync_path = format!("/api/v1/projects/{}/sync", project_id);

    let first = server
        .post(&sync_path)
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "features": [
                line_feature("l1", "2024-01-01T00:00:00Z", json!([[0, 0], [1, 1]])),
                {
                    "clientId": "poly",
                    "lastModified": "2024-01-01T00:00:00Z",
                    "data": {
                        "draw_layer": "Parcel",
                        "type": "Polygon",
                        "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]
                    }
                }
            ]
        }))
        .await;
    first.assert_status_ok();
    let stamp = first.json::<Value>()["serverTimestamp"].as_str().unwrap().to_string();

    // Move the line; anything later than the stored stamp wins
    let moved = server
        .post(&sync_path)
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "features": [line_feature("l1", "2099-01-01T00:00:00Z", json!([[5, 5], [6, 6], [7, 7]]))],
            "lastSyncTimestamp": stamp
        }))
        .await;
    moved.assert_status_ok();
    assert_eq!(moved.json::<Value>()["changes"], json!([]));

    let active = server
        .get(&format!("/api/v1/projects/{}/active-features", project_id))
        .await;
    active.assert_status_ok();
    let active = active.json::<Value>();
    assert_eq!(active["count"], 2);
    assert_eq!(active["features"][0]["data"]["coordinates"], json!([[5.0, 5.0], [6.0, 6.0], [7.0, 7.0]]));

    let geojson = server
        .get(&format!("/api/v1/projects/{}/features/geojson", project_id))
        .await;
    geojson.assert_status_ok();
    let geojson = geojson.json::<Value>();
    assert_eq!(geojson["type"], "FeatureCollection");
    assert_eq!(geojson["features"][0]["geometry"]["type"], "LineString");
    assert_eq!(
        geojson["features"][1]["geometry"]["coordinates"],
        json!([[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]])
    );

    let history = server
        .get(&format!("/api/v1/projects/{}/features/l1/history", project_id))
        .await;
    history.assert_status_ok();
    let history = history.json::<Value>();
    let generations = history["generations"].as_array().unwrap();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0]["generation"], 1);
    assert_eq!(generations[0]["active"], false);
    assert_eq!(generations[0]["points"].as_array().unwrap().len(), 2);
    assert_eq!(generations[1]["active"], true);
    assert_eq!(generations[1]["points"].as_array().unwrap().len(), 3);

    let inactivated = server
        .post(&format!("/api/v1/projects/{}/features/l1/inactivate", project_id))
        .add_header(name, value)
        .await;
    inactivated.assert_status_ok();
    assert_eq!(inactivated.json::<Value>()["clientId"], "l1");

    let active = server
        .get(&format!("/api/v1/projects/{}/active-features", project_id))
        .await
        .json::<Value>();
    assert_eq!(active["count"], 1);
    assert_eq!(active["features"][0]["clientId"], "poly");

    let missing = server
        .get(&format!("/api/v1/projects/{}/features/nope/history", project_id))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_web_sync_round_trip() {
    let (server, project_id) = server().await;
    let (name, value) = user("2");

    let field = server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .add_header(name.clone(), value.clone())
        .json(&json!({"features": [line_feature("l1", "2024-01-01T00:00:00Z", json!([[0, 0], [1, 1]]))]}))
        .await;
    field.assert_status_ok();

    let web_path = format!("/api/v1/projects/{}/web-sync", project_id);
    let response = server
        .post(&web_path)
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "features": [
                {
                    "client_id": "pole-1",
                    "type": "Point",
                    "draw_layer": "Electric Pole",
                    "name": "Pole 1",
                    "style": {"color": "#00ff00"},
                    "coords": [-122.4, 37.8]
                },
                {"type": "Point", "coords": [0, 0]}
            ],
            "last_sync": "2020-01-01T00:00:00Z"
        }))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["syncedIds"], json!(["pole-1"]));
    assert!(body["serverTime"].as_str().unwrap().ends_with('Z'));
    let server_features = body["serverFeatures"].as_array().unwrap();
    assert_eq!(server_features.len(), 1);
    assert_eq!(server_features[0]["client_id"], "l1");
    assert_eq!(server_features[0]["coords"], json!([0.0, 0.0]));
    assert_eq!(server_features[0]["attributes"]["featureTypeName"], "Fence");
    assert_eq!(server_features[0]["points"].as_array().unwrap().len(), 2);

    // The mobile client sees the manual feature with its marker style
    let pulled = server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .add_header(name, value)
        .json(&json!({"features": [], "lastSyncTimestamp": field.json::<Value>()["serverTimestamp"]}))
        .await
        .json::<Value>();
    let changes = pulled["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["clientId"], "pole-1");
    assert_eq!(changes[0]["data"]["attributes"]["properties"]["source"], "manual");
    assert_eq!(changes[0]["data"]["attributes"]["properties"]["style"]["color"], "#00ff00");
    assert_eq!(changes[0]["data"]["points"][0]["fcode"], "Elect");

    let anonymous = server.post(&web_path).json(&json!({"features": []})).await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);
    let shapeless = server
        .post(&web_path)
        .add_header(HeaderName::from_static(USER), HeaderValue::from_static("2"))
        .json(&json!("features"))
        .await;
    assert_eq!(shapeless.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_edit_feature_over_http() {
    let (server, project_id) = server().await;
    let (name, value) = user("4");

    server
        .post(&format!("/api/v1/projects/{}/sync", project_id))
        .add_header(name.clone(), value.clone())
        .json(&json!({"features": [line_feature("l1", "2024-01-01T00:00:00Z", json!([[0, 0], [1, 1]]))]}))
        .await
        .assert_status_ok();

    let path = format!("/api/v1/projects/{}/features/l1", project_id);
    let edited = server
        .put(&path)
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "name": "Back fence",
            "draw_layer": "Wall Line",
            "description": "stone",
            "coordinates": [[0, 0], [3, 3], [6, 6]]
        }))
        .await;
    edited.assert_status_ok();
    let body = edited.json::<Value>();
    assert_eq!(body["clientId"], "l1");
    assert!(body["updatedAt"].as_str().unwrap().ends_with('Z'));

    let active = server
        .get(&format!("/api/v1/projects/{}/active-features", project_id))
        .await
        .json::<Value>();
    let feature = &active["features"][0];
    assert_eq!(feature["data"]["name"], "Back fence");
    assert_eq!(feature["data"]["draw_layer"], "Wall Line");
    assert_eq!(feature["data"]["attributes"]["description"], "stone");
    assert_eq!(feature["data"]["coordinates"], json!([[0.0, 0.0], [3.0, 3.0], [6.0, 6.0]]));
    assert_eq!(feature["data"]["points"][0]["fcode"], "Wall ");
    assert_eq!(feature["data"]["updated_by"], 4);

    let history = server
        .get(&format!("/api/v1/projects/{}/features/l1/history", project_id))
        .await
        .json::<Value>();
    assert_eq!(history["generations"].as_array().unwrap().len(), 2);

    let missing = server
        .put(&format!("/api/v1/projects/{}/features/nope", project_id))
        .add_header(name.clone(), value.clone())
        .json(&json!({"name": "x"}))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    let retyped = server
        .put(&path)
        .add_header(name, value)
        .json(&json!({"type": "Point"}))
        .await;
    assert_eq!(retyped.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(retyped.json::<Value>()["error"], "bad_request");
}
