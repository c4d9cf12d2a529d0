//! # Tests for Handlers
//!
//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::io::Write;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Json,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::handlers::root;
use crate::models::ServiceInfo;
use crate::server::{AppState, create_app};
use crate::sources::SourceRegistry;

async fn setup_test_app() -> (AppState, Router) {
    let config = AppConfig {
        profile: "test".to_string(),
        ..AppConfig::default()
    };
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let registry = SourceRegistry::with_defaults(&config.import, std::env::temp_dir()).unwrap();
    let state = AppState::new(Arc::new(config), db, Arc::new(registry));
    let app = create_app(state.clone());
    (state, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn deletion_body(owner_id: Uuid, count: usize) -> Value {
    let targets: Vec<Value> = (0..count)
        .map(|_| json!({"entity": "supplier_record", "id": Uuid::new_v4()}))
        .collect();
    json!({ "owner_id": owner_id, "targets": targets })
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "catalog-sync");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_service_info_default() {
    let service_info = ServiceInfo::default();
    assert_eq!(service_info.service, "catalog-sync");
}

#[tokio::test]
async fn test_healthz_reports_database_ok() {
    let (_, app) = setup_test_app().await;

    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_healthz_unavailable_without_database() {
    let config = Arc::new(AppConfig::default());
    let registry = SourceRegistry::with_defaults(&config.import, std::env::temp_dir()).unwrap();
    let state = AppState::new(config, DatabaseConnection::default(), Arc::new(registry));
    let app = create_app(state);

    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_create_deletion_job_and_poll_status() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();

    let (status, body) = send(&app, "POST", "/deletion-jobs", Some(deletion_body(owner_id, 3))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["total_items"], 3);

    let job_id = body["job_id"].as_str().unwrap().to_string();
    let (status, body) = send(&app, "GET", &format!("/jobs/{}?owner_id={}", job_id, owner_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "deletion");
    assert_eq!(body["processed_items"], 0);
    assert_eq!(body["total_items"], 3);
    assert_eq!(body["retry_count"], 0);
    assert!(body["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_deletion_job_is_rejected() {
    let (_, app) = setup_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/deletion-jobs",
        Some(json!({"owner_id": Uuid::new_v4(), "targets": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_oversized_chunk_is_rejected() {
    let (_, app) = setup_test_app().await;
    let mut body = deletion_body(Uuid::new_v4(), 1);
    body["options"] = json!({"chunk_size": 1_000_000});

    let (status, _) = send(&app, "POST", "/deletion-jobs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (_, app) = setup_test_app().await;

    let (status, body) = send(&app, "POST", "/import-jobs", Some(json!({"owner_id": "nope"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_job_of_other_owner_is_not_found() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();

    let (_, body) = send(&app, "POST", "/deletion-jobs", Some(deletion_body(owner_id, 1))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "GET",
        &format!("/jobs/{}?owner_id={}", job_id, Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_owner_query_is_rejected() {
    let (_, app) = setup_test_app().await;

    let (status, _) = send(&app, "GET", &format!("/jobs/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_job_from_spreadsheet_is_accepted() {
    let (_, app) = setup_test_app().await;
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "ean;name;price").unwrap();
    writeln!(file, "4006381333931;Stabilo Point 88;1,20").unwrap();
    writeln!(file, "4006381333948;Stabilo Boss;1,50").unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/import-jobs",
        Some(json!({
            "owner_id": Uuid::new_v4(),
            "source": {
                "source_id": "upload-1",
                "platform": "spreadsheet",
                "path": file.path().display().to_string()
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["total_items"], 2);
}

#[tokio::test]
async fn test_import_job_with_missing_file_is_rejected() {
    let (_, app) = setup_test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/import-jobs",
        Some(json!({
            "owner_id": Uuid::new_v4(),
            "source": {
                "source_id": "upload-1",
                "platform": "spreadsheet",
                "path": "/definitely/not/here.csv"
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_jobs_paginates_newest_first() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();

    let mut created = Vec::new();
    for count in 1..=3 {
        let (_, body) = send(&app, "POST", "/deletion-jobs", Some(deletion_body(owner_id, count))).await;
        created.push(body["job_id"].as_str().unwrap().to_string());
    }

    let (status, page) = send(&app, "GET", &format!("/jobs?owner_id={}&limit=2", owner_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["data"][0]["id"], created[2]);

    let cursor = page["next_cursor"].as_str().unwrap();
    let (status, page) = send(
        &app,
        "GET",
        &format!("/jobs?owner_id={}&limit=2&cursor={}", owner_id, cursor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["data"][0]["id"], created[0]);
    assert_eq!(page["has_more"], false);
    assert!(page["next_cursor"].is_null());
}

#[tokio::test]
async fn test_list_jobs_filters_and_validates() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();
    send(&app, "POST", "/deletion-jobs", Some(deletion_body(owner_id, 1))).await;

    let (_, page) = send(&app, "GET", &format!("/jobs?owner_id={}&kind=import", owner_id), None).await;
    assert!(page["data"].as_array().unwrap().is_empty());

    let (_, page) = send(&app, "GET", &format!("/jobs?owner_id={}&status=queued", owner_id), None).await;
    assert_eq!(page["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "GET", &format!("/jobs?owner_id={}&limit=0", owner_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", &format!("/jobs?owner_id={}&limit=101", owner_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", &format!("/jobs?owner_id={}&cursor=%21%21", owner_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_job_fails_it_once() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();
    let (_, body) = send(&app, "POST", "/deletion-jobs", Some(deletion_body(owner_id, 2))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    let uri = format!("/jobs/{}/cancel?owner_id={}", job_id, owner_id);

    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["last_error"], "cancelled");
    assert!(!body["completed_at"].is_null());

    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_suggestion_review_of_unknown_id_is_not_found() {
    let (_, app) = setup_test_app().await;
    let owner_id = Uuid::new_v4();

    let (status, body) = send(&app, "GET", &format!("/suggestions?owner_id={}", owner_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["suggestions"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        "POST",
        &format!("/suggestions/{}/confirm", Uuid::new_v4()),
        Some(json!({"owner_id": owner_id})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_responses_carry_trace_id() {
    let (_, app) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-trace-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "req-123");
}
