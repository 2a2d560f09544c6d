//! The real HTTP client against a stand-in finance backend.

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use nsight_lib::api::{ApiError, FinanceApi, HttpFinanceApi};
use nsight_lib::config::ClientConfig;
use nsight_lib::dispatcher::SubmitOutcome;
use nsight_lib::downloads::DownloadKind;
use nsight_lib::models::{ChartKind, Role};
use nsight_lib::storage::MemoryStore;

const TOKEN: &str = "secret-token";

async fn status(headers: HeaderMap) -> Response {
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(auth) if auth != format!("Bearer {TOKEN}") => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token" }))).into_response()
        }
        _ => Json(json!({
            "db_status": "connected",
            "ai_status": "active",
            "tables": ["sales", "expenses"],
            "total_rows": 240
        }))
        .into_response(),
    }
}

async fn query(Json(body): Json<Value>) -> Response {
    match body["question"].as_str().unwrap_or_default() {
        "fail" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "DB timeout" }))).into_response(),
        "gateway" => (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response(),
        "empty" => Json(json!({
            "message": "Query returned no results",
            "sql": "SELECT * FROM sales WHERE 1 = 0",
            "data": [],
            "insights": "No data found for this query.",
            "chart_spec": null
        }))
        .into_response(),
        _ => Json(json!({
            "sql": "SELECT month, SUM(amount) AS sales FROM sales GROUP BY month LIMIT 50;",
            "data": (1..=12).map(|m| json!({ "month": m, "sales": 100000.0 })).collect::<Vec<_>>(),
            "insights": "Total sales: $1.2M",
            "chart_spec": { "chart": "bar", "x": "month", "y": "sales", "title": "Monthly sales" },
            "row_count": 12
        }))
        .into_response(),
    }
}

async fn pdf(Json(body): Json<Value>) -> Response {
    let question = body["question"].as_str().unwrap_or_default().to_string();
    ([(header::CONTENT_TYPE, "application/pdf")], format!("%PDF-1.4 {question}")).into_response()
}

async fn csv(Json(body): Json<Value>) -> Response {
    let rows = body["data"].as_array().map(Vec::len).unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/csv")], format!("rows\n{rows}\n")).into_response()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/query", post(query))
        .route("/api/download/pdf", post(pdf))
        .route("/api/download/csv", post(csv));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn config(api_url: String) -> ClientConfig {
    ClientConfig {
        api_url,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn status_reports_backend_health() {
    let url = spawn_backend().await;
    let api = HttpFinanceApi::new(&config(url.clone()), Some(TOKEN.into())).unwrap();

    let status = api.status().await.unwrap();
    assert!(status.db_connected());
    assert!(status.ai_active());
    assert_eq!(status.total_rows, 240);

    let wrong = HttpFinanceApi::new(&config(url), Some("nope".into())).unwrap();
    match wrong.status().await {
        Err(ApiError::Backend { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid token");
        }
        other => panic!("expected a backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn question_round_trip_through_app_state() {
    let url = spawn_backend().await;
    let state = nsight_lib::bootstrap(config(url), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let outcome = state.submit("What were the total sales this year?").await;
    let SubmitOutcome::Answered(message) = outcome else {
        panic!("expected an answer, got {outcome:?}");
    };
    assert_eq!(message.content, "Total sales: $1.2M");
    let data = message.data.unwrap();
    assert_eq!(data.row_count, 12);
    assert_eq!(data.data.len(), 12);

    let plan = state.render_plan_for(2).await.unwrap();
    assert_eq!(plan.kind, ChartKind::Bar);
    assert_eq!(plan.title.as_deref(), Some("Monthly sales"));
}

#[tokio::test]
async fn backend_error_text_becomes_error_message() {
    let url = spawn_backend().await;
    let state = nsight_lib::bootstrap(config(url), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let SubmitOutcome::Failed(message) = state.submit("fail").await else {
        panic!("expected a failure");
    };
    assert_eq!(message.role, Role::Error);
    assert_eq!(message.content, "DB timeout");

    let SubmitOutcome::Failed(message) = state.submit("gateway").await else {
        panic!("expected a failure");
    };
    assert_eq!(message.content, "HTTP 502 Bad Gateway");
    assert!(!state.is_busy());
}

#[tokio::test]
async fn empty_result_defaults_row_count() {
    let url = spawn_backend().await;
    let api = HttpFinanceApi::new(&config(url), None).unwrap();

    let result = api.query("empty").await.unwrap();
    assert_eq!(result.row_count, 0);
    assert!(result.chart_spec.is_none());
    assert_eq!(result.insights, "No data found for this query.");
}

#[tokio::test]
async fn unreachable_backend_is_a_network_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let state = nsight_lib::bootstrap(config(format!("http://{addr}")), Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    let SubmitOutcome::Failed(message) = state.submit("Show monthly revenue trends").await else {
        panic!("expected a failure");
    };
    assert!(message.content.starts_with("Network error"), "{}", message.content);
}

#[tokio::test]
async fn exports_are_written_to_disk() {
    let url = spawn_backend().await;
    let state = nsight_lib::bootstrap(config(url), Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    state.submit("What were the total sales this year?").await;
    let dir = tempfile::tempdir().unwrap();

    let pdf = state.download(2, DownloadKind::Pdf, dir.path()).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&pdf).unwrap(),
        "%PDF-1.4 What were the total sales this year?"
    );
    let csv = state.download(2, DownloadKind::Csv, dir.path()).await.unwrap();
    assert_eq!(std::fs::read_to_string(&csv).unwrap(), "rows\n12\n");
}

#[test]
fn rejects_non_http_url() {
    let err = HttpFinanceApi::new(&config("localhost:5000".into()), None).err().unwrap();
    assert!(matches!(err, ApiError::InvalidUrl(_)));
}
