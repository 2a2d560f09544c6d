//! Scripted backend for unit tests.

use crate::api::{ApiError, ByteStream, FinanceApi, PdfRequest};
use crate::config::ClientConfig;
use crate::models::{BackendStatus, ChartKind, ChartSpec, QueryResult, Row};
use crate::state::AppState;
use crate::storage::MemoryStore;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum Script {
    Answer(QueryResult),
    Fail { status: u16, message: String },
    /// Never answers; only a timeout or cancel ends the query.
    Hang,
}

#[derive(Default)]
pub struct MockApi {
    script: Mutex<VecDeque<Script>>,
    pub questions: Mutex<Vec<String>>,
    pub pdf_questions: Mutex<Vec<String>>,
    pub export_body: Vec<Vec<u8>>,
    /// Fail the export body after its first chunk.
    pub interrupt_export: bool,
}

impl MockApi {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            export_body: vec![b"month,sales\n".to_vec(), b"Jan,100\n".to_vec()],
            ..Self::default()
        }
    }
}

#[async_trait]
impl FinanceApi for MockApi {
    async fn status(&self) -> Result<BackendStatus, ApiError> {
        Ok(BackendStatus {
            db_status: "connected".into(),
            ai_status: "active".into(),
            tables: vec!["sales".into()],
            total_rows: 12,
        })
    }

    async fn query(&self, question: &str) -> Result<QueryResult, ApiError> {
        self.questions.lock().unwrap().push(question.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Answer(result)) => Ok(result),
            Some(Script::Fail { status, message }) => Err(ApiError::Backend { status, message }),
            Some(Script::Hang) | None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn download_pdf(&self, request: &PdfRequest<'_>) -> Result<ByteStream, ApiError> {
        self.pdf_questions.lock().unwrap().push(request.question.to_string());
        Ok(self.body())
    }

    async fn download_csv(&self, _data: &[Row]) -> Result<ByteStream, ApiError> {
        Ok(self.body())
    }
}

impl MockApi {
    fn body(&self) -> ByteStream {
        let mut chunks: Vec<Result<Vec<u8>, ApiError>> = self.export_body.iter().cloned().map(Ok).collect();
        if self.interrupt_export {
            chunks.truncate(1);
            chunks.push(Err(ApiError::Timeout(Duration::from_secs(60))));
        }
        Box::pin(futures::stream::iter(chunks))
    }
}

pub fn sales_result() -> QueryResult {
    let data: Vec<Row> = (1..=12)
        .map(|m| {
            json!({ "month": format!("2026-{m:02}"), "sales": 100_000 })
                .as_object()
                .unwrap()
                .clone()
        })
        .collect();
    QueryResult {
        insights: "Total sales: $1.2M".into(),
        sql: "SELECT month, SUM(amount) AS sales FROM sales GROUP BY month".into(),
        data,
        chart_spec: Some(ChartSpec {
            chart: Some(ChartKind::Bar),
            x: Some("month".into()),
            y: Some("sales".into()),
            title: None,
        }),
        row_count: 12,
    }
}

pub async fn app_with(api: MockApi) -> (AppState, Arc<MockApi>, Arc<MemoryStore>) {
    let api = Arc::new(api);
    let backend = Arc::new(MemoryStore::new());
    let config = ClientConfig {
        query_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let state = AppState::new(config, backend.clone(), api.clone()).await;
    (state, api, backend)
}
