use crate::config::ClientConfig;
use crate::models::{BackendStatus, QueryResult, Row};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Failures of the backend contract.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The backend answered with a non-success status; the text is its `error` field.
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Query cancelled.")]
    Cancelled,
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Transport-level failure rather than an answer from the backend.
    pub fn is_network_failure(&self) -> bool {
        !matches!(self, Self::Backend { .. })
    }
}

/// Download body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ApiError>> + Send>>;

/// Body of `POST /api/download/pdf`.
#[derive(Serialize, Debug)]
pub struct PdfRequest<'a> {
    pub question: &'a str,
    pub insights: &'a str,
    pub sql: &'a str,
    pub data: &'a [Row],
}

/// The finance backend, as seen by the client.
#[async_trait]
pub trait FinanceApi: Send + Sync {
    async fn status(&self) -> Result<BackendStatus, ApiError>;

    async fn query(&self, question: &str) -> Result<QueryResult, ApiError>;

    async fn download_pdf(&self, request: &PdfRequest<'_>) -> Result<ByteStream, ApiError>;

    async fn download_csv(&self, data: &[Row]) -> Result<ByteStream, ApiError>;
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
}

#[derive(Serialize)]
struct CsvRequest<'a> {
    data: &'a [Row],
}

// `row_count` is absent when the query matched nothing
#[derive(Deserialize, Debug)]
struct QueryResponse {
    #[serde(flatten)]
    result: QueryResult,
    #[serde(default, rename = "row_count")]
    declared_rows: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: String,
}

pub struct HttpFinanceApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFinanceApi {
    pub fn new(config: &ClientConfig, api_key: Option<String>) -> Result<Self, ApiError> {
        let base_url = config.api_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(config.api_url.clone()));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Passes 2xx responses through, turns anything else into [`ApiError::Backend`].
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) => format!("HTTP {}", status),
        };
        log::error!("Backend request failed with status {}: {}", status, message);
        Err(ApiError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn download(&self, path: &str, body: &impl Serialize) -> Result<ByteStream, ApiError> {
        log::info!("Requesting export from {}", path);
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from));
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl FinanceApi for HttpFinanceApi {
    async fn status(&self) -> Result<BackendStatus, ApiError> {
        let response = self
            .authorize(self.client.get(self.url("/api/status")))
            .send()
            .await?;
        let status = Self::check(response).await?.json::<BackendStatus>().await?;
        log::debug!("Backend status: db={} ai={}", status.db_status, status.ai_status);
        Ok(status)
    }

    async fn query(&self, question: &str) -> Result<QueryResult, ApiError> {
        log::info!("Sending question to {}", self.base_url);
        let response = self
            .authorize(self.client.post(self.url("/api/query")))
            .json(&QueryRequest { question })
            .send()
            .await?;
        let QueryResponse {
            mut result,
            declared_rows,
        } = Self::check(response).await?.json().await?;
        result.row_count = declared_rows.unwrap_or(result.data.len());
        log::info!("Query answered with {} rows", result.row_count);
        Ok(result)
    }

    async fn download_pdf(&self, request: &PdfRequest<'_>) -> Result<ByteStream, ApiError> {
        self.download("/api/download/pdf", request).await
    }

    async fn download_csv(&self, data: &[Row]) -> Result<ByteStream, ApiError> {
        self.download("/api/download/csv", &CsvRequest { data }).await
    }
}
