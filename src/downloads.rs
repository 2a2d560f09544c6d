//! PDF and CSV exports of a bot answer.
//!
//! The backend renders the file; we stream the body to disk. Failures are
//! logged and returned to the caller and never touch the conversation.

use crate::api::{ApiError, ByteStream, PdfRequest};
use crate::models::{Message, Role};
use crate::state::AppState;
use chrono::{DateTime, Local};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Pdf,
    Csv,
}

impl DownloadKind {
    /// `finance_report_<YYYYmmdd_HHMMSS>.pdf` or `finance_data_<...>.csv`.
    pub fn file_name(self, at: DateTime<Local>) -> String {
        let stamp = at.format("%Y%m%d_%H%M%S");
        match self {
            Self::Pdf => format!("finance_report_{}.pdf", stamp),
            Self::Csv => format!("finance_data_{}.csv", stamp),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Message {0} has no data to export")]
    NoData(usize),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

/// The user question a bot answer responds to: the nearest user message before it.
fn question_for(messages: &[Message], index: usize) -> &str {
    messages[..index]
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

impl AppState {
    /// Exports the data behind message `index` into `dir`. Returns the written path.
    pub async fn download(
        &self,
        index: usize,
        kind: DownloadKind,
        dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let result = self.export(index, kind, dir).await;
        if let Err(e) = &result {
            log::error!("{:?} export of message {} failed: {}", kind, index, e);
        }
        result
    }

    async fn export(&self, index: usize, kind: DownloadKind, dir: &Path) -> Result<PathBuf, DownloadError> {
        // Copy what we need so the session lock is not held across the request.
        let (question, data) = {
            let session = self.session.lock().await;
            let data = session
                .messages
                .get(index)
                .and_then(|m| m.data.clone())
                .ok_or(DownloadError::NoData(index))?;
            (question_for(&session.messages, index).to_string(), data)
        };

        let mut stream = match kind {
            DownloadKind::Pdf => {
                self.api
                    .download_pdf(&PdfRequest {
                        question: &question,
                        insights: &data.insights,
                        sql: &data.sql,
                        data: &data.data,
                    })
                    .await?
            }
            DownloadKind::Csv => self.api.download_csv(&data.data).await?,
        };

        tokio::fs::create_dir_all(dir).await?;
        let name = kind.file_name(Local::now());
        // The body lands under a hidden name first; only a complete export gets the real one.
        let partial = dir.join(format!(".{}.{}.part", name, Uuid::new_v4()));
        let written = match write_body(&mut stream, &partial).await {
            Ok(written) => written,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        let path = match claim_path(dir, &name).await {
            Ok(path) => path,
            Err(e) => {
                discard(&partial).await;
                return Err(e.into());
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            discard(&partial).await;
            discard(&path).await;
            return Err(e.into());
        }

        log::info!("Saved {} ({} bytes)", path.display(), written);
        Ok(path)
    }
}

async fn write_body(stream: &mut ByteStream, path: &Path) -> Result<usize, DownloadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;
    Ok(written)
}

/// Reserves `name` in `dir`, or `name` with a `_1`, `_2`, ... suffix when taken.
async fn claim_path(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let mut attempt = 0u32;
    loop {
        let candidate = match attempt {
            0 => dir.join(name),
            n if ext.is_empty() => dir.join(format!("{}_{}", stem, n)),
            n => dir.join(format!("{}_{}.{}", stem, n, ext)),
        };
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
