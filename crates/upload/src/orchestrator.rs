//! Direct upload of a finished analysis.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use serde::{Deserialize, Serialize};
use swingcast_capture_model::catalog::find_package;
use swingcast_common::config::UploadConfig;
use swingcast_common::error::{SwingError, SwingResult};
use tokio::io::AsyncReadExt;

use crate::store::SessionStore;

pub const DIRECT_UPLOAD_PATH: &str = "/api/analysis/upload-to-stream";
pub const CONTENT_TYPE: &str = "video/webm";

const CHUNK_SIZE: usize = 256 * 1024;

/// Body of the direct-upload request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub submission_id: String,
    pub duration: f64,
    pub workout_package: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectUploadResponse {
    #[serde(rename = "uploadUrl", alias = "uploadURL")]
    pub upload_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
    pub percent: u8,
}

impl UploadProgress {
    pub fn new(loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((loaded.min(total) as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            loaded,
            total,
            percent,
        }
    }
}

pub type UploadProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Final (possibly re-encoded) artifact.
    pub segment_path: PathBuf,
    pub duration_secs: f64,
    /// Id of the selected workout package. Required.
    pub workout_package: Option<String>,
    /// Whether the uploader works from the coach queue rather than admin.
    pub coach: bool,
}

/// Where the caller goes after a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadOutcome {
    ReturnToQueue { coach: bool },
}

impl UploadOutcome {
    pub fn queue_path(&self) -> &'static str {
        match self {
            Self::ReturnToQueue { coach: true } => "/coach/queue",
            Self::ReturnToQueue { coach: false } => "/admin/queue",
        }
    }
}

pub fn analysis_file_name(submission_id: &str, unix_millis: i64) -> String {
    format!("analysis-{submission_id}-{unix_millis}.webm")
}

/// Streams a finished analysis to the submission API.
pub struct UploadOrchestrator {
    client: reqwest::Client,
    api_base: String,
    request_timeout: Duration,
    store: SessionStore,
}

impl UploadOrchestrator {
    pub fn new(config: &UploadConfig, store: SessionStore) -> SwingResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SwingError::transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            store,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Request an upload URL, stream the artifact to it, then clear the
    /// session selection. Failures are returned as-is and never retried.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        progress: Option<UploadProgressCallback>,
    ) -> SwingResult<UploadOutcome> {
        let package = request
            .workout_package
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                SwingError::validation("Please select a workout package before uploading")
            })?;
        let package = find_package(package)
            .ok_or_else(|| SwingError::validation(format!("Unknown workout package: {package}")))?;
        if !request.segment_path.is_file() {
            return Err(SwingError::FileNotFound {
                path: request.segment_path.clone(),
            });
        }

        let submission_id = self.store.submission_id()?;
        let file_name = analysis_file_name(&submission_id, chrono::Utc::now().timestamp_millis());
        tracing::info!(
            submission_id = %submission_id,
            file_name = %file_name,
            package = package.id,
            "Requesting upload URL"
        );

        let upload_url = self
            .request_upload_url(&DirectUploadRequest {
                file_name: file_name.clone(),
                content_type: CONTENT_TYPE.to_string(),
                submission_id,
                duration: request.duration_secs,
                workout_package: package.id.to_string(),
            })
            .await?;

        self.send_file(&upload_url, request, &file_name, progress)
            .await?;
        tracing::info!(file_name = %file_name, "Upload complete");

        self.store.clear_selection()?;
        Ok(UploadOutcome::ReturnToQueue {
            coach: request.coach,
        })
    }

    async fn request_upload_url(&self, body: &DirectUploadRequest) -> SwingResult<String> {
        let response = self
            .client
            .post(format!("{}{DIRECT_UPLOAD_PATH}", self.api_base))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(SwingError::Upload {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: DirectUploadResponse = serde_json::from_str(&text).map_err(|e| {
            SwingError::transport(format!("Direct-upload response has no upload URL: {e}"))
        })?;
        Ok(self.resolve_url(&parsed.upload_url))
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.api_base)
        } else {
            url.to_string()
        }
    }

    async fn send_file(
        &self,
        upload_url: &str,
        request: &UploadRequest,
        file_name: &str,
        progress: Option<UploadProgressCallback>,
    ) -> SwingResult<()> {
        let file = tokio::fs::File::open(&request.segment_path).await?;
        let total = file.metadata().await?.len();
        tracing::debug!(upload_url, total, "Uploading artifact");
        if let Some(cb) = &progress {
            cb(UploadProgress::new(0, total));
        }

        let chunks = stream::unfold((file, 0u64, progress), move |(mut file, loaded, progress)| async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    let loaded = loaded + n as u64;
                    if let Some(cb) = &progress {
                        cb(UploadProgress::new(loaded, total));
                    }
                    Some((Ok::<_, std::io::Error>(buf), (file, loaded, progress)))
                }
                Err(err) => Some((Err(err), (file, loaded, progress))),
            }
        });

        let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(chunks), total)
            .file_name(file_name.to_string())
            .mime_str(CONTENT_TYPE)
            .map_err(transport_error)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        if status == 200 || status == 201 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status, body = %body, "Upload rejected");
        Err(SwingError::Upload { status, body })
    }
}

fn transport_error(err: reqwest::Error) -> SwingError {
    SwingError::transport(err.to_string())
}
