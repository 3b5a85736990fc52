//! VideoWise backend REST client and the availability probe that gates
//! remote mode.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{Result, VideowiseError},
    jobs::JobStatus,
    options::{ProcessingOptions, SummaryFormat},
    provider::mime_for,
    types::{FrameCaption, SummaryResult, UserProfile},
};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Multipart video uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_LIST_LIMIT: u32 = 20;

/// Free-form context forwarded with a submission.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMetadata {
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub step: String,
    pub eta_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobEntry {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub step: String,
    pub created_at: Option<DateTime<Utc>>,
    pub summary_style: Option<String>,
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Never errors: anything but a 2xx within the probe timeout is `false`.
    async fn health(&self) -> bool;

    async fn submit_upload(
        &self,
        path: &Path,
        options: &ProcessingOptions,
        metadata: &SubmitMetadata,
    ) -> Result<String>;

    async fn submit_url(
        &self,
        url: &str,
        options: &ProcessingOptions,
        metadata: &SubmitMetadata,
    ) -> Result<String>;

    async fn status(&self, job_id: &str) -> Result<RemoteStatus>;

    async fn result(&self, job_id: &str) -> Result<SummaryResult>;

    async fn list(&self, limit: u32) -> Result<Vec<RemoteJobEntry>>;
}

#[derive(Debug, Serialize)]
struct FromUrlRequest<'a> {
    url: &'a str,
    num_frames: u32,
    summary_style: &'a str,
    summary_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_length_words: Option<u32>,
    metadata: &'a SubmitMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    job_id: Option<String>,
    status: JobStatus,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    eta_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    visual_captions: Vec<FrameCaption>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    summary_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    jobs: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntry {
    id: String,
    status: JobStatus,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    summary_style: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn percent(progress: f64) -> u8 {
    progress.clamp(0.0, 100.0).round() as u8
}

/// Backend timestamps come as RFC 3339 or as SQLite's `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn transport_error(e: reqwest::Error) -> VideowiseError {
    if e.is_decode() {
        VideowiseError::Backend {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: format!("unreadable response: {e}"),
        }
    } else {
        VideowiseError::unreachable(e.to_string())
    }
}

async fn check(response: Response, job_id: Option<&str>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    match (status, job_id) {
        (StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT, _) => {
            Err(VideowiseError::unreachable(format!("backend returned {status}")))
        }
        (StatusCode::NOT_FOUND, Some(id)) => Err(VideowiseError::NotFound {
            job_id: id.to_string(),
        }),
        (StatusCode::FORBIDDEN, Some(id)) => Err(VideowiseError::AccessDenied {
            job_id: id.to_string(),
        }),
        _ => Err(VideowiseError::Backend {
            status: status.as_u16(),
            message,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
    token: Option<String>,
    probe_timeout: Duration,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpBackend {
    pub fn new(client: Client, base: Url, token: Option<String>) -> Self {
        Self {
            client,
            base,
            token,
            probe_timeout: PROBE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, request: Duration, upload: Duration) -> Self {
        self.request_timeout = request;
        self.upload_timeout = upload;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| VideowiseError::Config(format!("bad backend URL {base}: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, job_id: Option<&str>) -> Result<Response> {
        self.send_within(request, job_id, self.request_timeout).await
    }

    /// A stalled backend surfaces as a network-class error once `timeout` passes.
    async fn send_within(
        &self,
        request: RequestBuilder,
        job_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Response> {
        let response = self
            .authorized(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check(response, job_id).await
    }
}

#[async_trait]
impl JobBackend for HttpBackend {
    async fn health(&self) -> bool {
        let Ok(url) = self.endpoint("health") else {
            return false;
        };
        match self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = %response.status(), "Backend health response");
                response.status().is_success()
            }
            Err(e) => {
                debug!(error = %e, "Backend health probe failed");
                false
            }
        }
    }

    async fn submit_upload(
        &self,
        path: &Path,
        options: &ProcessingOptions,
        metadata: &SubmitMetadata,
    ) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());
        let bytes = fs::read(path).await?;
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime_for(&file_name))
            .map_err(|e| VideowiseError::validation(format!("bad upload MIME type: {e}")))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("num_frames", options.frame_count.to_string())
            .text("summary_style", options.style.as_str())
            .text("summary_format", options.format.as_str())
            .text("metadata", serde_json::to_string(metadata)?);
        if let Some(words) = options.target_words.words() {
            form = form.text("summary_length_words", words.to_string());
        }

        let response = self
            .send_within(
                self.client.post(self.endpoint("videos/upload")?).multipart(form),
                None,
                self.upload_timeout,
            )
            .await?;
        let submitted: SubmitResponse = response.json().await.map_err(transport_error)?;
        info!(job_id = %submitted.job_id, file = %file_name, "Backend accepted upload");
        Ok(submitted.job_id)
    }

    async fn submit_url(
        &self,
        url: &str,
        options: &ProcessingOptions,
        metadata: &SubmitMetadata,
    ) -> Result<String> {
        let body = FromUrlRequest {
            url,
            num_frames: options.frame_count,
            summary_style: options.style.as_str(),
            summary_format: options.format.as_str(),
            summary_length_words: options.target_words.words(),
            metadata,
        };

        let response = self
            .send(self.client.post(self.endpoint("videos/from-url")?).json(&body), None)
            .await?;
        let submitted: SubmitResponse = response.json().await.map_err(transport_error)?;
        info!(job_id = %submitted.job_id, url, "Backend accepted URL");
        Ok(submitted.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<RemoteStatus> {
        let url = self.endpoint(&format!("videos/status/{job_id}"))?;
        let response = self.send(self.client.get(url), Some(job_id)).await?;
        let status: StatusResponse = response.json().await.map_err(transport_error)?;

        Ok(RemoteStatus {
            job_id: status.job_id.unwrap_or_else(|| job_id.to_string()),
            status: status.status,
            progress: percent(status.progress),
            step: status.step.unwrap_or_default(),
            eta_seconds: status.eta_seconds.map(|s| s.max(0.0).round() as u64),
        })
    }

    async fn result(&self, job_id: &str) -> Result<SummaryResult> {
        let url = self.endpoint(&format!("videos/result/{job_id}"))?;
        let response = self.send(self.client.get(url), Some(job_id)).await?;
        let result: ResultResponse = response.json().await.map_err(transport_error)?;

        let format_tag = result
            .summary_format
            .as_deref()
            .and_then(|f| f.parse::<SummaryFormat>().ok())
            .unwrap_or_default();
        Ok(SummaryResult {
            summary: result.summary,
            transcript: result.transcript.filter(|t| !t.trim().is_empty()),
            frame_captions: result.visual_captions,
            asset_url: result.video_url,
            format_tag,
            source_ref: None,
        })
    }

    async fn list(&self, limit: u32) -> Result<Vec<RemoteJobEntry>> {
        let request = self
            .client
            .get(self.endpoint("videos/list")?)
            .query(&[("limit", limit)]);
        let response = self.send(request, None).await?;
        let listing: ListResponse = response.json().await.map_err(transport_error)?;

        Ok(listing
            .jobs
            .into_iter()
            .map(|entry| RemoteJobEntry {
                created_at: entry.created_at.as_deref().and_then(|raw| {
                    let parsed = parse_timestamp(raw);
                    if parsed.is_none() {
                        warn!(job_id = %entry.id, raw, "Unparseable createdAt from backend");
                    }
                    parsed
                }),
                id: entry.id,
                status: entry.status,
                progress: percent(entry.progress),
                step: entry.step.unwrap_or_default(),
                summary_style: entry.summary_style,
            })
            .collect())
    }
}

/// Session-cached answer to "is the backend reachable?".
pub struct BackendProbe {
    backend: Arc<dyn JobBackend>,
    state: Mutex<Option<bool>>,
}

impl BackendProbe {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(None),
        }
    }

    /// Probes once per session; later calls return the cached answer.
    pub async fn is_available(&self) -> bool {
        let mut state = self.state.lock().await;
        if let Some(available) = *state {
            return available;
        }
        let available = self.backend.health().await;
        info!(available, "Backend availability probed");
        *state = Some(available);
        available
    }

    pub async fn recheck(&self) -> bool {
        self.state.lock().await.take();
        self.is_available().await
    }

    /// Mark the backend unavailable after a network-class failure.
    pub async fn demote(&self) {
        let mut state = self.state.lock().await;
        if *state != Some(false) {
            warn!("Backend marked unavailable for this session");
        }
        *state = Some(false);
    }
}
