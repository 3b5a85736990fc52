//! Multimodal AI provider: asset upload, readiness, generation, deletion.
//!
//! [`VideoProvider`] is the seam the orchestrator and credential resolver
//! talk to. [`GeminiProvider`] implements it against the Gemini Files API.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const UPLOAD_CHUNK: usize = 256 * 1024;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider rejected the API key ({status})")]
    Unauthorized { status: u16 },

    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Auth-class failures purge the cached credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Unauthorized { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Pending,
    Ready,
    Failed,
}

impl AssetState {
    fn from_wire(state: Option<&str>) -> Self {
        match state {
            Some("ACTIVE") => AssetState::Ready,
            Some("FAILED") => AssetState::Failed,
            _ => AssetState::Pending,
        }
    }
}

/// Raw outcome of an upload; the handle may be missing on a malformed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub handle: Option<String>,
    pub uri: Option<String>,
    pub mime_type: String,
    pub state: AssetState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub handle: String,
    pub uri: String,
    pub mime_type: String,
    pub state: AssetState,
}

pub struct UploadRequest {
    pub display_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("display_name", &self.display_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Receives the cumulative number of bytes handed to the transport.
pub type SentCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Cheap call used to check that a key works.
    async fn probe(&self, api_key: &str) -> Result<(), ProviderError>;

    async fn upload(
        &self,
        api_key: &str,
        request: UploadRequest,
        on_sent: Option<SentCallback>,
    ) -> Result<UploadReceipt, ProviderError>;

    async fn asset_state(&self, api_key: &str, handle: &str) -> Result<AssetState, ProviderError>;

    async fn generate(
        &self,
        api_key: &str,
        asset: &UploadedAsset,
        directive: &str,
    ) -> Result<String, ProviderError>;

    async fn delete_asset(&self, api_key: &str, handle: &str) -> Result<(), ProviderError>;
}

/// Guess a video MIME type from a file name.
pub fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mpeg" | "mpg" => "video/mpeg",
        "3gp" => "video/3gpp",
        _ => "video/mp4",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_base: String,
    pub model: String,
    /// Upload session start, status and delete calls.
    pub request_timeout: Duration,
    /// Sending the video bytes.
    pub upload_timeout: Duration,
    pub generate_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            generate_timeout: DEFAULT_GENERATE_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct StartUpload<'a> {
    file: StartUploadFile<'a>,
}

#[derive(Debug, Serialize)]
struct StartUploadFile<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: Option<FileResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: Option<String>,
    uri: Option<String>,
    mime_type: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Gemini Files API client.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    config: ProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        let bad_key = status == StatusCode::BAD_REQUEST && message.contains("API key");
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) || bad_key {
            return Err(ProviderError::Unauthorized {
                status: status.as_u16(),
            });
        }
        Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn counted_body(bytes: Bytes, on_sent: Option<SentCallback>) -> reqwest::Body {
        let Some(on_sent) = on_sent else {
            return reqwest::Body::from(bytes);
        };

        let chunks: Vec<Bytes> = (0..bytes.len())
            .step_by(UPLOAD_CHUNK)
            .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK).min(bytes.len())))
            .collect();
        let mut sent = 0u64;
        let counted = stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            on_sent(sent);
            Ok::<Bytes, std::io::Error>(chunk)
        }));
        reqwest::Body::wrap_stream(counted)
    }
}

#[async_trait]
impl VideoProvider for GeminiProvider {
    async fn probe(&self, api_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(self.url("v1beta/models"))
            .query(&[("pageSize", "1")])
            .header("x-goog-api-key", api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upload(
        &self,
        api_key: &str,
        request: UploadRequest,
        on_sent: Option<SentCallback>,
    ) -> Result<UploadReceipt, ProviderError> {
        let size = request.bytes.len();

        // Resumable protocol: start a session, then send all bytes and finalize.
        let start = self
            .client
            .post(self.url("upload/v1beta/files"))
            .header("x-goog-api-key", api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &request.mime_type)
            .json(&StartUpload {
                file: StartUploadFile {
                    display_name: &request.display_name,
                },
            })
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let start = Self::check(start).await?;

        let session_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("upload session URL missing".to_string())
            })?;
        debug!(size, "provider upload session opened");

        let response = self
            .client
            .post(&session_url)
            .header("x-goog-api-key", api_key)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Self::counted_body(request.bytes, on_sent))
            .timeout(self.config.upload_timeout)
            .send()
            .await?;
        let envelope: FileEnvelope = Self::check(response).await?.json().await?;

        let file = envelope.file.unwrap_or(FileResource {
            name: None,
            uri: None,
            mime_type: None,
            state: None,
        });
        Ok(UploadReceipt {
            handle: file.name,
            uri: file.uri,
            mime_type: file.mime_type.unwrap_or(request.mime_type),
            state: AssetState::from_wire(file.state.as_deref()),
        })
    }

    async fn asset_state(&self, api_key: &str, handle: &str) -> Result<AssetState, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("v1beta/{handle}")))
            .header("x-goog-api-key", api_key)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let file: FileResource = Self::check(response).await?.json().await?;
        Ok(AssetState::from_wire(file.state.as_deref()))
    }

    async fn generate(
        &self,
        api_key: &str,
        asset: &UploadedAsset,
        directive: &str,
    ) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type: &asset.mime_type,
                            file_uri: &asset.uri,
                        },
                    },
                    Part::Text { text: directive },
                ],
            }],
        };

        let response = self
            .client
            .post(self.url(&format!(
                "v1beta/models/{}:generateContent",
                self.config.model
            )))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .timeout(self.config.generate_timeout)
            .send()
            .await?;
        let response: GenerateResponse = Self::check(response).await?.json().await?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "no text in generation response".to_string(),
            ));
        }
        Ok(text.to_string())
    }

    async fn delete_asset(&self, api_key: &str, handle: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.url(&format!("v1beta/{handle}")))
            .header("x-goog-api-key", api_key)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(ProviderConfig {
            api_base: server.uri(),
            model: "test-model".to_string(),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    fn ready_asset() -> UploadedAsset {
        UploadedAsset {
            handle: "files/abc".to_string(),
            uri: "https://example.test/files/abc".to_string(),
            mime_type: "video/mp4".to_string(),
            state: AssetState::Ready,
        }
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(mime_for("talk.MOV"), "video/quicktime");
        assert_eq!(mime_for("clip.webm"), "video/webm");
        assert_eq!(mime_for("noext"), "video/mp4");
    }

    #[tokio::test]
    async fn probe_classifies_rejected_keys_as_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(header("x-goog-api-key", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(header("x-goog-api-key", "bad"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("API key not valid. Please pass a valid API key."),
            )
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider.probe("good").await.unwrap();
        let err = provider.probe("bad").await.unwrap_err();
        assert!(err.is_auth(), "{err}");
    }

    #[tokio::test]
    async fn uploads_through_resumable_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .and(header("X-Goog-Upload-Command", "start"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-goog-upload-url", format!("{}/session/1", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file": {
                    "name": "files/abc",
                    "uri": "https://example.test/files/abc",
                    "mimeType": "video/mp4",
                    "state": "PROCESSING"
                }
            })))
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_sent: SentCallback = Arc::new(move |n| sink.lock().unwrap().push(n));

        let receipt = provider(&server)
            .upload(
                "k",
                UploadRequest {
                    display_name: "clip.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                    bytes: Bytes::from(vec![0u8; UPLOAD_CHUNK + 10]),
                },
                Some(on_sent),
            )
            .await
            .unwrap();

        assert_eq!(receipt.handle.as_deref(), Some("files/abc"));
        assert_eq!(receipt.state, AssetState::Pending);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![UPLOAD_CHUNK as u64, UPLOAD_CHUNK as u64 + 10]
        );
    }

    #[tokio::test]
    async fn upload_reply_without_file_has_no_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-goog-upload-url", format!("{}/session/2", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let receipt = provider(&server)
            .upload(
                "k",
                UploadRequest {
                    display_name: "clip.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                    bytes: Bytes::from_static(b"data"),
                },
                None,
            )
            .await
            .unwrap();

        assert!(receipt.handle.is_none());
    }

    #[tokio::test]
    async fn generation_joins_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "Hello "}, {"text": "world."}]}}]
            })))
            .mount(&server)
            .await;

        let text = provider(&server)
            .generate("k", &ready_asset(), "Summarize")
            .await
            .unwrap();
        assert_eq!(text, "Hello world.");
    }

    #[tokio::test]
    async fn stalled_generation_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(30))
                    .set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&server)
            .await;
        let provider = GeminiProvider::new(ProviderConfig {
            api_base: server.uri(),
            model: "test-model".to_string(),
            generate_timeout: Duration::from_millis(200),
            ..ProviderConfig::default()
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = provider
            .generate("k", &ready_asset(), "Summarize")
            .await
            .unwrap_err();

        assert!(matches!(&err, ProviderError::Transport(e) if e.is_timeout()), "{err}");
        assert!(!err.is_auth());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stalled_upload_session_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let provider = GeminiProvider::new(ProviderConfig {
            api_base: server.uri(),
            model: "test-model".to_string(),
            request_timeout: Duration::from_millis(200),
            ..ProviderConfig::default()
        })
        .unwrap();

        let err = provider
            .upload(
                "k",
                UploadRequest {
                    display_name: "clip.mp4".to_string(),
                    mime_type: "video/mp4".to_string(),
                    bytes: Bytes::from_static(b"data"),
                },
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(&err, ProviderError::Transport(e) if e.is_timeout()), "{err}");
    }

    #[tokio::test]
    async fn reads_asset_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "files/abc",
                "state": "ACTIVE"
            })))
            .mount(&server)
            .await;

        let state = provider(&server).asset_state("k", "files/abc").await.unwrap();
        assert_eq!(state, AssetState::Ready);
    }
}
