//! Turning user input (path, URL, video-site link) into a local video file.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::{fs, io::AsyncWriteExt, process::Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    chain::{Attempt, run_chain},
    error::{Result, VideowiseError},
    progress::{Phase, ProgressSink},
};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSite {
    YouTube,
    Vimeo,
    Dailymotion,
}

impl ExternalSite {
    pub fn name(&self) -> &'static str {
        match self {
            ExternalSite::YouTube => "YouTube",
            ExternalSite::Vimeo => "Vimeo",
            ExternalSite::Dailymotion => "Dailymotion",
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let on = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        if on("youtube.com") || on("youtu.be") || on("youtube-nocookie.com") {
            Some(ExternalSite::YouTube)
        } else if on("vimeo.com") {
            Some(ExternalSite::Vimeo)
        } else if on("dailymotion.com") || on("dai.ly") {
            Some(ExternalSite::Dailymotion)
        } else {
            None
        }
    }
}

impl fmt::Display for ExternalSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    LocalFile(PathBuf),
    DirectUrl(Url),
    External { url: Url, site: ExternalSite },
}

impl VideoSource {
    pub fn classify(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VideowiseError::validation("no video path or URL given"));
        }

        let lower = input.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Ok(VideoSource::LocalFile(PathBuf::from(input)));
        }

        let url = Url::parse(input)
            .map_err(|e| VideowiseError::validation(format!("invalid URL {input:?}: {e}")))?;
        match url.host_str().and_then(ExternalSite::from_host) {
            Some(site) => Ok(VideoSource::External { url, site }),
            None => Ok(VideoSource::DirectUrl(url)),
        }
    }

    pub fn source_ref(&self) -> String {
        match self {
            VideoSource::LocalFile(path) => path.display().to_string(),
            VideoSource::DirectUrl(url) | VideoSource::External { url, .. } => url.to_string(),
        }
    }
}

/// File name for a downloaded URL: last path segment, sanitized, `.mp4`
/// appended when there is no extension.
pub fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or_default();

    let mut name: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name = name.trim_matches('.').to_string();
    if name.is_empty() {
        name = "video".to_string();
    }
    if Path::new(&name).extension().is_none() {
        name.push_str(".mp4");
    }
    name
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Streams a URL to disk through a `.part` file.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn fetch(
        &self,
        url: &Url,
        dest_dir: &Path,
        progress: &ProgressSink,
    ) -> std::result::Result<PathBuf, FetchError> {
        fs::create_dir_all(dest_dir).await?;
        let target = dest_dir.join(filename_from_url(url));
        let part = target.with_extension(match target.extension() {
            Some(ext) => format!("{}.part", ext.to_string_lossy()),
            None => "part".to_string(),
        });

        let outcome = match tokio::time::timeout(self.timeout, self.stream_to(url, &part, progress)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(self.timeout.as_secs())),
        };

        if let Err(e) = outcome {
            if let Err(rm) = fs::remove_file(&part).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %rm, "Could not remove partial download");
                }
            }
            return Err(e);
        }

        fs::rename(&part, &target).await?;
        info!(url = %url, path = %target.display(), "Download complete");
        Ok(target)
    }

    async fn stream_to(
        &self,
        url: &Url,
        part: &Path,
        progress: &ProgressSink,
    ) -> std::result::Result<(), FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        progress.emit(0, Phase::Resolving, "Downloading video");
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let percent = match total {
                Some(total) => (downloaded.min(total) * 100 / total) as u8,
                // No declared length: one percent per MB, never reaching 100.
                None => (downloaded / MB).min(95) as u8,
            };
            progress.emit(
                percent,
                Phase::Resolving,
                format!("Downloading video ({} MB)", downloaded / MB),
            );
        }
        file.flush().await?;
        debug!(bytes = downloaded, "Download stream finished");
        Ok(())
    }
}

/// Turns a video-site link into a direct binary URL.
#[async_trait]
pub trait DirectUrlResolver: Send + Sync {
    fn label(&self) -> String;

    async fn resolve(&self, url: &Url) -> std::result::Result<Url, String>;
}

/// Asks a locally installed `yt-dlp` for the media URL.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    program: String,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self {
            program: "yt-dlp".to_string(),
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectUrlResolver for YtDlpResolver {
    fn label(&self) -> String {
        self.program.clone()
    }

    async fn resolve(&self, url: &Url) -> std::result::Result<Url, String> {
        let output = Command::new(&self.program)
            .arg("-g")
            .arg("-f")
            .arg("best[ext=mp4]/best")
            .arg("--extractor-args")
            .arg("youtube:player_client=android,web")
            .arg(url.as_str())
            .output()
            .await
            .map_err(|e| format!("could not run {}: {e}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{}: {}", output.status, stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| "no media URL printed".to_string())?;
        Url::parse(line).map_err(|e| format!("unusable media URL: {e}"))
    }
}

/// Input handed to every download strategy.
pub struct FetchJob {
    pub url: Url,
    pub dest_dir: PathBuf,
    pub progress: ProgressSink,
}

struct DirectFetch {
    fetcher: HttpFetcher,
}

#[async_trait]
impl Attempt<FetchJob, PathBuf> for DirectFetch {
    fn label(&self) -> String {
        "direct".to_string()
    }

    async fn attempt(&self, job: &FetchJob) -> std::result::Result<PathBuf, String> {
        self.fetcher
            .fetch(&job.url, &job.dest_dir, &job.progress)
            .await
            .map_err(|e| e.to_string())
    }
}

struct ResolveThenFetch {
    resolver: Arc<dyn DirectUrlResolver>,
    fetcher: HttpFetcher,
}

#[async_trait]
impl Attempt<FetchJob, PathBuf> for ResolveThenFetch {
    fn label(&self) -> String {
        self.resolver.label()
    }

    async fn attempt(&self, job: &FetchJob) -> std::result::Result<PathBuf, String> {
        let media = self.resolver.resolve(&job.url).await?;
        debug!(method = %self.resolver.label(), "Resolved direct media URL");
        self.fetcher
            .fetch(&media, &job.dest_dir, &job.progress)
            .await
            .map_err(|e| format!("fetch of resolved URL failed: {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub path: PathBuf,
    pub source_ref: String,
    /// True when the file was fetched into the work directory and can be removed.
    pub downloaded: bool,
}

pub struct ResolutionChain {
    fetcher: HttpFetcher,
    resolvers: Vec<Arc<dyn DirectUrlResolver>>,
}

impl ResolutionChain {
    pub fn new(fetcher: HttpFetcher, resolvers: Vec<Arc<dyn DirectUrlResolver>>) -> Self {
        Self { fetcher, resolvers }
    }

    pub async fn resolve(
        &self,
        source: &VideoSource,
        backend_available: bool,
        dest_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<ResolvedVideo> {
        let source_ref = source.source_ref();

        let (url, strategies): (&Url, Vec<Box<dyn Attempt<FetchJob, PathBuf>>>) = match source {
            VideoSource::LocalFile(path) => {
                let is_file = fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false);
                if !is_file {
                    return Err(VideowiseError::validation(format!(
                        "{} is not a readable video file",
                        path.display()
                    )));
                }
                progress.emit(100, Phase::Resolving, "Using local file");
                return Ok(ResolvedVideo {
                    path: path.clone(),
                    source_ref,
                    downloaded: false,
                });
            }
            VideoSource::DirectUrl(url) => (
                url,
                vec![Box::new(DirectFetch {
                    fetcher: self.fetcher.clone(),
                }) as Box<dyn Attempt<FetchJob, PathBuf>>],
            ),
            VideoSource::External { url, site } => {
                if !backend_available {
                    return Err(VideowiseError::ExternalReferenceNeedsBackend {
                        url: url.to_string(),
                        site: site.name().to_string(),
                    });
                }
                let strategies = self
                    .resolvers
                    .iter()
                    .map(|resolver| {
                        Box::new(ResolveThenFetch {
                            resolver: Arc::clone(resolver),
                            fetcher: self.fetcher.clone(),
                        }) as Box<dyn Attempt<FetchJob, PathBuf>>
                    })
                    .collect();
                (url, strategies)
            }
        };

        info!(url = %url, methods = strategies.len(), "Fetching video");
        progress.emit(0, Phase::Resolving, "Fetching video");
        let job = FetchJob {
            url: url.clone(),
            dest_dir: dest_dir.to_path_buf(),
            progress: progress.clone(),
        };

        match run_chain(&strategies, &job).await {
            Ok(success) => {
                for failure in &success.failures {
                    warn!(%failure, "Download method failed before a later one succeeded");
                }
                progress.emit(100, Phase::Resolving, "Video downloaded");
                Ok(ResolvedVideo {
                    path: success.output,
                    source_ref,
                    downloaded: true,
                })
            }
            Err(attempts) => Err(VideowiseError::DownloadChainExhausted {
                url: url.to_string(),
                attempts,
            }),
        }
    }
}
