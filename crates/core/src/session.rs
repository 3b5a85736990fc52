//! Session context: wires the collaborators together and decides, per
//! action, whether work goes to the backend or runs locally.

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use reqwest::Client;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    backend::{BackendProbe, DEFAULT_REQUEST_TIMEOUT, HttpBackend, JobBackend, SubmitMetadata},
    config::Config,
    credentials::CredentialResolver,
    error::{Result, VideowiseError},
    jobs::{Job, JobStatus, LocalJob, LocalJobStore, OwnerId},
    options::ProcessingOptions,
    orchestrator::{Orchestrator, OrchestratorConfig, VideoInput},
    progress::{Phase, ProgressSink},
    provider::{GeminiProvider, ProviderConfig, VideoProvider},
    reconcile::{JobReconciler, Listing, MAX_REMOTE_POLLS, REMOTE_POLL_INTERVAL},
    source::{DirectUrlResolver, HttpFetcher, ResolutionChain, VideoSource, YtDlpResolver},
    storage::LocalStorage,
    types::UserProfile,
};

/// How a session picks between backend and local processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModePolicy {
    /// Probe the backend; fall back to local once if it turns out unreachable.
    #[default]
    Auto,
    Local,
    /// Backend only. Network failures are reported, never demoted.
    Remote,
}

impl ModePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModePolicy::Auto => "auto",
            ModePolicy::Local => "local",
            ModePolicy::Remote => "remote",
        }
    }
}

impl fmt::Display for ModePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ModePolicy::Auto),
            "local" => Ok(ModePolicy::Local),
            "remote" => Ok(ModePolicy::Remote),
            other => Err(format!("unknown mode {other:?} (expected auto, local or remote)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Remote,
    Local,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    pub mode: ExecutionMode,
    /// The backend was tried first and found unreachable.
    pub demoted: bool,
}

/// Everything a [`Session`] is built from.
pub struct SessionParts {
    pub owner: OwnerId,
    pub profile: Option<UserProfile>,
    pub policy: ModePolicy,
    pub backend: Arc<dyn JobBackend>,
    pub provider: Arc<dyn VideoProvider>,
    pub resolvers: Vec<Arc<dyn DirectUrlResolver>>,
    pub fetcher: HttpFetcher,
    pub storage: LocalStorage,
    pub explicit_key: Option<String>,
    pub configured_keys: Vec<String>,
    pub orchestrator: OrchestratorConfig,
    pub remote_poll_interval: Duration,
    pub remote_max_polls: u32,
}

pub struct Session {
    owner: OwnerId,
    profile: Option<UserProfile>,
    policy: ModePolicy,
    backend: Arc<dyn JobBackend>,
    probe: Arc<BackendProbe>,
    credentials: Arc<CredentialResolver>,
    orchestrator: Orchestrator,
    resolution: ResolutionChain,
    local_jobs: LocalJobStore,
    reconciler: JobReconciler,
    work_dir: PathBuf,
}

impl Session {
    pub fn new(parts: SessionParts) -> Self {
        let probe = Arc::new(BackendProbe::new(parts.backend.clone()));
        let credentials = Arc::new(
            CredentialResolver::new(
                parts.provider.clone(),
                parts.storage.clone(),
                parts.configured_keys,
            )
            .with_explicit(parts.explicit_key),
        );
        let orchestrator = Orchestrator::new(parts.provider, credentials.clone())
            .with_config(parts.orchestrator);
        let local_jobs = LocalJobStore::new(parts.storage.clone());
        let reconciler = JobReconciler::new(parts.backend.clone(), probe.clone(), local_jobs.clone())
            .with_polling(parts.remote_poll_interval, parts.remote_max_polls);

        Self {
            owner: parts.owner,
            profile: parts.profile,
            policy: parts.policy,
            backend: parts.backend,
            probe,
            credentials,
            orchestrator,
            resolution: ResolutionChain::new(parts.fetcher, parts.resolvers),
            local_jobs,
            reconciler,
            work_dir: parts.storage.root().join("downloads"),
        }
    }

    /// Production wiring: HTTP backend, Gemini provider, yt-dlp resolver.
    pub async fn from_config(config: &Config, explicit_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VideowiseError::Config(format!("HTTP client: {e}")))?;
        let provider = GeminiProvider::new(ProviderConfig {
            api_base: config.provider_url.clone(),
            model: config.model.clone(),
            upload_timeout: config.upload_timeout,
            ..ProviderConfig::default()
        })
        .map_err(|e| VideowiseError::Config(format!("provider client: {e}")))?;

        let backend = HttpBackend::new(
            client.clone(),
            config.backend_url.clone(),
            config.backend_token.clone(),
        )
        .with_timeouts(DEFAULT_REQUEST_TIMEOUT, config.upload_timeout);

        Ok(Self::new(SessionParts {
            owner: config.owner.clone(),
            profile: config.load_profile().await?,
            policy: config.mode,
            backend: Arc::new(backend),
            provider: Arc::new(provider),
            resolvers: vec![Arc::new(YtDlpResolver::new())],
            fetcher: HttpFetcher::new(client, config.fetch_timeout),
            storage: LocalStorage::new(&config.data_dir),
            explicit_key,
            configured_keys: config.api_keys.clone(),
            orchestrator: OrchestratorConfig::default(),
            remote_poll_interval: REMOTE_POLL_INTERVAL,
            remote_max_polls: MAX_REMOTE_POLLS,
        }))
    }

    /// Process one video, remotely or locally depending on policy and
    /// backend availability.
    pub async fn submit(
        &self,
        input: &str,
        options: &ProcessingOptions,
        progress: &ProgressSink,
    ) -> Result<Submission> {
        options.validate()?;
        let source = VideoSource::classify(input)?;

        let try_remote = match self.policy {
            ModePolicy::Local => false,
            ModePolicy::Remote => true,
            // A link to a video site has no local path, so an earlier negative
            // answer is worth one fresh probe before giving up on it.
            ModePolicy::Auto => match source {
                VideoSource::External { .. } if !self.probe.is_available().await => {
                    self.probe.recheck().await
                }
                _ => self.probe.is_available().await,
            },
        };

        let mut demoted = false;
        if try_remote {
            // Only the submission itself may demote; once the backend owns
            // the job, polling failures are reported as they are.
            match self.submit_remote(&source, options, progress).await {
                Ok(job_id) => {
                    let job = self.follow_remote(&job_id, options, progress).await?;
                    return Ok(Submission {
                        job,
                        mode: ExecutionMode::Remote,
                        demoted,
                    });
                }
                Err(e) if e.is_network() && self.policy == ModePolicy::Auto => {
                    warn!(error = %e, "Backend unreachable, processing locally instead");
                    self.probe.demote().await;
                    demoted = true;
                }
                Err(e) => return Err(e),
            }
        }

        let job = self.run_local(&source, options, progress).await?;
        Ok(Submission {
            job,
            mode: ExecutionMode::Local,
            demoted,
        })
    }

    async fn submit_remote(
        &self,
        source: &VideoSource,
        options: &ProcessingOptions,
        progress: &ProgressSink,
    ) -> Result<String> {
        progress.emit(0, Phase::Submitting, "Submitting to backend");
        let metadata = SubmitMetadata {
            owner_id: self.owner.to_string(),
            user_profile: self.profile.clone(),
        };

        let job_id = match source {
            VideoSource::LocalFile(path) => {
                if !fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false) {
                    return Err(VideowiseError::validation(format!(
                        "{} is not a readable video file",
                        path.display()
                    )));
                }
                self.backend.submit_upload(path, options, &metadata).await?
            }
            VideoSource::DirectUrl(url) | VideoSource::External { url, .. } => {
                self.backend.submit_url(url.as_str(), options, &metadata).await?
            }
        };
        info!(job_id = %job_id, "Submitted to backend");
        Ok(job_id)
    }

    async fn follow_remote(
        &self,
        job_id: &str,
        options: &ProcessingOptions,
        progress: &ProgressSink,
    ) -> Result<Job> {
        let mut job = self
            .reconciler
            .await_remote(&self.owner, job_id, &progress.span(5, 100))
            .await?;
        if let Job::Remote(remote) = &mut job {
            remote.style = Some(options.style.to_string());
            match remote.status {
                JobStatus::Done => progress.emit(100, Phase::Done, "Complete"),
                JobStatus::Failed => progress.emit(0, Phase::Failed, remote.step.clone()),
                _ => {}
            }
        }
        Ok(job)
    }

    async fn run_local(
        &self,
        source: &VideoSource,
        options: &ProcessingOptions,
        progress: &ProgressSink,
    ) -> Result<Job> {
        let backend_available = self.probe.is_available().await;
        let work_dir = self.work_dir.join(Uuid::new_v4().to_string());

        let outcome = async {
            let resolved = self
                .resolution
                .resolve(source, backend_available, &work_dir, &progress.span(0, 20))
                .await?;
            let input = VideoInput {
                path: resolved.path,
                source_ref: resolved.source_ref,
            };
            Ok::<_, VideowiseError>(
                self.orchestrator
                    .run(&input, options, self.profile.as_ref(), &progress.span(20, 100))
                    .await,
            )
        }
        .await;

        if let Err(e) = fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %work_dir.display(), error = %e, "Could not clean download directory");
            }
        }

        // A failed resolution leaves no job behind; a failed orchestration does.
        match outcome? {
            Ok(result) => {
                let job = LocalJob::succeeded(
                    self.owner.clone(),
                    source.source_ref(),
                    options.clone(),
                    result,
                );
                self.local_jobs.insert(&job).await?;
                info!(job_id = %job.id, "Local job stored");
                Ok(Job::Local(job))
            }
            Err(e) => {
                let job = LocalJob::failed(
                    self.owner.clone(),
                    source.source_ref(),
                    options.clone(),
                    e.to_string(),
                );
                if let Err(store_err) = self.local_jobs.insert(&job).await {
                    warn!(error = %store_err, "Could not record failed local job");
                }
                Err(e)
            }
        }
    }

    pub async fn jobs(&self) -> Result<Listing> {
        self.reconciler.list(&self.owner).await
    }

    pub async fn job(&self, id: &str) -> Result<Job> {
        self.reconciler.detail(&self.owner, id).await
    }

    pub async fn forget_credentials(&self) -> Result<()> {
        self.credentials.clear().await
    }
}
