//! Direct-mode processing: upload, await readiness, generate, finalize.

use std::{path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    credentials::{Credential, CredentialResolver},
    error::{Result, VideowiseError},
    format::trim_to_word_target,
    options::ProcessingOptions,
    progress::{Phase, ProgressSink},
    prompt,
    provider::{
        AssetState, ProviderError, SentCallback, UploadRequest, UploadedAsset, VideoProvider,
        mime_for,
    },
    types::{SummaryResult, UserProfile},
};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_READINESS_POLLS: u32 = 60;

const UPLOAD_DONE: u8 = 30;
const READY_DONE: u8 = 60;
const COMPILING: u8 = 62;
const GENERATING: u8 = 70;
const FINALIZING: u8 = 95;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_READINESS_POLLS,
        }
    }
}

/// A video already on local disk.
#[derive(Debug, Clone)]
pub struct VideoInput {
    pub path: PathBuf,
    /// What the user originally asked for (path or URL), echoed in the result.
    pub source_ref: String,
}

pub struct Orchestrator {
    provider: Arc<dyn VideoProvider>,
    credentials: Arc<CredentialResolver>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn VideoProvider>, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            provider,
            credentials,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one orchestration end to end. Progress goes to `progress`; the
    /// final event is `Done` at 100 or `Failed`.
    pub async fn run(
        &self,
        input: &VideoInput,
        options: &ProcessingOptions,
        profile: Option<&UserProfile>,
        progress: &ProgressSink,
    ) -> Result<SummaryResult> {
        options.validate()?;

        let outcome = self.run_inner(input, options, profile, progress).await;
        match &outcome {
            Ok(_) => progress.emit(100, Phase::Done, "Complete"),
            Err(e) => progress.emit(0, Phase::Failed, format!("Error: {e}")),
        }
        outcome
    }

    async fn run_inner(
        &self,
        input: &VideoInput,
        options: &ProcessingOptions,
        profile: Option<&UserProfile>,
        progress: &ProgressSink,
    ) -> Result<SummaryResult> {
        let credential = self.credentials.resolve().await?;
        let asset = self.upload(&credential, input, progress).await?;

        let outcome = self
            .process_asset(&credential, &asset, input, options, profile, progress)
            .await;

        // Every exit path after a successful upload releases the asset.
        if let Err(e) = self
            .provider
            .delete_asset(credential.secret(), &asset.handle)
            .await
        {
            warn!(handle = %asset.handle, error = %e, "Failed to delete provider asset");
        }

        outcome
    }

    async fn process_asset(
        &self,
        credential: &Credential,
        asset: &UploadedAsset,
        input: &VideoInput,
        options: &ProcessingOptions,
        profile: Option<&UserProfile>,
        progress: &ProgressSink,
    ) -> Result<SummaryResult> {
        self.await_ready(credential, asset, progress).await?;

        progress.emit(COMPILING, Phase::Compiling, "Preparing instructions");
        let directive = prompt::compile(options, profile);

        progress.emit(GENERATING, Phase::Generating, "Generating summary");
        info!(handle = %asset.handle, style = %options.style, format = %options.format, "Generating summary");
        let text = match self
            .provider
            .generate(credential.secret(), asset, &directive)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                self.on_provider_error(&e).await;
                return Err(VideowiseError::GenerationFailure {
                    reason: e.to_string(),
                });
            }
        };

        progress.emit(FINALIZING, Phase::Finalizing, "Finalizing");
        let summary = match options.target_words.words() {
            Some(target) => trim_to_word_target(&text, target),
            None => text,
        };

        Ok(SummaryResult {
            summary,
            transcript: None,
            frame_captions: Vec::new(),
            asset_url: None,
            format_tag: options.format,
            source_ref: Some(input.source_ref.clone()),
        })
    }

    async fn upload(
        &self,
        credential: &Credential,
        input: &VideoInput,
        progress: &ProgressSink,
    ) -> Result<UploadedAsset> {
        let bytes = Bytes::from(fs::read(&input.path).await?);
        let total = bytes.len() as u64;
        let display_name = input
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let mime_type = mime_for(&display_name).to_string();

        info!(file = %display_name, bytes = total, "Uploading video to provider");
        progress.emit(0, Phase::Uploading, "Uploading video");

        let upload_progress = progress.span(0, UPLOAD_DONE);
        let on_sent: SentCallback = Arc::new(move |sent| {
            if total > 0 {
                let percent = (sent.min(total) * 100 / total) as u8;
                upload_progress.emit(percent, Phase::Uploading, "Uploading video");
            }
        });

        let receipt = match self
            .provider
            .upload(
                credential.secret(),
                UploadRequest {
                    display_name,
                    mime_type,
                    bytes,
                },
                Some(on_sent),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.on_provider_error(&e).await;
                return Err(VideowiseError::UploadFailure {
                    reason: e.to_string(),
                });
            }
        };

        let (Some(handle), Some(uri)) = (receipt.handle, receipt.uri) else {
            return Err(VideowiseError::UploadFailure {
                reason: "provider response carried no asset handle".to_string(),
            });
        };

        progress.emit(UPLOAD_DONE, Phase::Uploading, "Upload complete");
        Ok(UploadedAsset {
            handle,
            uri,
            mime_type: receipt.mime_type,
            state: receipt.state,
        })
    }

    async fn await_ready(
        &self,
        credential: &Credential,
        asset: &UploadedAsset,
        progress: &ProgressSink,
    ) -> Result<()> {
        match asset.state {
            AssetState::Ready => {
                progress.emit(READY_DONE, Phase::AwaitingReady, "Video ready");
                return Ok(());
            }
            AssetState::Failed => {
                return Err(VideowiseError::ReadinessFailed {
                    handle: asset.handle.clone(),
                    reason: "provider rejected the upload".to_string(),
                });
            }
            AssetState::Pending => {}
        }

        let waiting = progress.span(UPLOAD_DONE, READY_DONE);
        let max_polls = self.config.max_polls.max(1);

        for attempt in 1..=max_polls {
            tokio::time::sleep(self.config.poll_interval).await;

            let state = match self
                .provider
                .asset_state(credential.secret(), &asset.handle)
                .await
            {
                Ok(state) => state,
                Err(e) => {
                    self.on_provider_error(&e).await;
                    return Err(VideowiseError::ReadinessFailed {
                        handle: asset.handle.clone(),
                        reason: e.to_string(),
                    });
                }
            };
            debug!(handle = %asset.handle, attempt, ?state, "Polled asset state");

            match state {
                AssetState::Ready => {
                    progress.emit(READY_DONE, Phase::AwaitingReady, "Video ready");
                    return Ok(());
                }
                AssetState::Failed => {
                    return Err(VideowiseError::ReadinessFailed {
                        handle: asset.handle.clone(),
                        reason: "provider could not process the video".to_string(),
                    });
                }
                AssetState::Pending => {
                    let percent = (attempt * 100 / max_polls) as u8;
                    waiting.emit(
                        percent,
                        Phase::AwaitingReady,
                        format!("Waiting for provider ({attempt}/{max_polls})"),
                    );
                }
            }
        }

        Err(VideowiseError::ReadinessTimeout {
            handle: asset.handle.clone(),
            attempts: max_polls,
        })
    }

    async fn on_provider_error(&self, error: &ProviderError) {
        if error.is_auth() {
            self.credentials.invalidate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        options::{SummaryFormat, WordTarget},
        progress::Progress,
        provider::UploadReceipt,
        storage::LocalStorage,
    };

    #[derive(Clone, Copy)]
    enum Script {
        Happy,
        NoHandle,
        NeverReady,
        IngestFails,
        GenerateUnauthorized,
    }

    struct FakeProvider {
        script: Script,
        text: String,
        polls: AtomicU32,
        deleted: Mutex<Vec<String>>,
        directives: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(script: Script, text: &str) -> Arc<Self> {
            Arc::new(Self {
                script,
                text: text.to_string(),
                polls: AtomicU32::new(0),
                deleted: Mutex::new(Vec::new()),
                directives: Mutex::new(Vec::new()),
            })
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VideoProvider for FakeProvider {
        async fn probe(&self, _api_key: &str) -> std::result::Result<(), ProviderError> {
            Ok(())
        }

        async fn upload(
            &self,
            _api_key: &str,
            request: UploadRequest,
            on_sent: Option<SentCallback>,
        ) -> std::result::Result<UploadReceipt, ProviderError> {
            if let Some(on_sent) = on_sent {
                let total = request.bytes.len() as u64;
                on_sent(total / 2);
                on_sent(total);
            }
            let handle = match self.script {
                Script::NoHandle => None,
                _ => Some("files/fake".to_string()),
            };
            Ok(UploadReceipt {
                handle,
                uri: Some("https://provider.test/files/fake".to_string()),
                mime_type: request.mime_type,
                state: AssetState::Pending,
            })
        }

        async fn asset_state(
            &self,
            _api_key: &str,
            _handle: &str,
        ) -> std::result::Result<AssetState, ProviderError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(match self.script {
                Script::NeverReady => AssetState::Pending,
                Script::IngestFails => AssetState::Failed,
                _ if n < 3 => AssetState::Pending,
                _ => AssetState::Ready,
            })
        }

        async fn generate(
            &self,
            _api_key: &str,
            _asset: &UploadedAsset,
            directive: &str,
        ) -> std::result::Result<String, ProviderError> {
            self.directives.lock().unwrap().push(directive.to_string());
            match self.script {
                Script::GenerateUnauthorized => Err(ProviderError::Unauthorized { status: 403 }),
                _ => Ok(self.text.clone()),
            }
        }

        async fn delete_asset(
            &self,
            _api_key: &str,
            handle: &str,
        ) -> std::result::Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        input: VideoInput,
        storage: LocalStorage,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, vec![7u8; 4096]).await.unwrap();
        Fixture {
            input: VideoInput {
                path,
                source_ref: "clip.mp4".to_string(),
            },
            storage: LocalStorage::new(dir.path().join("data")),
            _dir: dir,
        }
    }

    fn orchestrator(provider: Arc<FakeProvider>, storage: LocalStorage) -> (Orchestrator, Arc<CredentialResolver>) {
        let credentials = Arc::new(CredentialResolver::new(
            provider.clone(),
            storage,
            vec!["key".to_string()],
        ));
        let orchestrator = Orchestrator::new(provider, credentials.clone()).with_config(OrchestratorConfig {
            poll_interval: Duration::from_millis(1),
            max_polls: MAX_READINESS_POLLS,
        });
        (orchestrator, credentials)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Progress>) -> Vec<Progress> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn happy_path_reports_ordered_progress_and_cleans_up() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::Happy, "A short summary.");
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());
        let (sink, mut rx) = ProgressSink::channel();

        let options = ProcessingOptions {
            format: SummaryFormat::Bullet,
            ..Default::default()
        };
        let result = orchestrator.run(&fx.input, &options, None, &sink).await.unwrap();

        assert_eq!(result.summary, "A short summary.");
        assert_eq!(result.format_tag, SummaryFormat::Bullet);
        assert_eq!(result.source_ref.as_deref(), Some("clip.mp4"));
        assert_eq!(provider.deleted(), vec!["files/fake".to_string()]);

        let events = drain(&mut rx);
        let percents: Vec<u8> = events.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert!(percents.contains(&30));
        assert!(percents.contains(&62));
        assert!(percents.contains(&70));
        assert!(percents.contains(&95));
        let last = events.last().unwrap();
        assert_eq!((last.percent, last.phase), (100, Phase::Done));
    }

    #[tokio::test]
    async fn invalid_options_fail_before_any_network_call() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::Happy, "x");
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());
        let options = ProcessingOptions {
            frame_count: 4,
            ..Default::default()
        };

        let err = orchestrator
            .run(&fx.input, &options, None, &ProgressSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, VideowiseError::Validation(_)));
        assert_eq!(provider.polls.load(Ordering::SeqCst), 0);
        assert!(provider.directives.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_handle_is_an_upload_failure() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::NoHandle, "x");
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());

        let err = orchestrator
            .run(&fx.input, &ProcessingOptions::default(), None, &ProgressSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, VideowiseError::UploadFailure { .. }));
        assert!(provider.deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_times_out_after_sixty_polls() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::NeverReady, "x");
        let credentials = Arc::new(CredentialResolver::new(
            provider.clone(),
            fx.storage.clone(),
            vec!["key".to_string()],
        ));
        let orchestrator = Orchestrator::new(provider.clone(), credentials);
        let started = tokio::time::Instant::now();

        let err = orchestrator
            .run(&fx.input, &ProcessingOptions::default(), None, &ProgressSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VideowiseError::ReadinessTimeout { attempts: 60, .. }
        ));
        assert_eq!(provider.polls.load(Ordering::SeqCst), 60);
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(provider.deleted(), vec!["files/fake".to_string()]);
    }

    #[tokio::test]
    async fn provider_side_ingest_failure_is_reported() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::IngestFails, "x");
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());
        let (sink, mut rx) = ProgressSink::channel();

        let err = orchestrator
            .run(&fx.input, &ProcessingOptions::default(), None, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, VideowiseError::ReadinessFailed { .. }));
        assert_eq!(provider.deleted().len(), 1);
        assert_eq!(drain(&mut rx).last().unwrap().phase, Phase::Failed);
    }

    #[tokio::test]
    async fn overlong_output_is_trimmed_to_target() {
        let fx = fixture().await;
        let text = (0..30)
            .map(|i| format!("Sentence number {i} has exactly seven words here."))
            .collect::<Vec<_>>()
            .join(" ");
        let provider = FakeProvider::new(Script::Happy, &text);
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());
        let options = ProcessingOptions {
            target_words: WordTarget::Words(100),
            ..Default::default()
        };

        let result = orchestrator
            .run(&fx.input, &options, None, &ProgressSink::discard())
            .await
            .unwrap();

        let words = crate::format::word_count(&result.summary);
        assert!((70..=100).contains(&words), "{words}");
        assert!(result.summary.ends_with('.'));
        assert!(provider.directives.lock().unwrap()[0].contains("approximately 100 words"));
    }

    #[tokio::test]
    async fn auth_failure_during_generation_purges_credential() {
        let fx = fixture().await;
        let provider = FakeProvider::new(Script::GenerateUnauthorized, "x");
        let (orchestrator, _) = orchestrator(provider.clone(), fx.storage.clone());

        let err = orchestrator
            .run(&fx.input, &ProcessingOptions::default(), None, &ProgressSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, VideowiseError::GenerationFailure { .. }));
        assert_eq!(provider.deleted().len(), 1);
        assert!(
            fx.storage
                .read(crate::storage::Namespace::Credentials, "provider-key")
                .await
                .unwrap()
                .is_none()
        );
    }
}
