//! Provider credential resolution.
//!
//! Candidates come from three places, in order: the key the user typed for
//! this session, the key cached from an earlier successful probe, and the
//! configured fallback list. Each is probed with a cheap provider call and the
//! first that passes wins. Only a probed key is ever persisted.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    chain::{Attempt, run_chain},
    error::{Result, VideowiseError},
    provider::{ProviderError, VideoProvider},
    storage::{LocalStorage, Namespace},
};

const CACHE_KEY: &str = "provider-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    Explicit,
    Cached,
    Configured,
}

impl CredentialOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialOrigin::Explicit => "explicit",
            CredentialOrigin::Cached => "cached",
            CredentialOrigin::Configured => "configured",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    pub validated: bool,
    pub origin: CredentialOrigin,
}

impl Credential {
    pub fn new(value: impl Into<String>, origin: CredentialOrigin) -> Self {
        Self {
            value: value.into(),
            validated: false,
            origin,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("validated", &self.validated)
            .field("origin", &self.origin)
            .finish()
    }
}

type CredentialAttempt = Box<dyn Attempt<Arc<dyn VideoProvider>, Credential, ProviderError>>;

#[async_trait]
impl Attempt<Arc<dyn VideoProvider>, Credential, ProviderError> for Credential {
    fn label(&self) -> String {
        format!("{} key", self.origin.as_str())
    }

    async fn attempt(
        &self,
        provider: &Arc<dyn VideoProvider>,
    ) -> std::result::Result<Credential, ProviderError> {
        provider.probe(&self.value).await?;
        Ok(Credential {
            validated: true,
            ..self.clone()
        })
    }
}

pub struct CredentialResolver {
    provider: Arc<dyn VideoProvider>,
    storage: LocalStorage,
    explicit: Option<String>,
    configured: Vec<String>,
    winner: Mutex<Option<Credential>>,
}

impl CredentialResolver {
    pub fn new(provider: Arc<dyn VideoProvider>, storage: LocalStorage, configured: Vec<String>) -> Self {
        Self {
            provider,
            storage,
            explicit: None,
            configured,
            winner: Mutex::new(None),
        }
    }

    pub fn with_explicit(mut self, key: Option<String>) -> Self {
        self.explicit = key;
        self
    }

    async fn cached_value(&self) -> Option<String> {
        match self.storage.read(Namespace::Credentials, CACHE_KEY).await {
            Ok(value) => value.map(|v| v.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "Could not read cached provider key");
                None
            }
        }
    }

    async fn candidates(&self) -> Vec<Credential> {
        let cached = self.cached_value().await;
        let ordered = self
            .explicit
            .iter()
            .map(|v| (v.clone(), CredentialOrigin::Explicit))
            .chain(cached.map(|v| (v, CredentialOrigin::Cached)))
            .chain(
                self.configured
                    .iter()
                    .map(|v| (v.clone(), CredentialOrigin::Configured)),
            );

        let mut out: Vec<Credential> = Vec::new();
        for (value, origin) in ordered {
            let value = value.trim();
            if value.is_empty() || out.iter().any(|c| c.value == value) {
                continue;
            }
            out.push(Credential::new(value, origin));
        }
        out
    }

    /// The working credential for this session, probing candidates if needed.
    pub async fn resolve(&self) -> Result<Credential> {
        let mut winner = self.winner.lock().await;
        if let Some(credential) = winner.as_ref() {
            return Ok(credential.clone());
        }

        let candidates = self.candidates().await;
        let tried = candidates.len();
        let origins: Vec<CredentialOrigin> = candidates.iter().map(|c| c.origin).collect();
        let strategies: Vec<CredentialAttempt> = candidates
            .into_iter()
            .map(|c| Box::new(c) as CredentialAttempt)
            .collect();

        match run_chain(&strategies, &self.provider).await {
            Ok(success) => {
                let credential = success.output;
                info!(
                    origin = credential.origin.as_str(),
                    rank = success.rank,
                    "Provider key validated"
                );
                self.storage
                    .write(Namespace::Credentials, CACHE_KEY, credential.secret())
                    .await?;
                *winner = Some(credential.clone());
                Ok(credential)
            }
            Err(failures) => {
                // Only a rejection of the cached key itself makes it stale; an
                // offline provider says nothing about the key.
                let cached_rejected = failures.iter().any(|f| {
                    origins.get(f.rank - 1) == Some(&CredentialOrigin::Cached) && f.reason.is_auth()
                });
                if cached_rejected {
                    if let Err(e) = self.storage.remove(Namespace::Credentials, CACHE_KEY).await {
                        warn!(error = %e, "Could not drop stale provider key");
                    }
                } else {
                    warn!(tried, "No provider key could be verified, keeping the cached one");
                }
                Err(VideowiseError::NoWorkingCredential { tried })
            }
        }
    }

    /// Forget the winner after an auth-class failure.
    pub async fn invalidate(&self) {
        self.winner.lock().await.take();
        if let Err(e) = self.storage.remove(Namespace::Credentials, CACHE_KEY).await {
            warn!(error = %e, "Could not purge cached provider key");
        }
        info!("Provider key invalidated");
    }

    pub async fn clear(&self) -> Result<()> {
        self.winner.lock().await.take();
        self.storage.remove(Namespace::Credentials, CACHE_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tempfile::TempDir;

    use super::*;
    use crate::provider::{
        AssetState, ProviderError, SentCallback, UploadReceipt, UploadRequest, UploadedAsset,
    };

    /// Accepts exactly the listed keys and records every probe.
    struct KeyCheckingProvider {
        good: Vec<String>,
        offline: bool,
        probes: StdMutex<Vec<String>>,
    }

    impl KeyCheckingProvider {
        fn new(good: &[&str]) -> Self {
            Self {
                good: good.iter().map(|s| s.to_string()).collect(),
                offline: false,
                probes: StdMutex::new(Vec::new()),
            }
        }

        fn offline() -> Self {
            Self {
                offline: true,
                ..Self::new(&[])
            }
        }

        fn probe_count(&self) -> usize {
            self.probes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VideoProvider for KeyCheckingProvider {
        async fn probe(&self, api_key: &str) -> std::result::Result<(), ProviderError> {
            self.probes.lock().unwrap().push(api_key.to_string());
            if self.offline {
                return Err(ProviderError::InvalidResponse("connection refused".to_string()));
            }
            if self.good.iter().any(|g| g == api_key) {
                Ok(())
            } else {
                Err(ProviderError::Unauthorized { status: 400 })
            }
        }

        async fn upload(
            &self,
            _api_key: &str,
            _request: UploadRequest,
            _on_sent: Option<SentCallback>,
        ) -> std::result::Result<UploadReceipt, ProviderError> {
            unreachable!("resolver never uploads")
        }

        async fn asset_state(
            &self,
            _api_key: &str,
            _handle: &str,
        ) -> std::result::Result<AssetState, ProviderError> {
            unreachable!("resolver never polls")
        }

        async fn generate(
            &self,
            _api_key: &str,
            _asset: &UploadedAsset,
            _directive: &str,
        ) -> std::result::Result<String, ProviderError> {
            unreachable!("resolver never generates")
        }

        async fn delete_asset(
            &self,
            _api_key: &str,
            _handle: &str,
        ) -> std::result::Result<(), ProviderError> {
            Ok(())
        }
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn first_passing_candidate_wins_and_is_cached() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let provider = Arc::new(KeyCheckingProvider::new(&["k3"]));
        let resolver = CredentialResolver::new(provider.clone(), storage.clone(), keys(&["k2", "k3"]))
            .with_explicit(Some("k1".to_string()));

        let credential = resolver.resolve().await.unwrap();
        assert_eq!(credential.secret(), "k3");
        assert!(credential.validated);
        assert_eq!(credential.origin, CredentialOrigin::Configured);
        assert_eq!(*provider.probes.lock().unwrap(), keys(&["k1", "k2", "k3"]));
        assert_eq!(
            storage.read(Namespace::Credentials, CACHE_KEY).await.unwrap().as_deref(),
            Some("k3")
        );

        let again = resolver.resolve().await.unwrap();
        assert_eq!(again.secret(), "k3");
        assert_eq!(provider.probe_count(), 3);
    }

    #[tokio::test]
    async fn cached_key_is_tried_after_explicit_one() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write(Namespace::Credentials, CACHE_KEY, "cached")
            .await
            .unwrap();
        let provider = Arc::new(KeyCheckingProvider::new(&["cached"]));
        let resolver = CredentialResolver::new(provider.clone(), storage, keys(&["cached", " ", ""]))
            .with_explicit(Some("typed".to_string()));

        let credential = resolver.resolve().await.unwrap();

        assert_eq!(credential.origin, CredentialOrigin::Cached);
        // Duplicates and blanks are never probed.
        assert_eq!(*provider.probes.lock().unwrap(), keys(&["typed", "cached"]));
    }

    #[tokio::test]
    async fn no_working_key_reports_only_a_count() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write(Namespace::Credentials, CACHE_KEY, "stale")
            .await
            .unwrap();
        let provider = Arc::new(KeyCheckingProvider::new(&[]));
        let resolver = CredentialResolver::new(provider, storage.clone(), keys(&["a", "b"]));

        let err = resolver.resolve().await.unwrap_err();

        assert!(matches!(err, VideowiseError::NoWorkingCredential { tried: 3 }));
        assert!(!err.to_string().contains("stale"));
        assert!(
            storage
                .read(Namespace::Credentials, CACHE_KEY)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn offline_provider_keeps_the_cached_key() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write(Namespace::Credentials, CACHE_KEY, "known-good")
            .await
            .unwrap();
        let resolver = CredentialResolver::new(
            Arc::new(KeyCheckingProvider::offline()),
            storage.clone(),
            Vec::new(),
        );

        let err = resolver.resolve().await.unwrap_err();

        assert!(matches!(err, VideowiseError::NoWorkingCredential { tried: 1 }));
        assert_eq!(
            storage.read(Namespace::Credentials, CACHE_KEY).await.unwrap().as_deref(),
            Some("known-good")
        );
    }

    #[tokio::test]
    async fn rejecting_another_key_does_not_purge_the_cache() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write(Namespace::Credentials, CACHE_KEY, "cached")
            .await
            .unwrap();
        // Configured key is rejected; the cached one only hits an outage.
        struct Mixed;

        #[async_trait]
        impl VideoProvider for Mixed {
            async fn probe(&self, api_key: &str) -> std::result::Result<(), ProviderError> {
                match api_key {
                    "cached" => Err(ProviderError::Status {
                        status: 503,
                        message: "overloaded".to_string(),
                    }),
                    _ => Err(ProviderError::Unauthorized { status: 401 }),
                }
            }

            async fn upload(
                &self,
                _: &str,
                _: UploadRequest,
                _: Option<SentCallback>,
            ) -> std::result::Result<UploadReceipt, ProviderError> {
                unreachable!()
            }

            async fn asset_state(&self, _: &str, _: &str) -> std::result::Result<AssetState, ProviderError> {
                unreachable!()
            }

            async fn generate(
                &self,
                _: &str,
                _: &UploadedAsset,
                _: &str,
            ) -> std::result::Result<String, ProviderError> {
                unreachable!()
            }

            async fn delete_asset(&self, _: &str, _: &str) -> std::result::Result<(), ProviderError> {
                Ok(())
            }
        }

        let resolver = CredentialResolver::new(Arc::new(Mixed), storage.clone(), keys(&["configured"]));

        assert!(resolver.resolve().await.is_err());
        assert_eq!(
            storage.read(Namespace::Credentials, CACHE_KEY).await.unwrap().as_deref(),
            Some("cached")
        );
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_probe() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let provider = Arc::new(KeyCheckingProvider::new(&["k"]));
        let resolver = CredentialResolver::new(provider.clone(), storage.clone(), keys(&["k"]));

        resolver.resolve().await.unwrap();
        resolver.invalidate().await;
        assert!(
            storage
                .read(Namespace::Credentials, CACHE_KEY)
                .await
                .unwrap()
                .is_none()
        );

        resolver.resolve().await.unwrap();
        assert_eq!(provider.probe_count(), 2);
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let credential = Credential::new("sk-very-secret", CredentialOrigin::Explicit);
        let shown = format!("{credential:?}");
        assert!(!shown.contains("sk-very-secret"));
        assert!(shown.contains("redacted"));
    }
}
