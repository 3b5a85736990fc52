use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::fs;
use url::Url;

use crate::{
    backend::DEFAULT_BACKEND_URL,
    error::{Result, VideowiseError},
    jobs::OwnerId,
    provider::{DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_UPLOAD_TIMEOUT},
    session::ModePolicy,
    source::DEFAULT_FETCH_TIMEOUT,
    storage::default_data_dir,
    types::UserProfile,
};

/// Runtime settings, read from the environment.
#[derive(Clone)]
pub struct Config {
    pub backend_url: Url,
    pub backend_token: Option<String>,
    pub provider_url: String,
    pub model: String,
    /// Fallback provider keys, tried in order after any explicit key.
    pub api_keys: Vec<String>,
    pub data_dir: PathBuf,
    pub mode: ModePolicy,
    pub owner: OwnerId,
    pub profile_path: Option<PathBuf>,
    pub fetch_timeout: Duration,
    /// Bounds sending a video to the provider or the backend.
    pub upload_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("backend_url", &self.backend_url.as_str())
            .field("backend_token", &self.backend_token.as_ref().map(|_| "<redacted>"))
            .field("provider_url", &self.provider_url)
            .field("model", &self.model)
            .field("api_keys", &format!("<{} redacted>", self.api_keys.len()))
            .field("data_dir", &self.data_dir)
            .field("mode", &self.mode)
            .field("owner", &self.owner)
            .field("profile_path", &self.profile_path)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend_raw = get("VIDEOWISE_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let backend_url = Url::parse(&backend_raw).map_err(|e| {
            VideowiseError::Config(format!("VIDEOWISE_BACKEND_URL {backend_raw:?} is not a URL: {e}"))
        })?;

        let mut api_keys: Vec<String> = get("GEMINI_API_KEY").into_iter().collect();
        if let Some(list) = get("VIDEOWISE_API_KEYS") {
            api_keys.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            );
        }

        let mode = match get("VIDEOWISE_MODE") {
            Some(raw) => raw
                .parse::<ModePolicy>()
                .map_err(|e| VideowiseError::Config(format!("VIDEOWISE_MODE: {e}")))?,
            None => ModePolicy::default(),
        };

        let seconds = |name: &str, default: Duration| -> Result<Duration> {
            match get(name) {
                Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    VideowiseError::Config(format!("{name} {raw:?} is not a number of seconds"))
                }),
                None => Ok(default),
            }
        };
        let fetch_timeout = seconds("VIDEOWISE_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT)?;
        let upload_timeout = seconds("VIDEOWISE_UPLOAD_TIMEOUT_SECS", DEFAULT_UPLOAD_TIMEOUT)?;

        Ok(Self {
            backend_url,
            backend_token: get("VIDEOWISE_BACKEND_TOKEN"),
            provider_url: get("VIDEOWISE_PROVIDER_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: get("VIDEOWISE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_keys,
            data_dir: get("VIDEOWISE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            mode,
            owner: get("VIDEOWISE_OWNER")
                .map(OwnerId::new)
                .unwrap_or_else(OwnerId::anonymous),
            profile_path: get("VIDEOWISE_PROFILE").map(PathBuf::from),
            fetch_timeout,
            upload_timeout,
        })
    }

    pub async fn load_profile(&self) -> Result<Option<UserProfile>> {
        match &self.profile_path {
            Some(path) => read_profile(path).await.map(Some),
            None => Ok(None),
        }
    }
}

async fn read_profile(path: &Path) -> Result<UserProfile> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        VideowiseError::Config(format!("cannot read profile {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| VideowiseError::Config(format!("invalid profile {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://localhost:5000/");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.mode, ModePolicy::Auto);
        assert_eq!(config.owner, OwnerId::anonymous());
        assert!(config.api_keys.is_empty());
        assert_eq!(config.fetch_timeout, Duration::from_secs(300));
        assert_eq!(config.upload_timeout, DEFAULT_UPLOAD_TIMEOUT);
    }

    #[test]
    fn reads_timeouts_in_seconds() {
        let config = config(&[
            ("VIDEOWISE_FETCH_TIMEOUT_SECS", "30"),
            ("VIDEOWISE_UPLOAD_TIMEOUT_SECS", "120"),
        ])
        .unwrap();
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.upload_timeout, Duration::from_secs(120));

        assert!(matches!(
            self::config(&[("VIDEOWISE_UPLOAD_TIMEOUT_SECS", "soon")]),
            Err(VideowiseError::Config(_))
        ));
    }

    #[test]
    fn keys_are_ordered_and_blanks_dropped() {
        let config = config(&[
            ("GEMINI_API_KEY", "primary"),
            ("VIDEOWISE_API_KEYS", "a, ,b,"),
        ])
        .unwrap();
        assert_eq!(config.api_keys, vec!["primary", "a", "b"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("VIDEOWISE_MODE", "sometimes")]),
            Err(VideowiseError::Config(_))
        ));
        assert!(matches!(
            config(&[("VIDEOWISE_BACKEND_URL", "not a url")]),
            Err(VideowiseError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = config(&[
            ("GEMINI_API_KEY", "sk-secret"),
            ("VIDEOWISE_BACKEND_TOKEN", "jwt-secret"),
        ])
        .unwrap();
        let shown = format!("{config:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("jwt-secret"));
    }

    #[tokio::test]
    async fn loads_profile_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(
            &path,
            r#"{"id": "u1", "expertise": ["ml"], "summaryPreferences": {"length": "short", "focus": ["results"], "tone": "casual"}}"#,
        )
        .await
        .unwrap();

        let config = config(&[("VIDEOWISE_PROFILE", path.to_str().unwrap())]).unwrap();
        let profile = config.load_profile().await.unwrap().unwrap();
        assert_eq!(profile.expertise, vec!["ml"]);
        assert_eq!(profile.summary_preferences.tone, "casual");
    }
}
