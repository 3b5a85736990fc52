//! Client-local persistent storage.
//!
//! A directory per namespace, a JSON file per key. Writes replace the whole
//! value (temp file + rename), so each key has last-writer-wins semantics.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, VideowiseError};

/// Default root for everything videowise keeps on disk.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("videowise")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Single sensitive entry: the last provider key that passed a probe.
    Credentials,
    /// One record per local job.
    Jobs,
}

impl Namespace {
    fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Credentials => "credentials",
            Namespace::Jobs => "jobs",
        }
    }

    fn is_sensitive(&self) -> bool {
        matches!(self, Namespace::Credentials)
    }
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    fn path_for(&self, ns: Namespace, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(VideowiseError::Storage(format!(
                "invalid storage key {key:?}"
            )));
        }
        Ok(self.namespace_dir(ns).join(format!("{key}.json")))
    }

    pub async fn read(&self, ns: Namespace, key: &str) -> Result<Option<String>> {
        let path = self.path_for(ns, key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write(&self, ns: Namespace, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(ns, key)?;
        fs::create_dir_all(self.namespace_dir(ns)).await?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        if ns.is_sensitive() {
            restrict_permissions(&tmp).await?;
        }
        fs::rename(&tmp, &path).await?;

        debug!(namespace = ns.dir_name(), key, "stored value");
        Ok(())
    }

    pub async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        let path = self.path_for(ns, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys present in a namespace, sorted.
    pub async fn keys(&self, ns: Namespace) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(self.namespace_dir(ns)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Result<Option<T>> {
        match self.read(ns, key).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize>(&self, ns: Namespace, key: &str, value: &T) -> Result<()> {
        let pretty_json = serde_json::to_string_pretty(value)?;
        self.write(ns, key, &pretty_json).await
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
