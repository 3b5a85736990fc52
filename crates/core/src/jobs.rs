//! Job records from both stores and the single display shape they project to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::Result,
    options::ProcessingOptions,
    storage::{LocalStorage, Namespace},
    types::SummaryResult,
};

pub const LOCAL_JOB_PREFIX: &str = "local-";

/// Identity that owns a job. `anonymous` is an ordinary id, not a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Backend-owned job. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub progress: u8,
    pub step: String,
    pub created_at: Option<DateTime<Utc>>,
    pub style: Option<String>,
    pub result: Option<SummaryResult>,
}

/// Client-owned job, written once when the local pipeline finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalJob {
    pub id: String,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub progress: u8,
    pub step: String,
    pub created_at: DateTime<Utc>,
    pub source_ref: String,
    pub options: ProcessingOptions,
    pub result: Option<SummaryResult>,
    pub error: Option<String>,
}

impl LocalJob {
    pub fn new_id() -> String {
        format!("{}{}", LOCAL_JOB_PREFIX, Uuid::new_v4())
    }

    pub fn succeeded(
        owner_id: OwnerId,
        source_ref: impl Into<String>,
        options: ProcessingOptions,
        result: SummaryResult,
    ) -> Self {
        Self {
            id: Self::new_id(),
            owner_id,
            status: JobStatus::Done,
            progress: 100,
            step: "Complete".to_string(),
            created_at: Utc::now(),
            source_ref: source_ref.into(),
            options,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(
        owner_id: OwnerId,
        source_ref: impl Into<String>,
        options: ProcessingOptions,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            id: Self::new_id(),
            owner_id,
            status: JobStatus::Failed,
            progress: 0,
            step: format!("Error: {error}"),
            created_at: Utc::now(),
            source_ref: source_ref.into(),
            options,
            result: None,
            error: Some(error),
        }
    }
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_JOB_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrigin {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Remote(RemoteJob),
    Local(LocalJob),
}

/// Common display shape for both job kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: String,
    pub origin: JobOrigin,
    pub status: JobStatus,
    pub progress: u8,
    pub step: String,
    pub created_at: Option<DateTime<Utc>>,
    pub style: Option<String>,
    pub result: Option<SummaryResult>,
}

impl Job {
    pub fn id(&self) -> &str {
        match self {
            Job::Remote(job) => &job.id,
            Job::Local(job) => &job.id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Job::Remote(job) => job.status,
            Job::Local(job) => job.status,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Job::Remote(job) => job.created_at,
            Job::Local(job) => Some(job.created_at),
        }
    }

    pub fn view(&self) -> JobView {
        match self {
            Job::Remote(job) => JobView {
                id: job.id.clone(),
                origin: JobOrigin::Remote,
                status: job.status,
                progress: job.progress,
                step: job.step.clone(),
                created_at: job.created_at,
                style: job.style.clone(),
                result: job.result.clone(),
            },
            Job::Local(job) => JobView {
                id: job.id.clone(),
                origin: JobOrigin::Local,
                status: job.status,
                progress: job.progress,
                step: job.step.clone(),
                created_at: Some(job.created_at),
                style: Some(job.options.style.to_string()),
                result: job.result.clone(),
            },
        }
    }
}

/// Local job records under the `jobs` storage namespace.
#[derive(Debug, Clone)]
pub struct LocalJobStore {
    storage: LocalStorage,
}

impl LocalJobStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub async fn insert(&self, job: &LocalJob) -> Result<()> {
        self.storage.write_json(Namespace::Jobs, &job.id, job).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<LocalJob>> {
        self.storage.read_json(Namespace::Jobs, id).await
    }

    /// Every parseable record in the namespace, regardless of owner.
    pub async fn scan(&self) -> Result<Vec<LocalJob>> {
        let mut jobs = Vec::new();
        for key in self.storage.keys(Namespace::Jobs).await? {
            if !is_local_id(&key) {
                continue;
            }
            match self.storage.read_json::<LocalJob>(Namespace::Jobs, &key).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable local job record"),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::options::{SummaryFormat, WordTarget};

    fn result() -> SummaryResult {
        SummaryResult {
            summary: "Done.".to_string(),
            transcript: None,
            frame_captions: Vec::new(),
            asset_url: None,
            format_tag: SummaryFormat::Bullet,
            source_ref: Some("clip.mp4".to_string()),
        }
    }

    #[tokio::test]
    async fn local_job_round_trips_through_storage() {
        let dir = TempDir::new().unwrap();
        let store = LocalJobStore::new(LocalStorage::new(dir.path()));
        let options = ProcessingOptions {
            target_words: WordTarget::Words(100),
            ..Default::default()
        };
        let job = LocalJob::succeeded(OwnerId::new("u1"), "clip.mp4", options, result());

        store.insert(&job).await.unwrap();
        let loaded = store.get(&job.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, job.status);
        assert_eq!(loaded.progress, job.progress);
        assert_eq!(loaded.result, job.result);
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn scan_skips_corrupt_and_foreign_records() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let store = LocalJobStore::new(storage.clone());

        let job = LocalJob::failed(
            OwnerId::anonymous(),
            "x.mp4",
            ProcessingOptions::default(),
            "upload refused",
        );
        store.insert(&job).await.unwrap();
        storage
            .write(Namespace::Jobs, "local-broken", "{not json")
            .await
            .unwrap();
        storage.write(Namespace::Jobs, "other", "{}").await.unwrap();

        let jobs = store.scan().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
        assert_eq!(jobs[0].error.as_deref(), Some("upload refused"));
    }

    #[test]
    fn local_ids_carry_prefix() {
        let id = LocalJob::new_id();
        assert!(is_local_id(&id));
        assert!(!is_local_id("9b2f0c1e-remote"));
    }

    #[test]
    fn views_are_tagged_by_origin() {
        let local = Job::Local(LocalJob::succeeded(
            OwnerId::new("u1"),
            "clip.mp4",
            ProcessingOptions::default(),
            result(),
        ));
        let view = local.view();
        assert_eq!(view.origin, JobOrigin::Local);
        assert_eq!(view.status, JobStatus::Done);
        assert_eq!(view.style.as_deref(), Some("default"));
    }
}
