//! One owner-scoped view over backend jobs and local jobs.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    backend::{BackendProbe, DEFAULT_LIST_LIMIT, JobBackend, RemoteStatus},
    error::{Result, VideowiseError},
    format::format_eta,
    jobs::{Job, JobStatus, LocalJobStore, OwnerId, RemoteJob, is_local_id},
    progress::{Phase, ProgressSink},
};

pub const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Fifteen minutes at the default interval.
pub const MAX_REMOTE_POLLS: u32 = 450;

#[derive(Debug, Clone)]
pub struct Listing {
    /// Newest first; jobs without a timestamp sort last.
    pub jobs: Vec<Job>,
    pub remote_reachable: bool,
    pub remote_error: Option<String>,
}

pub struct JobReconciler {
    backend: Arc<dyn JobBackend>,
    probe: Arc<BackendProbe>,
    local: LocalJobStore,
    poll_interval: Duration,
    max_polls: u32,
}

impl JobReconciler {
    pub fn new(backend: Arc<dyn JobBackend>, probe: Arc<BackendProbe>, local: LocalJobStore) -> Self {
        Self {
            backend,
            probe,
            local,
            poll_interval: REMOTE_POLL_INTERVAL,
            max_polls: MAX_REMOTE_POLLS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn local_store(&self) -> &LocalJobStore {
        &self.local
    }

    pub async fn list(&self, owner: &OwnerId) -> Result<Listing> {
        let mut jobs: Vec<Job> = self
            .local
            .scan()
            .await?
            .into_iter()
            .filter(|job| &job.owner_id == owner)
            .map(Job::Local)
            .collect();

        let mut remote_reachable = false;
        let mut remote_error = None;
        if self.probe.is_available().await {
            match self.backend.list(DEFAULT_LIST_LIMIT).await {
                Ok(entries) => {
                    remote_reachable = true;
                    jobs.extend(entries.into_iter().map(|entry| {
                        Job::Remote(RemoteJob {
                            id: entry.id,
                            owner_id: owner.clone(),
                            status: entry.status,
                            progress: entry.progress,
                            step: entry.step,
                            created_at: entry.created_at,
                            style: entry.summary_style,
                            result: None,
                        })
                    }));
                }
                Err(e) => {
                    if e.is_network() {
                        self.probe.demote().await;
                    }
                    warn!(error = %e, "Listing backend jobs failed, showing local jobs only");
                    remote_error = Some(e.to_string());
                }
            }
        }

        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        debug!(count = jobs.len(), remote_reachable, "Reconciled job listing");
        Ok(Listing {
            jobs,
            remote_reachable,
            remote_error,
        })
    }

    pub async fn detail(&self, owner: &OwnerId, id: &str) -> Result<Job> {
        if is_local_id(id) {
            let job = self
                .local
                .get(id)
                .await?
                .ok_or_else(|| VideowiseError::NotFound {
                    job_id: id.to_string(),
                })?;
            if &job.owner_id != owner {
                return Err(VideowiseError::AccessDenied {
                    job_id: id.to_string(),
                });
            }
            return Ok(Job::Local(job));
        }

        let status = self.remote_call(self.backend.status(id)).await?;
        self.remote_job(owner, status).await
    }

    /// Poll a backend job until it finishes or the budget runs out. A job
    /// still running after the last poll is returned as-is.
    pub async fn await_remote(
        &self,
        owner: &OwnerId,
        id: &str,
        progress: &ProgressSink,
    ) -> Result<Job> {
        let mut latest = None;
        for attempt in 1..=self.max_polls {
            let status = self.remote_call(self.backend.status(id)).await?;
            progress.emit(status.progress, Phase::RemoteProcessing, remote_step(&status));
            debug!(job_id = id, attempt, status = status.status.as_str(), "Polled backend job");

            if status.status.is_terminal() {
                info!(job_id = id, status = status.status.as_str(), "Backend job finished");
                return self.remote_job(owner, status).await;
            }
            latest = Some(status);

            if attempt < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(job_id = id, polls = self.max_polls, "Stopped waiting for backend job");
        match latest {
            Some(status) => self.remote_job(owner, status).await,
            None => Err(VideowiseError::NotFound {
                job_id: id.to_string(),
            }),
        }
    }

    async fn remote_job(&self, owner: &OwnerId, status: RemoteStatus) -> Result<Job> {
        let result = if status.status == JobStatus::Done {
            Some(self.remote_call(self.backend.result(&status.job_id)).await?)
        } else {
            None
        };

        Ok(Job::Remote(RemoteJob {
            id: status.job_id,
            owner_id: owner.clone(),
            status: status.status,
            progress: status.progress,
            step: status.step,
            created_at: None,
            style: None,
            result,
        }))
    }

    async fn remote_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let outcome = call.await;
        if let Err(e) = &outcome {
            if e.is_network() {
                self.probe.demote().await;
            }
        }
        outcome
    }
}

fn remote_step(status: &RemoteStatus) -> String {
    match status.eta_seconds {
        Some(eta) if !status.status.is_terminal() => {
            format!("{} (about {} left)", status.step, format_eta(eta))
        }
        _ => status.step.clone(),
    }
}
