use thiserror::Error;

use crate::chain::{AttemptFailure, describe_failures};

#[derive(Error, Debug)]
pub enum VideowiseError {
    #[error("Invalid processing options: {0}")]
    Validation(String),

    #[error("No working provider credential ({tried} candidate(s) tried)")]
    NoWorkingCredential { tried: usize },

    #[error("Upload to provider failed: {reason}")]
    UploadFailure { reason: String },

    #[error("Provider asset {handle} was not ready after {attempts} status checks")]
    ReadinessTimeout { handle: String, attempts: u32 },

    #[error("Provider could not ingest asset {handle}: {reason}")]
    ReadinessFailed { handle: String, reason: String },

    #[error("Summary generation failed: {reason}")]
    GenerationFailure { reason: String },

    #[error("Could not download {url}: {}", describe_failures(.attempts))]
    DownloadChainExhausted {
        url: String,
        attempts: Vec<AttemptFailure>,
    },

    #[error(
        "{url} is a {site} link and cannot be fetched directly. Start the VideoWise backend to process it, or download the video and upload the local file instead"
    )]
    ExternalReferenceNeedsBackend { url: String, site: String },

    #[error("Backend unreachable: {reason}")]
    NetworkUnreachable { reason: String },

    #[error("Access denied to job {job_id}")]
    AccessDenied { job_id: String },

    #[error("Job {job_id} not found")]
    NotFound { job_id: String },

    #[error("Backend request failed ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl VideowiseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::NetworkUnreachable {
            reason: reason.into(),
        }
    }

    /// Network-class failures demote a session from remote to local mode.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkUnreachable { .. })
    }
}

pub type Result<T> = std::result::Result<T, VideowiseError>;
