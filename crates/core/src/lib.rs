pub mod backend;
pub mod chain;
pub mod config;
pub mod credentials;
pub mod error;
pub mod format;
pub mod jobs;
pub mod options;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod reconcile;
pub mod session;
pub mod source;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Result, VideowiseError};
pub use format::{format_eta, format_job_row, format_summary_readable, trim_to_word_target};
pub use jobs::{Job, JobOrigin, JobStatus, JobView, OwnerId};
pub use options::{ProcessingOptions, SummaryFormat, SummaryStyle, WordTarget};
pub use progress::{Phase, Progress, ProgressSink};
pub use session::{ExecutionMode, ModePolicy, Session, Submission};
pub use types::{FrameCaption, SummaryResult, UserProfile};
