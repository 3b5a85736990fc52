//! Ordered fallback over interchangeable strategies.
//!
//! Credential candidates and download methods are both "try one after the
//! other until something works" problems. Each candidate implements
//! [`Attempt`]; [`run_chain`] walks them in order, stops at the first success
//! and otherwise hands back every failure so the caller can build one
//! aggregate error. Failures keep their own error type, so a caller can still
//! tell them apart after the chain is exhausted.

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Attempt<I: ?Sized + Sync, O: Send, E: Send = String>: Send + Sync {
    /// Short label used in logs and aggregate errors. Must not contain secrets.
    fn label(&self) -> String;

    async fn attempt(&self, input: &I) -> Result<O, E>;
}

/// One failed link of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure<E = String> {
    /// 1-based position of the strategy in the chain.
    pub rank: usize,
    pub method: String,
    pub reason: E,
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.rank, self.method, self.reason)
    }
}

/// Winning strategy and its output.
#[derive(Debug)]
pub struct ChainSuccess<O, E = String> {
    pub rank: usize,
    pub output: O,
    pub failures: Vec<AttemptFailure<E>>,
}

pub async fn run_chain<I, O, E>(
    strategies: &[Box<dyn Attempt<I, O, E>>],
    input: &I,
) -> Result<ChainSuccess<O, E>, Vec<AttemptFailure<E>>>
where
    I: ?Sized + Sync,
    O: Send,
    E: Send + fmt::Display,
{
    let mut failures = Vec::new();

    for (index, strategy) in strategies.iter().enumerate() {
        let rank = index + 1;
        match strategy.attempt(input).await {
            Ok(output) => {
                debug!(rank, method = %strategy.label(), "chain strategy succeeded");
                return Ok(ChainSuccess {
                    rank,
                    output,
                    failures,
                });
            }
            Err(reason) => {
                debug!(rank, method = %strategy.label(), %reason, "chain strategy failed");
                failures.push(AttemptFailure {
                    rank,
                    method: strategy.label(),
                    reason,
                });
            }
        }
    }

    Err(failures)
}

pub fn describe_failures<E: fmt::Display>(failures: &[AttemptFailure<E>]) -> String {
    if failures.is_empty() {
        return "no method was available".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
