//! Progress events for one user action.
//!
//! A [`ProgressSink`] wraps the sending half of an unbounded channel. Sinks
//! derived with [`ProgressSink::span`] map their own 0..=100 onto a slice of
//! the parent's range and share its high-water mark, so every receiver sees
//! percentages in non-decreasing order.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Submitting,
    RemoteProcessing,
    Uploading,
    AwaitingReady,
    Compiling,
    Generating,
    Finalizing,
    Done,
    Failed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Resolving => "resolving",
            Phase::Submitting => "submitting",
            Phase::RemoteProcessing => "remote",
            Phase::Uploading => "uploading",
            Phase::AwaitingReady => "awaiting-ready",
            Phase::Compiling => "compiling",
            Phase::Generating => "generating",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub phase: Phase,
    pub step: String,
}

#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<Progress>>,
    high_water: Arc<AtomicU8>,
    lo: u8,
    hi: u8,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                high_water: Arc::new(AtomicU8::new(0)),
                lo: 0,
                hi: 100,
            },
            rx,
        )
    }

    /// A sink nobody listens to.
    pub fn discard() -> Self {
        Self {
            tx: None,
            high_water: Arc::new(AtomicU8::new(0)),
            lo: 0,
            hi: 100,
        }
    }

    /// Child sink whose 0..=100 covers `lo..=hi` of this sink's range.
    pub fn span(&self, lo: u8, hi: u8) -> Self {
        let (lo, hi) = (lo.min(100), hi.clamp(lo.min(100), 100));
        Self {
            tx: self.tx.clone(),
            high_water: Arc::clone(&self.high_water),
            lo: self.scale(lo),
            hi: self.scale(hi),
        }
    }

    fn scale(&self, percent: u8) -> u8 {
        let percent = u16::from(percent.min(100));
        let width = u16::from(self.hi - self.lo);
        (u16::from(self.lo) + percent * width / 100) as u8
    }

    pub fn emit(&self, percent: u8, phase: Phase, step: impl Into<String>) {
        let scaled = self.scale(percent);
        let previous = self.high_water.fetch_max(scaled, Ordering::SeqCst);
        let percent = scaled.max(previous);

        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(Progress {
                percent,
                phase,
                step: step.into(),
            });
        }
    }
}
