use chrono::{DateTime, Utc};

use crate::{
    jobs::{JobOrigin, JobView},
    types::SummaryResult,
};

pub const ELLIPSIS: &str = "...";

/// Byte spans of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn ends_sentence(word: &str) -> bool {
    let word = word.trim_end_matches(['"', '\'', ')', ']', '*', '\u{201d}', '\u{2019}']);
    word.ends_with(['.', '!', '?', '\u{2026}'])
}

pub fn word_count(text: &str) -> usize {
    word_spans(text).len()
}

/// Trim generated text that overshoots the requested word count.
///
/// Cuts after the last sentence terminator that falls between 70% of the
/// target and the target itself. Without one, cuts at exactly `target` words
/// and appends an ellipsis. Text within budget is returned unchanged.
pub fn trim_to_word_target(text: &str, target: u32) -> String {
    let target = target as usize;
    let spans = word_spans(text);
    if target == 0 || spans.len() <= target {
        return text.to_string();
    }

    let floor = (target * 7).div_ceil(10).max(1);
    for count in (floor..=target).rev() {
        let (start, end) = spans[count - 1];
        if ends_sentence(&text[start..end]) {
            return text[..end].to_string();
        }
    }

    let (_, end) = spans[target - 1];
    let cut = text[..end].trim_end_matches([',', ';', ':', '-']);
    format!("{cut}{ELLIPSIS}")
}

/// Format seconds as a short human duration
pub fn format_eta(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    }
}

fn format_created(created_at: Option<DateTime<Utc>>) -> String {
    created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One line of the job listing
pub fn format_job_row(view: &JobView) -> String {
    let origin = match view.origin {
        JobOrigin::Remote => "remote",
        JobOrigin::Local => "local",
    };
    format!(
        "{:<16} {:<6} {:<10} {:>3}%  {}  {}",
        format_created(view.created_at),
        origin,
        view.status.as_str(),
        view.progress,
        view.id,
        view.step
    )
}

/// Format a finished summary as human-readable markdown
pub fn format_summary_readable(result: &SummaryResult) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Summary ({})\n\n", result.format_tag));
    if let Some(source) = &result.source_ref {
        output.push_str(&format!("**Source:** {}\n\n", source));
    }

    output.push_str(result.summary.trim());
    output.push_str("\n\n");

    if !result.frame_captions.is_empty() {
        output.push_str("## Key frames\n\n");
        for caption in &result.frame_captions {
            output.push_str(&format!("{}. {}\n", caption.frame, caption.caption));
        }
        output.push('\n');
    }

    if let Some(transcript) = result.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
        output.push_str("## Transcript\n\n");
        output.push_str(transcript.trim());
        output.push('\n');
    }

    output
}
