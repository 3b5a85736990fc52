//! Directive text sent to the provider alongside the uploaded video.
//!
//! Compilation is pure: the same options and profile always produce
//! byte-identical text.

use crate::{
    options::{ProcessingOptions, SummaryFormat, SummaryStyle},
    types::UserProfile,
};

struct StyleTemplate {
    role: &'static str,
    goals: &'static [&'static str],
    closing: &'static str,
}

fn style_template(style: SummaryStyle) -> StyleTemplate {
    match style {
        SummaryStyle::Default => StyleTemplate {
            role: "You are an expert video summarizer. Watch the attached video and write a comprehensive, human-readable summary.",
            goals: &[
                "Read like a well-edited article summary",
                "Combine what is said, what is shown and any on-screen text",
                "Highlight the main topics, themes and key information",
                "Focus on the visuals and on-screen text when there is no speech",
                "Use complete sentences with proper grammar",
            ],
            closing: "Write a comprehensive summary:",
        },
        SummaryStyle::Professional => StyleTemplate {
            role: "You are a business analyst. Watch the attached video and write a formal summary suitable for reports or presentations.",
            goals: &[
                "Use formal, professional language",
                "Focus on business insights, objectives and outcomes",
                "Call out decisions and action items",
                "Stay concise and structured",
            ],
            closing: "Write a professional business summary:",
        },
        SummaryStyle::Commercial => StyleTemplate {
            role: "You are a marketing copywriter. Watch the attached video and write an engaging promotional summary of its selling points.",
            goals: &[
                "Be persuasive and engaging",
                "Highlight benefits, features and value propositions",
                "Use language that captures attention",
            ],
            closing: "Write a commercial summary:",
        },
        SummaryStyle::Educational => StyleTemplate {
            role: "You are an educational content specialist. Watch the attached video and write a study-oriented summary.",
            goals: &[
                "Focus on key concepts and learning objectives",
                "Use clear, instructional language",
                "Keep the facts, theories and definitions that were presented",
                "Make it usable as study notes",
            ],
            closing: "Write an educational summary:",
        },
        SummaryStyle::Casual => StyleTemplate {
            role: "You are a friendly content creator. Watch the attached video and explain it in everyday language.",
            goals: &[
                "Keep a relaxed, conversational tone",
                "Sound like a friend describing the video",
                "Avoid jargon unless the video depends on it",
            ],
            closing: "Write a casual summary:",
        },
        SummaryStyle::Technical => StyleTemplate {
            role: "You are a technical documentation specialist. Watch the attached video and write a detailed technical summary.",
            goals: &[
                "Use precise technical terminology",
                "Include specifics: versions, parameters, measurements, steps",
                "Describe processes and methodologies in order",
            ],
            closing: "Write a technical summary:",
        },
    }
}

fn format_directive(format: SummaryFormat) -> &'static str {
    match format {
        SummaryFormat::Paragraph => "Write a flowing narrative summary in paragraph form.",
        SummaryFormat::Bullet => {
            "Write the summary as a bulleted list of clear, concise points, one per line, each starting with \"- \"."
        }
        SummaryFormat::Timeline => {
            "Write the summary in chronological order, organized by time segments with approximate timestamps."
        }
        SummaryFormat::Chapters => {
            "Divide the summary into chapters, each with a short heading followed by its summary."
        }
        SummaryFormat::Highlights => {
            "List only the key highlights and most important moments. Be very concise."
        }
    }
}

fn profile_block(profile: &UserProfile) -> String {
    let mut block = String::from("READER PROFILE:\n");
    if !profile.expertise.is_empty() {
        block.push_str(&format!("Expertise: {}\n", profile.expertise.join(", ")));
    }
    let prefs = &profile.summary_preferences;
    block.push_str(&format!(
        "Preferences: length={}, focus={}, tone={}\n",
        prefs.length,
        prefs.focus.join(", "),
        prefs.tone
    ));
    block.push_str("Adjust depth, vocabulary and emphasis for this reader.");
    block
}

/// Build the generation directive for one orchestration.
pub fn compile(options: &ProcessingOptions, profile: Option<&UserProfile>) -> String {
    let template = style_template(options.style);

    let mut sections = Vec::with_capacity(6);
    sections.push(template.role.to_string());
    sections.push(format_directive(options.format).to_string());
    sections.push(format!(
        "Base your description of the visuals on about {} evenly spaced key moments of the video.",
        options.frame_count
    ));

    let goals = template
        .goals
        .iter()
        .enumerate()
        .map(|(i, goal)| format!("{}. {}", i + 1, goal))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("The summary should:\n{goals}"));

    if let Some(words) = options.target_words.words() {
        sections.push(format!(
            "The summary must be approximately {words} words long and must not exceed {words} words."
        ));
    }

    if let Some(profile) = profile {
        sections.push(profile_block(profile));
    }

    sections.push(template.closing.to_string());
    sections.join("\n\n")
}
