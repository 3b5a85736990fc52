use serde::{Deserialize, Serialize};

use crate::options::SummaryFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub summary_preferences: SummaryPreferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPreferences {
    pub length: String,
    pub focus: Vec<String>,
    pub tone: String,
}

impl Default for SummaryPreferences {
    fn default() -> Self {
        Self {
            length: "medium".to_string(),
            focus: vec!["technical".to_string(), "highlevel".to_string()],
            tone: "professional".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCaption {
    pub frame: u32,
    pub caption: String,
}

/// Finished summary, whichever pipeline produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub frame_captions: Vec<FrameCaption>,
    #[serde(default)]
    pub asset_url: Option<String>,
    pub format_tag: SummaryFormat,
    #[serde(default)]
    pub source_ref: Option<String>,
}
