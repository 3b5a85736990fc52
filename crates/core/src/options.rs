use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, VideowiseError};

pub const FRAME_COUNT_RANGE: RangeInclusive<u32> = 5..=20;
pub const WORD_TARGET_RANGE: RangeInclusive<u32> = 50..=2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Default,
    Professional,
    Commercial,
    Educational,
    Casual,
    Technical,
}

impl SummaryStyle {
    pub const ALL: [SummaryStyle; 6] = [
        SummaryStyle::Default,
        SummaryStyle::Professional,
        SummaryStyle::Commercial,
        SummaryStyle::Educational,
        SummaryStyle::Casual,
        SummaryStyle::Technical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStyle::Default => "default",
            SummaryStyle::Professional => "professional",
            SummaryStyle::Commercial => "commercial",
            SummaryStyle::Educational => "educational",
            SummaryStyle::Casual => "casual",
            SummaryStyle::Technical => "technical",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    Paragraph,
    Bullet,
    Timeline,
    Chapters,
    Highlights,
}

impl SummaryFormat {
    pub const ALL: [SummaryFormat; 5] = [
        SummaryFormat::Paragraph,
        SummaryFormat::Bullet,
        SummaryFormat::Timeline,
        SummaryFormat::Chapters,
        SummaryFormat::Highlights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryFormat::Paragraph => "paragraph",
            SummaryFormat::Bullet => "bullet",
            SummaryFormat::Timeline => "timeline",
            SummaryFormat::Chapters => "chapters",
            SummaryFormat::Highlights => "highlights",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = VideowiseError;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim().to_ascii_lowercase();
                $ty::ALL
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        let known: Vec<_> = $ty::ALL.iter().map(|v| v.as_str()).collect();
                        VideowiseError::validation(format!(
                            "unknown {} {:?} (expected one of: {})",
                            $what,
                            s,
                            known.join(", ")
                        ))
                    })
            }
        }
    };
}

impl_text_enum!(SummaryStyle, "style");
impl_text_enum!(SummaryFormat, "format");

/// Requested summary length. Serialized as `"auto"` or a bare number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WordTarget {
    #[default]
    Auto,
    Words(u32),
}

impl WordTarget {
    pub fn words(&self) -> Option<u32> {
        match self {
            WordTarget::Auto => None,
            WordTarget::Words(n) => Some(*n),
        }
    }
}

impl fmt::Display for WordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordTarget::Auto => f.write_str("auto"),
            WordTarget::Words(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for WordTarget {
    type Err = VideowiseError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WordTarget::Auto);
        }
        s.parse::<u32>().map(WordTarget::Words).map_err(|_| {
            VideowiseError::validation(format!("word target {s:?} is neither a number nor \"auto\""))
        })
    }
}

impl Serialize for WordTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WordTarget::Auto => serializer.serialize_str("auto"),
            WordTarget::Words(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for WordTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(WordTarget::Words(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub frame_count: u32,
    pub style: SummaryStyle,
    pub format: SummaryFormat,
    pub target_words: WordTarget,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            frame_count: 10,
            style: SummaryStyle::default(),
            format: SummaryFormat::default(),
            target_words: WordTarget::default(),
        }
    }
}

impl ProcessingOptions {
    /// Rejects out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        if !FRAME_COUNT_RANGE.contains(&self.frame_count) {
            return Err(VideowiseError::validation(format!(
                "frame count {} is outside {}..={}",
                self.frame_count,
                FRAME_COUNT_RANGE.start(),
                FRAME_COUNT_RANGE.end()
            )));
        }
        if let WordTarget::Words(n) = self.target_words {
            if !WORD_TARGET_RANGE.contains(&n) {
                return Err(VideowiseError::validation(format!(
                    "target word count {} is outside {}..={} (or use \"auto\")",
                    n,
                    WORD_TARGET_RANGE.start(),
                    WORD_TARGET_RANGE.end()
                )));
            }
        }
        Ok(())
    }
}
