use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single renderable item of a section, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentItem {
    Text { value: TextValue },
    List { value: TextValue },
    Image(Media),
    Video(Media),
    Audio(Media),
    Quiz(Quiz),
}

/// Text and list values are either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TextValue {
    Single(String),
    Many(Vec<String>),
}

impl Default for TextValue {
    fn default() -> Self {
        TextValue::Single(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Media {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum QuizType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

impl QuizType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizType::MultipleChoice => "multiple-choice",
            QuizType::TrueFalse => "true-false",
            QuizType::ShortAnswer => "short-answer",
        }
    }
}

impl fmt::Display for QuizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple-choice" => Ok(QuizType::MultipleChoice),
            "true-false" => Ok(QuizType::TrueFalse),
            "short-answer" => Ok(QuizType::ShortAnswer),
            _ => Err(anyhow::anyhow!("unknown quiz type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Feedback {
    #[serde(default)]
    pub correct: String,
    #[serde(default)]
    pub incorrect: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub quiz_type: QuizType,
    pub question: String,
    /// Empty for short-answer quizzes.
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub feedback: Feedback,
}

/// Discriminant of [`ContentItem`], used when scaffolding new items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    List,
    Image,
    Video,
    Audio,
    Quiz,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::List => "list",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::Audio => "audio",
            ContentKind::Quiz => "quiz",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "list" => Ok(ContentKind::List),
            "image" => Ok(ContentKind::Image),
            "video" => Ok(ContentKind::Video),
            "audio" => Ok(ContentKind::Audio),
            "quiz" => Ok(ContentKind::Quiz),
            _ => Err(anyhow::anyhow!("unknown content type: {}", s)),
        }
    }
}

impl ContentItem {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentItem::Text { .. } => ContentKind::Text,
            ContentItem::List { .. } => ContentKind::List,
            ContentItem::Image(_) => ContentKind::Image,
            ContentItem::Video(_) => ContentKind::Video,
            ContentItem::Audio(_) => ContentKind::Audio,
            ContentItem::Quiz(_) => ContentKind::Quiz,
        }
    }

    pub fn as_quiz(&self) -> Option<&Quiz> {
        match self {
            ContentItem::Quiz(quiz) => Some(quiz),
            _ => None,
        }
    }

    /// One-line plain-text rendering, used by the terminal player.
    pub fn summary(&self) -> String {
        match self {
            ContentItem::Text { value } => match value {
                TextValue::Single(s) => s.clone(),
                TextValue::Many(lines) => lines.join("\n"),
            },
            ContentItem::List { value } => match value {
                TextValue::Single(s) => format!("- {}", s),
                TextValue::Many(items) => items
                    .iter()
                    .map(|item| format!("- {}", item))
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            ContentItem::Image(media) | ContentItem::Video(media) | ContentItem::Audio(media) => {
                let caption = media
                    .caption
                    .as_ref()
                    .map(|c| format!(" ({})", c))
                    .unwrap_or_default();
                format!("[{}] {}{}", self.kind(), media.url, caption)
            }
            ContentItem::Quiz(quiz) => {
                let mut s = format!("[{}] {}", quiz.quiz_type, quiz.question);
                for (i, option) in quiz.options.iter().enumerate() {
                    s.push_str(&format!("\n  {}. {}", i + 1, option));
                }
                s
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiz_type_serde_names() {
        let json = serde_json::to_string(&QuizType::ShortAnswer).unwrap();
        assert_eq!(json, "\"short-answer\"");
        assert_eq!("true-false".parse::<QuizType>().unwrap(), QuizType::TrueFalse);
        assert!("essay".parse::<QuizType>().is_err());
    }

    #[test]
    fn test_content_item_tag() {
        let item = ContentItem::Image(Media {
            url: "/a.png".into(),
            alt: Some("a".into()),
            caption: None,
            duration: None,
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["alt"], "a");
        assert!(value.get("caption").is_none());
        assert_eq!(item.kind(), ContentKind::Image);
        assert_eq!("audio".parse::<ContentKind>().unwrap(), ContentKind::Audio);
    }

    #[test]
    fn test_summary() {
        let item = ContentItem::List {
            value: TextValue::Many(vec!["a".into(), "b".into()]),
        };
        assert_eq!(item.summary(), "- a\n- b");
    }
}
