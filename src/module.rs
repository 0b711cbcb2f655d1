pub mod content;

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

pub use content::{ContentItem, ContentKind, Feedback, Media, Quiz, QuizType, TextValue};

/// A learning module: metadata plus an ordered list of sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub learning_outcomes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sections are shared with the canonical document until a draft edit touches them.
    #[serde(default)]
    pub sections: Vec<Arc<Section>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    pub id: u32,
    pub title: String,
    /// Always an array. Missing, `null` or non-array values are repaired to `[]` on load.
    #[serde(default, deserialize_with = "content_or_empty")]
    pub content: Vec<ContentItem>,
}

impl Section {
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: vec![],
        }
    }
}

fn content_or_empty<'de, D>(deserializer: D) -> Result<Vec<ContentItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(_) => {
            serde_json::from_value(value).map_err(serde::de::Error::custom)
        }
        serde_json::Value::Null => Ok(vec![]),
        other => {
            warn!("section content is not an array ({}), repaired to []", other);
            Ok(vec![])
        }
    }
}

impl Module {
    /// Parse a module document, normalizing malformed section content.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index).map(Arc::as_ref)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn quiz(&self, section: usize, content: usize) -> Option<&Quiz> {
        match self.section(section)?.content.get(content)? {
            ContentItem::Quiz(quiz) => Some(quiz),
            _ => None,
        }
    }

    /// Total number of quiz items across all sections.
    pub fn quiz_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.content.iter())
            .filter(|item| matches!(item, ContentItem::Quiz(_)))
            .count()
    }
}
