use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: PathBuf,
    /// Language a module is opened in unless asked otherwise.
    pub language: String,
    /// Directory for daily rotated logs, stdout when unset.
    pub log_dir: Option<PathBuf>,
    pub learner_id: i64,
    pub evaluator: EvaluatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("database/modules.db"),
            language: "en".to_string(),
            log_dir: None,
            learner_id: 1,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

/// Settings of the OpenAI-compatible short-answer evaluator.
/// Unset fields fall back to `AI_MODEL`, `OPENAI_BASE_URL` and `OPENAI_API_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

impl EvaluatorConfig {
    pub fn model(&self) -> anyhow::Result<String> {
        match &self.model {
            Some(model) => Ok(model.clone()),
            None => Ok(dotenvy::var("AI_MODEL")?),
        }
    }

    pub fn api_base(&self) -> Option<String> {
        self.api_base
            .clone()
            .or_else(|| dotenvy::var("OPENAI_BASE_URL").ok())
    }

    pub fn api_key(&self) -> anyhow::Result<String> {
        match &self.api_key {
            Some(key) => Ok(key.clone()),
            None => Ok(dotenvy::var("OPENAI_API_KEY")?),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file when it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
