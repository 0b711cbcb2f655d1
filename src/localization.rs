use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};

use crate::{module::Module, store::DocumentStore};

/// Result of a language switch request.
#[derive(Debug, Clone, PartialEq)]
pub enum LanguageSwitch {
    /// The requested language is already active.
    Unchanged,
    Switched { language: String, document: Module },
    /// No variant for `requested`; the original-language document is used.
    /// `document` is `None` when the original language was already active.
    Fallback {
        requested: String,
        language: String,
        document: Option<Module>,
    },
}

impl LanguageSwitch {
    /// Non-blocking notice to show the learner, if any.
    pub fn notice(&self) -> Option<String> {
        match self {
            LanguageSwitch::Fallback {
                requested,
                language,
                ..
            } => Some(format!(
                "This module is not available in '{}', showing the '{}' version instead.",
                requested, language
            )),
            _ => None,
        }
    }
}

/// Language variants of one module, with the original-language document as fallback.
#[derive(Debug)]
pub struct Localization {
    original_language: String,
    active_language: String,
    original: Module,
    variants: DashMap<String, Module>,
}

impl Localization {
    pub fn new(original: Module, language: impl Into<String>) -> Self {
        let language = language.into();
        Self {
            original_language: language.clone(),
            active_language: language,
            original,
            variants: DashMap::new(),
        }
    }

    pub fn active_language(&self) -> &str {
        &self.active_language
    }

    pub fn insert_variant(&self, language: impl Into<String>, document: Module) {
        let language = language.into();
        if language == self.original_language {
            warn!("ignore variant in the original language {}", language);
            return;
        }
        self.variants.insert(language, document);
    }

    pub fn has_variant(&self, language: &str) -> bool {
        self.variants.contains_key(language)
    }

    /// Remember a saved document for the active language.
    pub fn update_active(&mut self, document: Module) {
        if self.active_language == self.original_language {
            self.original = document;
        } else {
            self.variants.insert(self.active_language.clone(), document);
        }
    }

    /// Load the variants in `languages` from `store`. Missing or unreadable
    /// ones are skipped. Returns how many variants were cached.
    pub async fn prefetch<S: DocumentStore>(&self, store: &S, languages: &[String]) -> usize {
        let id = self.original.id.clone();
        let languages: Vec<&String> = languages
            .iter()
            .filter(|l| **l != self.original_language)
            .collect();
        let documents = join_all(languages.iter().map(|l| store.get_module(&id, l))).await;
        let mut count = 0;
        for (language, document) in languages.into_iter().zip(documents) {
            match document {
                Ok(Some(document)) => {
                    self.variants.insert(language.clone(), document);
                    count += 1;
                }
                Ok(None) => info!("module {} has no {} variant", id, language),
                Err(e) => warn!("skip {} variant of module {}: {}", language, id, e),
            }
        }
        count
    }

    pub fn switch_language(&mut self, code: &str) -> LanguageSwitch {
        if code == self.active_language {
            return LanguageSwitch::Unchanged;
        }
        if code == self.original_language {
            self.active_language = code.to_string();
            return LanguageSwitch::Switched {
                language: code.to_string(),
                document: self.original.clone(),
            };
        }
        if let Some(document) = self.variants.get(code).map(|d| d.clone()) {
            self.active_language = code.to_string();
            info!("switched module {} to {}", self.original.id, code);
            return LanguageSwitch::Switched {
                language: code.to_string(),
                document,
            };
        }
        warn!(
            "module {} has no {} variant, falling back to {}",
            self.original.id, code, self.original_language
        );
        let document = if self.active_language == self.original_language {
            None
        } else {
            self.active_language = self.original_language.clone();
            Some(self.original.clone())
        };
        LanguageSwitch::Fallback {
            requested: code.to_string(),
            language: self.original_language.clone(),
            document,
        }
    }
}
