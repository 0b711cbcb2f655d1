use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    draft::{Direction, DraftController},
    error::{PlayerError, QuizError},
    localization::{LanguageSwitch, Localization},
    module::{ContentKind, Module, QuizType, Section},
    navigation::{NavState, Navigator},
    progress::{ProgressGateway, ProgressTracker},
    quiz::{
        EvaluationEvent, QuizEngine, QuizKey, Score, Submission,
        evaluator::{ModuleContext, ShortAnswerEvaluator},
    },
    store::DocumentStore,
};

/// Flags supplied by the authoring shell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthoringMode {
    pub admin: bool,
    pub editable: bool,
}

impl AuthoringMode {
    pub fn learner() -> Self {
        Self::default()
    }

    pub fn editor() -> Self {
        Self {
            admin: true,
            editable: true,
        }
    }

    fn can_edit(&self) -> bool {
        self.admin && self.editable
    }
}

#[derive(Debug)]
pub enum Advance {
    Section(usize),
    /// The last section was completed. `progress` is the completion report,
    /// sent only for a passing score.
    Results {
        score: Score,
        progress: Option<JoinHandle<()>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverviewRow {
    pub index: usize,
    pub title: String,
    pub completed: bool,
    pub current: bool,
}

/// One learner session over one module.
///
/// The canonical document only changes on [`ModulePlayer::save`] or a language
/// switch; authoring operations go to the draft.
pub struct ModulePlayer {
    canonical: Module,
    draft: DraftController,
    navigator: Navigator,
    quiz: QuizEngine,
    progress: ProgressGateway,
    localization: Localization,
    mode: AuthoringMode,
}

impl ModulePlayer {
    pub fn new(
        document: Module,
        language: impl Into<String>,
        mode: AuthoringMode,
        evaluator: Arc<dyn ShortAnswerEvaluator>,
        tracker: Arc<dyn ProgressTracker>,
    ) -> Self {
        let progress = ProgressGateway::new(tracker, document.id.clone());
        Self {
            draft: DraftController::new(document.clone(), mode.can_edit()),
            localization: Localization::new(document.clone(), language),
            canonical: document,
            navigator: Navigator::new(),
            quiz: QuizEngine::new(evaluator),
            progress,
            mode,
        }
    }

    pub async fn load<S: DocumentStore>(
        store: &S,
        id: &str,
        language: &str,
        mode: AuthoringMode,
        evaluator: Arc<dyn ShortAnswerEvaluator>,
        tracker: Arc<dyn ProgressTracker>,
    ) -> Result<Self, PlayerError> {
        let document = store
            .get_module(id, language)
            .await
            .map_err(PlayerError::Store)?
            .ok_or_else(|| PlayerError::NotFound {
                id: id.to_string(),
                language: language.to_string(),
            })?;
        info!("loaded module {} ({})", id, language);
        Ok(Self::new(document, language, mode, evaluator, tracker))
    }

    /// Cache the other language variants available in `store`.
    pub async fn prefetch_languages<S: DocumentStore>(
        &self,
        store: &S,
        languages: &[String],
    ) -> usize {
        self.localization.prefetch(store, languages).await
    }

    /// The draft, which is what the learner sees.
    pub fn document(&self) -> &Module {
        self.draft.document()
    }

    pub fn canonical(&self) -> &Module {
        &self.canonical
    }

    pub fn mode(&self) -> AuthoringMode {
        self.mode
    }

    pub fn language(&self) -> &str {
        self.localization.active_language()
    }

    pub fn state(&self) -> NavState {
        self.navigator.state()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.document().section(self.navigator.index())
    }

    pub fn quiz_engine(&self) -> &QuizEngine {
        &self.quiz
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EvaluationEvent> {
        self.quiz.subscribe()
    }

    /// The learner starts viewing the module. Progress is not tracked for editors,
    /// and outside a tokio runtime the report is dropped.
    pub fn open(&mut self) -> Option<JoinHandle<()>> {
        if self.mode.admin {
            return None;
        }
        self.progress.report_started()
    }

    pub fn advance(&mut self) -> Result<Advance, PlayerError> {
        match self.navigator.advance(self.document().section_count())? {
            NavState::Browsing(index) => Ok(Advance::Section(index)),
            NavState::ShowingResults => {
                let score = self.quiz.score();
                info!("results of {}: {}", self.canonical.id, score);
                let progress = if score.is_passing() && !self.mode.admin {
                    self.progress.report_completed(100)
                } else {
                    None
                };
                Ok(Advance::Results { score, progress })
            }
        }
    }

    pub fn retreat(&mut self) -> Result<NavState, PlayerError> {
        Ok(self.navigator.retreat()?)
    }

    pub fn jump_to(&mut self, index: usize) -> Result<NavState, PlayerError> {
        Ok(self.navigator.jump_to(index, self.document().section_count())?)
    }

    pub fn retake(&mut self) {
        self.navigator.retake();
        self.quiz.clear();
        info!("retake of {}", self.canonical.id);
    }

    pub fn score(&self) -> Score {
        self.quiz.score()
    }

    pub fn overview(&self) -> Vec<OverviewRow> {
        self.document()
            .sections
            .iter()
            .enumerate()
            .map(|(index, section)| OverviewRow {
                index,
                title: section.title.clone(),
                completed: self.navigator.is_completed(index),
                current: index == self.navigator.index(),
            })
            .collect()
    }

    pub fn record_answer(&self, key: QuizKey, answer: impl Into<String>) -> Result<(), PlayerError> {
        if self.document().quiz(key.section, key.content).is_none() {
            return Err(QuizError::NotAQuiz(key).into());
        }
        Ok(self.quiz.record_answer(key, answer)?)
    }

    /// Grade the recorded answer. Must run inside a tokio runtime, short answers
    /// spawn their evaluation.
    pub fn submit_answer(&self, key: QuizKey) -> Result<Submission, PlayerError> {
        let document = self.document();
        let quiz = document
            .quiz(key.section, key.content)
            .ok_or(QuizError::NotAQuiz(key))?;
        let context = ModuleContext {
            module_title: document.title.clone(),
            section_title: document
                .section(key.section)
                .map(|s| s.title.clone())
                .unwrap_or_default(),
        };
        Ok(self.quiz.submit_answer(key, quiz, self.language(), context)?)
    }

    pub fn reset_quiz(&self, key: QuizKey) {
        self.quiz.reset_quiz(key);
    }

    /// Switch to the `code` variant, or to the original language if it is not
    /// cached. Unsaved draft edits are discarded when the document changes.
    pub fn switch_language(&mut self, code: &str) -> LanguageSwitch {
        let switch = self.localization.switch_language(code);
        match &switch {
            LanguageSwitch::Switched { document, .. }
            | LanguageSwitch::Fallback {
                document: Some(document),
                ..
            } => {
                if self.has_unsaved_changes() {
                    warn!("discarding unsaved edits of {} on language switch", self.canonical.id);
                }
                self.canonical = document.clone();
                self.draft.reseed(document.clone());
                self.navigator.clamp(document.section_count());
            }
            _ => {}
        }
        switch
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.draft.document() != &self.canonical
    }

    /// Indices of draft sections whose storage is no longer shared with the
    /// canonical document at the same position.
    pub fn changed_sections(&self) -> Vec<usize> {
        self.draft
            .document()
            .sections
            .iter()
            .enumerate()
            .filter(|(index, section)| {
                self.canonical
                    .sections
                    .get(*index)
                    .is_none_or(|original| !Arc::ptr_eq(original, section))
            })
            .map(|(index, _)| index)
            .collect()
    }

    pub fn discard_changes(&mut self) {
        self.draft.reseed(self.canonical.clone());
        self.navigator.clamp(self.canonical.section_count());
    }

    /// Persist the draft for the active language; it becomes the canonical document.
    pub async fn save<S: DocumentStore>(&mut self, store: &S) -> Result<(), PlayerError> {
        if !self.mode.admin {
            return Err(PlayerError::NotAdmin);
        }
        let document = self.draft.document().clone();
        store
            .save_module(&document, self.localization.active_language())
            .await
            .map_err(PlayerError::Store)?;
        self.localization.update_active(document.clone());
        self.canonical = document;
        Ok(())
    }

    pub fn add_section(&mut self) -> Result<usize, PlayerError> {
        Ok(self.draft.add_section()?)
    }

    pub fn delete_section(&mut self, index: usize) -> Result<(), PlayerError> {
        Ok(self.draft.delete_section(index, &mut self.navigator)?)
    }

    pub fn move_section(&mut self, index: usize, direction: Direction) -> Result<(), PlayerError> {
        Ok(self.draft.move_section(index, direction, &mut self.navigator)?)
    }

    pub fn add_content_item(&mut self, kind: ContentKind) -> Result<usize, PlayerError> {
        Ok(self.draft.add_content_item(kind, &self.navigator)?)
    }

    pub fn edit_content_field(
        &mut self,
        content_index: usize,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), PlayerError> {
        Ok(self
            .draft
            .edit_content_field(content_index, field, value, &self.navigator)?)
    }

    pub fn change_quiz_type(&mut self, content_index: usize, quiz_type: QuizType) -> Result<(), PlayerError> {
        Ok(self
            .draft
            .change_quiz_type(content_index, quiz_type, &self.navigator)?)
    }

    /// Quiz entries are keyed by position: answers and results recorded at a
    /// deleted position stay in the score until that key is reset.
    pub fn delete_content_item(&mut self, content_index: usize) -> Result<(), PlayerError> {
        Ok(self.draft.delete_content_item(content_index, &self.navigator)?)
    }
}
