use crate::quiz::QuizKey;

/// A draft mutation that was rejected and left the document untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("document is not editable")]
    NotEditable,
    #[error("cannot delete the last remaining section")]
    LastSection,
    #[error("section index {index} out of range, section count {len}")]
    SectionOutOfRange { index: usize, len: usize },
    #[error("content index {index} out of range, content count {len}")]
    ContentOutOfRange { index: usize, len: usize },
    #[error("section {index} cannot move {direction}")]
    MoveOutOfBounds { index: usize, direction: &'static str },
    #[error("content item {index} is not a quiz")]
    NotAQuiz { index: usize },
    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("no quiz at {0}")]
    NotAQuiz(QuizKey),
    #[error("no answer recorded for {0}")]
    NoAnswer(QuizKey),
    #[error("{0} is already graded, reset it first")]
    AlreadyGraded(QuizKey),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("already showing results")]
    ShowingResults,
    #[error("already at the first section")]
    AtFirstSection,
    #[error("section index {index} out of range, section count {len}")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("module {id} ({language}) not found")]
    NotFound { id: String, language: String },
    #[error("saving requires admin mode")]
    NotAdmin,
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error("document store error: {0}")]
    Store(anyhow::Error),
}
