pub mod evaluator;

use std::{collections::HashMap, fmt, sync::Arc};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    error::QuizError,
    module::{Quiz, QuizType},
};
use evaluator::{EvaluationFrame, EvaluationRequest, FrameStream, ModuleContext, ShortAnswerEvaluator};

/// Shown in place of an explanation when the evaluation stream fails.
pub const EVALUATION_ERROR_MESSAGE: &str =
    "Sorry, we couldn't evaluate your answer right now. Please try again later.";

/// Minimum score, in percent, that counts as passing.
pub const PASSING_SCORE: u8 = 70;

/// Position of a quiz item: section index and content index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuizKey {
    pub section: usize,
    pub content: usize,
}

impl QuizKey {
    pub fn new(section: usize, content: usize) -> Self {
        Self { section, content }
    }
}

impl fmt::Display for QuizKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.section, self.content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// No quiz was graded, a completion message replaces the percentage.
    NotApplicable,
    Percent(u8),
}

impl Score {
    pub fn from_counts(correct: usize, graded: usize) -> Self {
        if graded == 0 {
            return Score::NotApplicable;
        }
        let percent = (100.0 * correct as f64 / graded as f64).round();
        Score::Percent(percent as u8)
    }

    pub fn is_passing(&self) -> bool {
        matches!(self, Score::Percent(p) if *p >= PASSING_SCORE)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::NotApplicable => f.write_str("module completed"),
            Score::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// Progress of streamed short-answer evaluations, broadcast to front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationEvent {
    Started(QuizKey),
    Delta { key: QuizKey, text: String },
    Finished(QuizKey),
    Failed { key: QuizKey, message: String },
}

/// Answers, results and evaluations of one viewing session.
///
/// Every stream write carries the generation it was started with; a write whose
/// generation is no longer registered for its key (reset, retake or resubmission)
/// is dropped.
#[derive(Debug, Default)]
pub struct QuizBook {
    answers: HashMap<QuizKey, String>,
    results: HashMap<QuizKey, bool>,
    evaluations: HashMap<QuizKey, String>,
    evaluating: HashMap<QuizKey, bool>,
    generations: HashMap<QuizKey, u64>,
    next_generation: u64,
}

impl QuizBook {
    fn is_current(&self, key: QuizKey, generation: u64) -> bool {
        self.generations.get(&key) == Some(&generation)
    }

    fn begin_evaluation(&mut self, key: QuizKey) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.generations.insert(key, generation);
        self.evaluations.remove(&key);
        self.evaluating.insert(key, true);
        generation
    }

    fn append_evaluation(&mut self, key: QuizKey, generation: u64, text: &str) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        self.evaluations.entry(key).or_default().push_str(text);
        true
    }

    fn finish_evaluation(&mut self, key: QuizKey, generation: u64) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        self.evaluating.insert(key, false);
        true
    }

    fn fail_evaluation(&mut self, key: QuizKey, generation: u64) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        self.evaluations
            .insert(key, EVALUATION_ERROR_MESSAGE.to_string());
        self.evaluating.insert(key, false);
        true
    }

    fn remove(&mut self, key: QuizKey) {
        self.answers.remove(&key);
        self.results.remove(&key);
        self.evaluations.remove(&key);
        self.evaluating.remove(&key);
        self.generations.remove(&key);
    }

    fn clear(&mut self) {
        self.answers.clear();
        self.results.clear();
        self.evaluations.clear();
        self.evaluating.clear();
        self.generations.clear();
    }

    pub fn answer(&self, key: QuizKey) -> Option<&str> {
        self.answers.get(&key).map(String::as_str)
    }

    pub fn result(&self, key: QuizKey) -> Option<bool> {
        self.results.get(&key).copied()
    }

    pub fn evaluation(&self, key: QuizKey) -> Option<&str> {
        self.evaluations.get(&key).map(String::as_str)
    }

    pub fn is_evaluating(&self, key: QuizKey) -> bool {
        self.evaluating.get(&key).copied().unwrap_or(false)
    }

    /// True when `key` has an entry in any of the four maps.
    pub fn contains(&self, key: QuizKey) -> bool {
        self.answers.contains_key(&key)
            || self.results.contains_key(&key)
            || self.evaluations.contains_key(&key)
            || self.evaluating.contains_key(&key)
    }

    pub fn graded_count(&self) -> usize {
        self.results.len()
    }

    pub fn correct_count(&self) -> usize {
        self.results.values().filter(|correct| **correct).count()
    }

    pub fn score(&self) -> Score {
        Score::from_counts(self.correct_count(), self.graded_count())
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
            && self.results.is_empty()
            && self.evaluations.is_empty()
            && self.evaluating.is_empty()
    }
}

/// Outcome of a submission. Short answers are credited immediately and carry
/// the task consuming their evaluation stream.
#[derive(Debug)]
pub struct Submission {
    pub correct: bool,
    pub evaluation: Option<JoinHandle<()>>,
}

/// Grades quiz answers and consumes streamed short-answer evaluations.
#[derive(Clone)]
pub struct QuizEngine {
    book: Arc<Mutex<QuizBook>>,
    evaluator: Arc<dyn ShortAnswerEvaluator>,
    events: broadcast::Sender<EvaluationEvent>,
}

impl QuizEngine {
    pub fn new(evaluator: Arc<dyn ShortAnswerEvaluator>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            book: Arc::new(Mutex::new(QuizBook::default())),
            evaluator,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EvaluationEvent> {
        self.events.subscribe()
    }

    /// Run `f` against the current state.
    pub fn read<T>(&self, f: impl FnOnce(&QuizBook) -> T) -> T {
        f(&*self.book.lock())
    }

    pub fn answer(&self, key: QuizKey) -> Option<String> {
        self.read(|book| book.answer(key).map(str::to_string))
    }

    pub fn result(&self, key: QuizKey) -> Option<bool> {
        self.read(|book| book.result(key))
    }

    pub fn evaluation(&self, key: QuizKey) -> Option<String> {
        self.read(|book| book.evaluation(key).map(str::to_string))
    }

    pub fn is_evaluating(&self, key: QuizKey) -> bool {
        self.read(|book| book.is_evaluating(key))
    }

    pub fn score(&self) -> Score {
        self.read(QuizBook::score)
    }

    pub fn record_answer(&self, key: QuizKey, answer: impl Into<String>) -> Result<(), QuizError> {
        let mut book = self.book.lock();
        if book.results.contains_key(&key) {
            return Err(QuizError::AlreadyGraded(key));
        }
        book.answers.insert(key, answer.into());
        Ok(())
    }

    /// Grade the answer recorded for `key`.
    ///
    /// Closed-form quizzes are graded by exact match. Short answers are always
    /// credited and an evaluation stream is spawned on the current tokio runtime.
    pub fn submit_answer(
        &self,
        key: QuizKey,
        quiz: &Quiz,
        language: &str,
        context: ModuleContext,
    ) -> Result<Submission, QuizError> {
        let mut book = self.book.lock();
        if book.results.contains_key(&key) {
            return Err(QuizError::AlreadyGraded(key));
        }
        let answer = book
            .answers
            .get(&key)
            .cloned()
            .ok_or(QuizError::NoAnswer(key))?;
        match quiz.quiz_type {
            QuizType::MultipleChoice | QuizType::TrueFalse => {
                let correct = answer == quiz.correct_answer;
                book.results.insert(key, correct);
                info!("quiz {} graded: {}", key, correct);
                Ok(Submission {
                    correct,
                    evaluation: None,
                })
            }
            QuizType::ShortAnswer => {
                book.results.insert(key, true);
                let generation = book.begin_evaluation(key);
                drop(book);
                let request = EvaluationRequest {
                    question: quiz.question.clone(),
                    expected_answer: quiz.correct_answer.clone(),
                    user_answer: answer,
                    language: language.to_string(),
                    module_context: context,
                };
                info!("quiz {} credited, evaluating short answer", key);
                let _ = self.events.send(EvaluationEvent::Started(key));
                let frames = self.evaluator.evaluate(request);
                let handle = tokio::spawn(consume_evaluation(
                    self.book.clone(),
                    self.events.clone(),
                    key,
                    generation,
                    frames,
                ));
                Ok(Submission {
                    correct: true,
                    evaluation: Some(handle),
                })
            }
        }
    }

    /// Discard everything recorded for `key`. An evaluation still in flight for
    /// it becomes inert.
    pub fn reset_quiz(&self, key: QuizKey) {
        self.book.lock().remove(key);
        debug!("quiz {} reset", key);
    }

    /// Discard every quiz entry, used on retake.
    pub fn clear(&self) {
        self.book.lock().clear();
    }
}

async fn consume_evaluation(
    book: Arc<Mutex<QuizBook>>,
    events: broadcast::Sender<EvaluationEvent>,
    key: QuizKey,
    generation: u64,
    mut frames: FrameStream,
) {
    while let Some(frame) = frames.next().await {
        let value = match frame {
            Ok(value) => value,
            Err(e) => {
                error!("evaluation stream for quiz {} failed: {}", key, e);
                if book.lock().fail_evaluation(key, generation) {
                    let _ = events.send(EvaluationEvent::Failed {
                        key,
                        message: EVALUATION_ERROR_MESSAGE.to_string(),
                    });
                }
                return;
            }
        };
        let frame = match serde_json::from_value::<EvaluationFrame>(value) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("skip malformed evaluation frame for quiz {}: {}", key, e);
                continue;
            }
        };
        if !book.lock().append_evaluation(key, generation, &frame.text) {
            debug!("quiz {} was reset, drop stale evaluation stream", key);
            return;
        }
        let _ = events.send(EvaluationEvent::Delta {
            key,
            text: frame.text,
        });
    }
    if book.lock().finish_evaluation(key, generation) {
        let _ = events.send(EvaluationEvent::Finished(key));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::module::Feedback;

    /// Hands out streams whose frames the test pushes by hand.
    #[derive(Default)]
    pub(crate) struct ChannelEvaluator {
        pub(crate) requests: Mutex<Vec<EvaluationRequest>>,
        senders: Mutex<Vec<mpsc::UnboundedSender<anyhow::Result<serde_json::Value>>>>,
    }

    impl ChannelEvaluator {
        pub(crate) fn sender(&self, index: usize) -> mpsc::UnboundedSender<anyhow::Result<serde_json::Value>> {
            self.senders.lock()[index].clone()
        }

        /// Close every stream handed out so far.
        pub(crate) fn close_all(&self) {
            self.senders.lock().clear();
        }
    }

    impl ShortAnswerEvaluator for ChannelEvaluator {
        fn evaluate(&self, request: EvaluationRequest) -> FrameStream {
            self.requests.lock().push(request);
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().push(tx);
            Box::pin(UnboundedReceiverStream::new(rx))
        }
    }

    /// Replays a fixed list of frames.
    pub(crate) struct ScriptedEvaluator(pub(crate) Vec<anyhow::Result<serde_json::Value>>);

    impl ShortAnswerEvaluator for ScriptedEvaluator {
        fn evaluate(&self, _request: EvaluationRequest) -> FrameStream {
            let frames = self
                .0
                .iter()
                .map(|frame| match frame {
                    Ok(value) => Ok(value.clone()),
                    Err(e) => Err(anyhow::anyhow!("{}", e)),
                })
                .collect::<Vec<_>>();
            Box::pin(futures::stream::iter(frames))
        }
    }

    fn quiz(quiz_type: QuizType, correct_answer: &str) -> Quiz {
        Quiz {
            quiz_type,
            question: "Q?".into(),
            options: vec!["A".into(), "B".into(), "C".into()],
            correct_answer: correct_answer.into(),
            feedback: Feedback::default(),
        }
    }

    fn scripted(frames: Vec<anyhow::Result<serde_json::Value>>) -> QuizEngine {
        QuizEngine::new(Arc::new(ScriptedEvaluator(frames)))
    }

    #[test]
    fn test_exact_match_grading() {
        let engine = scripted(vec![]);
        let quiz = quiz(QuizType::MultipleChoice, "B");
        let right = QuizKey::new(0, 1);
        let wrong = QuizKey::new(0, 2);
        engine.record_answer(right, "B").unwrap();
        engine.record_answer(wrong, "A").unwrap();
        let submission = engine
            .submit_answer(right, &quiz, "en", ModuleContext::default())
            .unwrap();
        assert!(submission.correct);
        assert!(submission.evaluation.is_none());
        engine
            .submit_answer(wrong, &quiz, "en", ModuleContext::default())
            .unwrap();
        assert_eq!(engine.result(right), Some(true));
        assert_eq!(engine.result(wrong), Some(false));
    }

    #[test]
    fn test_submission_guards() {
        let engine = scripted(vec![]);
        let quiz = quiz(QuizType::TrueFalse, "True");
        let key = QuizKey::new(1, 0);
        assert_eq!(
            engine
                .submit_answer(key, &quiz, "en", ModuleContext::default())
                .unwrap_err(),
            QuizError::NoAnswer(key)
        );
        engine.record_answer(key, "False").unwrap();
        engine
            .submit_answer(key, &quiz, "en", ModuleContext::default())
            .unwrap();
        assert_eq!(
            engine
                .submit_answer(key, &quiz, "en", ModuleContext::default())
                .unwrap_err(),
            QuizError::AlreadyGraded(key)
        );
        assert_eq!(
            engine.record_answer(key, "True").unwrap_err(),
            QuizError::AlreadyGraded(key)
        );
        engine.reset_quiz(key);
        engine.record_answer(key, "True").unwrap();
        assert!(
            engine
                .submit_answer(key, &quiz, "en", ModuleContext::default())
                .unwrap()
                .correct
        );
    }

    #[test]
    fn test_score() {
        assert_eq!(Score::from_counts(2, 3), Score::Percent(67));
        assert_eq!(Score::from_counts(0, 0), Score::NotApplicable);
        assert_eq!(Score::from_counts(0, 4), Score::Percent(0));
        assert!(Score::from_counts(7, 10).is_passing());
        assert!(!Score::from_counts(2, 3).is_passing());
        assert!(!Score::NotApplicable.is_passing());
        assert_eq!(Score::Percent(67).to_string(), "67%");
    }

    #[tokio::test]
    async fn test_short_answer_accumulates_in_order() {
        let engine = scripted(vec![
            Ok(json!({"text": "Data races "})),
            Ok(json!({"unexpected": true})),
            Ok(json!({"text": "are the "})),
            Ok(json!("not an object")),
            Ok(json!({"text": "key idea."})),
        ]);
        let mut events = engine.subscribe();
        let key = QuizKey::new(1, 1);
        engine.record_answer(key, "anything at all").unwrap();
        let submission = engine
            .submit_answer(key, &quiz(QuizType::ShortAnswer, "Data races"), "en", ModuleContext::default())
            .unwrap();
        assert!(submission.correct);
        assert_eq!(engine.result(key), Some(true));
        submission.evaluation.unwrap().await.unwrap();
        assert_eq!(
            engine.evaluation(key).as_deref(),
            Some("Data races are the key idea.")
        );
        assert!(!engine.is_evaluating(key));
        assert_eq!(events.recv().await.unwrap(), EvaluationEvent::Started(key));
        let mut deltas = String::new();
        loop {
            match events.recv().await.unwrap() {
                EvaluationEvent::Delta { text, .. } => deltas.push_str(&text),
                EvaluationEvent::Finished(k) => {
                    assert_eq!(k, key);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(deltas, "Data races are the key idea.");
    }

    #[tokio::test]
    async fn test_transport_failure_is_local() {
        let engine = scripted(vec![
            Ok(json!({"text": "partial"})),
            Err(anyhow::anyhow!("connection reset")),
            Ok(json!({"text": "never seen"})),
        ]);
        let key = QuizKey::new(0, 0);
        engine.record_answer(key, "my answer").unwrap();
        let submission = engine
            .submit_answer(key, &quiz(QuizType::ShortAnswer, "x"), "en", ModuleContext::default())
            .unwrap();
        submission.evaluation.unwrap().await.unwrap();
        assert_eq!(engine.evaluation(key).as_deref(), Some(EVALUATION_ERROR_MESSAGE));
        assert!(!engine.is_evaluating(key));
        assert_eq!(engine.result(key), Some(true));
    }

    #[tokio::test]
    async fn test_reset_cancels_in_flight_stream() {
        let evaluator = Arc::new(ChannelEvaluator::default());
        let engine = QuizEngine::new(evaluator.clone());
        let key = QuizKey::new(2, 3);
        engine.record_answer(key, "first try").unwrap();
        let submission = engine
            .submit_answer(key, &quiz(QuizType::ShortAnswer, "x"), "de", ModuleContext::default())
            .unwrap();
        assert_eq!(evaluator.requests.lock()[0].language, "de");
        assert_eq!(evaluator.requests.lock()[0].user_answer, "first try");
        let tx = evaluator.sender(0);
        tx.send(Ok(json!({"text": "Hello"}))).unwrap();
        tokio::task::yield_now().await;
        while engine.evaluation(key).is_none() {
            tokio::task::yield_now().await;
        }
        assert!(engine.is_evaluating(key));

        engine.reset_quiz(key);
        assert!(!engine.read(|book| book.contains(key)));
        tx.send(Ok(json!({"text": " late"}))).unwrap();
        drop(tx);
        evaluator.close_all();
        submission.evaluation.unwrap().await.unwrap();
        assert!(!engine.read(|book| book.contains(key)));
        assert!(engine.evaluation(key).is_none());
        assert!(!engine.is_evaluating(key));
    }

    #[tokio::test]
    async fn test_resubmission_after_reset_ignores_old_stream() {
        let evaluator = Arc::new(ChannelEvaluator::default());
        let engine = QuizEngine::new(evaluator.clone());
        let quiz = quiz(QuizType::ShortAnswer, "x");
        let key = QuizKey::new(0, 0);
        engine.record_answer(key, "one").unwrap();
        let first = engine
            .submit_answer(key, &quiz, "en", ModuleContext::default())
            .unwrap();
        engine.reset_quiz(key);
        engine.record_answer(key, "two").unwrap();
        let second = engine
            .submit_answer(key, &quiz, "en", ModuleContext::default())
            .unwrap();

        evaluator.sender(0).send(Ok(json!({"text": "stale"}))).unwrap();
        evaluator.sender(1).send(Ok(json!({"text": "fresh"}))).unwrap();
        evaluator.close_all();
        first.evaluation.unwrap().await.unwrap();
        second.evaluation.unwrap().await.unwrap();
        assert_eq!(engine.evaluation(key).as_deref(), Some("fresh"));
        assert!(!engine.is_evaluating(key));
    }

    #[tokio::test]
    async fn test_concurrent_keys_are_independent() {
        let evaluator = Arc::new(ChannelEvaluator::default());
        let engine = QuizEngine::new(evaluator.clone());
        let quiz = quiz(QuizType::ShortAnswer, "x");
        let a = QuizKey::new(0, 0);
        let b = QuizKey::new(0, 1);
        engine.record_answer(a, "a").unwrap();
        engine.record_answer(b, "b").unwrap();
        let first = engine.submit_answer(a, &quiz, "en", ModuleContext::default()).unwrap();
        let second = engine.submit_answer(b, &quiz, "en", ModuleContext::default()).unwrap();
        evaluator.sender(1).send(Ok(json!({"text": "b1"}))).unwrap();
        evaluator.sender(0).send(Ok(json!({"text": "a1"}))).unwrap();
        evaluator.sender(1).send(Ok(json!({"text": "b2"}))).unwrap();
        evaluator.close_all();
        first.evaluation.unwrap().await.unwrap();
        second.evaluation.unwrap().await.unwrap();
        assert_eq!(engine.evaluation(a).as_deref(), Some("a1"));
        assert_eq!(engine.evaluation(b).as_deref(), Some("b1b2"));
        assert_eq!(engine.score(), Score::Percent(100));
    }

    #[test]
    fn test_clear_empties_all_maps() {
        let engine = scripted(vec![]);
        let quiz = quiz(QuizType::MultipleChoice, "A");
        for content in 0..3 {
            let key = QuizKey::new(0, content);
            engine.record_answer(key, "A").unwrap();
            engine
                .submit_answer(key, &quiz, "en", ModuleContext::default())
                .unwrap();
        }
        assert_eq!(engine.read(QuizBook::graded_count), 3);
        engine.clear();
        assert!(engine.read(QuizBook::is_empty));
        assert_eq!(engine.score(), Score::NotApplicable);
    }
}
