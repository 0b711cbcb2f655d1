use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
};
use async_stream::try_stream;
use futures::{Stream, StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::EvaluatorConfig;

/// Raw application-level frames of one evaluation. A frame is expected to look
/// like `{"text": "..."}`; anything else is skipped by the consumer.
pub type FrameStream = BoxStream<'static, anyhow::Result<serde_json::Value>>;

/// Where a quiz sits, passed to the evaluator as context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleContext {
    pub module_title: String,
    pub section_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub question: String,
    pub expected_answer: String,
    pub user_answer: String,
    pub language: String,
    pub module_context: ModuleContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EvaluationFrame {
    pub text: String,
}

/// Explains a free-text answer as a stream of text deltas.
pub trait ShortAnswerEvaluator: Send + Sync {
    /// Opening the stream is lazy; transport errors surface as `Err` items.
    fn evaluate(&self, request: EvaluationRequest) -> FrameStream;
}

pub struct OpenAiEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEvaluator {
    pub fn new(config: &EvaluatorConfig) -> anyhow::Result<Self> {
        let mut openai = OpenAIConfig::default().with_api_key(config.api_key()?);
        if let Some(base_url) = config.api_base() {
            openai = openai.with_api_base(base_url);
        }
        let model = config.model()?;
        info!("short-answer evaluator uses model {}", model);
        Ok(Self {
            client: Client::with_config(openai),
            model,
        })
    }
}

fn instruction(request: &EvaluationRequest) -> String {
    format!(
        "You are a patient tutor grading a learner's free-text answer in the module '{}', section '{}'.\n\
        Compare the learner's answer with the expected answer. Say whether it captures the key idea, \
        point out what is missing or wrong, and keep the explanation under 120 words. \
        Respond in the language with code '{}'.",
        request.module_context.module_title, request.module_context.section_title, request.language
    )
}

fn prompt(request: &EvaluationRequest) -> String {
    format!(
        "Question: {}\nExpected answer: {}\nLearner's answer: {}",
        request.question, request.expected_answer, request.user_answer
    )
}

fn completion_frames(
    client: Client<OpenAIConfig>,
    model: String,
    request: EvaluationRequest,
) -> impl Stream<Item = anyhow::Result<serde_json::Value>> + Send + 'static {
    try_stream! {
        let completion = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![
                ChatCompletionRequestMessage::System(instruction(&request).into()),
                ChatCompletionRequestMessage::User(prompt(&request).into()),
            ])
            .build()?;
        let mut response = client.chat().create_stream(completion).await?;
        while let Some(result) = response.next().await {
            let chunk = result?;
            let Some(choice) = chunk.choices.first() else {
                continue;
            };
            if let Some(content) = choice.delta.content.as_ref() {
                yield json!({ "text": content });
            }
        }
    }
}

impl ShortAnswerEvaluator for OpenAiEvaluator {
    fn evaluate(&self, request: EvaluationRequest) -> FrameStream {
        Box::pin(completion_frames(
            self.client.clone(),
            self.model.clone(),
            request,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            question: "What does the borrow checker prevent?".into(),
            expected_answer: "Data races".into(),
            user_answer: "dangling pointers".into(),
            language: "fr".into(),
            module_context: ModuleContext {
                module_title: "Rust Basics".into(),
                section_title: "Borrowing".into(),
            },
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(value["expectedAnswer"], "Data races");
        assert_eq!(value["userAnswer"], "dangling pointers");
        assert_eq!(value["moduleContext"]["sectionTitle"], "Borrowing");
    }

    #[test]
    fn test_prompts_carry_context() {
        let request = request();
        assert!(instruction(&request).contains("'fr'"));
        assert!(instruction(&request).contains("Rust Basics"));
        let prompt = prompt(&request);
        assert!(prompt.contains("Expected answer: Data races"));
        assert!(prompt.contains("Learner's answer: dangling pointers"));
    }

    #[test]
    fn test_frame_shape() {
        let frame: EvaluationFrame = serde_json::from_value(json!({"text": "ok"})).unwrap();
        assert_eq!(frame.text, "ok");
        assert!(serde_json::from_value::<EvaluationFrame>(json!({"delta": "x"})).is_err());
    }
}
