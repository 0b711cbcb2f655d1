use crate::module::{ContentItem, ContentKind, Feedback, Media, Quiz, QuizType, TextValue};

const SECTION_TITLE_PREFIX: &str = "New Section ";

pub fn section_title(number: usize) -> String {
    format!("{}{}", SECTION_TITLE_PREFIX, number)
}

/// Whether a title still carries the default `New Section {n}` naming.
pub fn is_default_section_title(title: &str) -> bool {
    title
        .strip_prefix(SECTION_TITLE_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Options and expected answer a quiz of `quiz_type` starts with.
pub fn quiz_defaults(quiz_type: QuizType) -> (Vec<String>, String) {
    match quiz_type {
        QuizType::MultipleChoice => (
            vec![
                "Option A".to_string(),
                "Option B".to_string(),
                "Option C".to_string(),
                "Option D".to_string(),
            ],
            "Option A".to_string(),
        ),
        QuizType::TrueFalse => (
            vec!["True".to_string(), "False".to_string()],
            "True".to_string(),
        ),
        QuizType::ShortAnswer => (vec![], "Expected answer".to_string()),
    }
}

fn media(url: &str, alt: Option<&str>, caption: &str, duration: Option<&str>) -> Media {
    Media {
        url: url.to_string(),
        alt: alt.map(str::to_string),
        caption: Some(caption.to_string()),
        duration: duration.map(str::to_string),
    }
}

/// A fresh item of `kind` with placeholder content.
pub fn new_item(kind: ContentKind) -> ContentItem {
    match kind {
        ContentKind::Text => ContentItem::Text {
            value: TextValue::Single("New text content".to_string()),
        },
        ContentKind::List => ContentItem::List {
            value: TextValue::Many(vec!["List item 1".to_string(), "List item 2".to_string()]),
        },
        ContentKind::Image => ContentItem::Image(media(
            "/placeholder.svg",
            Some("Image description"),
            "Image caption",
            None,
        )),
        ContentKind::Video => ContentItem::Video(media(
            "https://example.com/video.mp4",
            None,
            "Video caption",
            Some("0:00"),
        )),
        ContentKind::Audio => ContentItem::Audio(media(
            "https://example.com/audio.mp3",
            None,
            "Audio caption",
            Some("0:00"),
        )),
        ContentKind::Quiz => ContentItem::Quiz(Quiz {
            quiz_type: QuizType::MultipleChoice,
            question: "New question".to_string(),
            options: vec![
                "Option 1".to_string(),
                "Option 2".to_string(),
                "Option 3".to_string(),
            ],
            correct_answer: "Option 1".to_string(),
            feedback: Feedback {
                correct: "Correct! Well done.".to_string(),
                incorrect: "Not quite. Try again.".to_string(),
            },
        }),
    }
}
