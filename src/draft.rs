pub mod scaffold;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::DraftError,
    module::{ContentItem, ContentKind, Module, QuizType, Section},
    navigation::Navigator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// Working copy of a module that authoring operations mutate in place.
///
/// Sections are copied on first write, so untouched sections keep sharing
/// storage with the document the draft was seeded from. Rejected operations
/// return an error and leave the draft untouched.
#[derive(Debug, Clone)]
pub struct DraftController {
    document: Module,
    editable: bool,
}

impl DraftController {
    pub fn new(document: Module, editable: bool) -> Self {
        Self { document, editable }
    }

    pub fn document(&self) -> &Module {
        &self.document
    }

    /// Replace the draft, discarding unsaved edits.
    pub fn reseed(&mut self, document: Module) {
        self.document = document;
    }

    fn check(&self, result: Result<(), DraftError>) -> Result<(), DraftError> {
        if let Err(e) = &result {
            warn!("draft edit on {} rejected: {}", self.document.id, e);
        }
        result
    }

    fn ensure_editable(&self) -> Result<(), DraftError> {
        if self.editable {
            Ok(())
        } else {
            Err(DraftError::NotEditable)
        }
    }

    fn ensure_section(&self, index: usize) -> Result<&Section, DraftError> {
        self.document
            .section(index)
            .ok_or(DraftError::SectionOutOfRange {
                index,
                len: self.document.section_count(),
            })
    }

    fn ensure_content(&self, section: usize, content: usize) -> Result<&ContentItem, DraftError> {
        let items = &self.ensure_section(section)?.content;
        items.get(content).ok_or(DraftError::ContentOutOfRange {
            index: content,
            len: items.len(),
        })
    }

    fn section_mut(&mut self, index: usize) -> &mut Section {
        Arc::make_mut(&mut self.document.sections[index])
    }

    /// Append an empty section named after its position. Returns its index.
    pub fn add_section(&mut self) -> Result<usize, DraftError> {
        let result = self.ensure_editable();
        self.check(result)?;
        let number = self.document.section_count() + 1;
        self.document
            .sections
            .push(Arc::new(Section::new(number as u32, scaffold::section_title(number))));
        debug!("added section {} to {}", number, self.document.id);
        Ok(number - 1)
    }

    pub fn delete_section(&mut self, index: usize, nav: &mut Navigator) -> Result<(), DraftError> {
        let result = self.ensure_editable().and_then(|_| {
            self.ensure_section(index)?;
            if self.document.section_count() <= 1 {
                return Err(DraftError::LastSection);
            }
            Ok(())
        });
        self.check(result)?;
        self.document.sections.remove(index);
        for position in index..self.document.section_count() {
            let title = scaffold::section_title(position + 1);
            let section = &self.document.sections[position];
            if scaffold::is_default_section_title(&section.title) && section.title != title {
                self.section_mut(position).title = title;
            }
        }
        nav.relocate_after_delete(index);
        debug!("deleted section {} of {}", index, self.document.id);
        Ok(())
    }

    pub fn move_section(
        &mut self,
        index: usize,
        direction: Direction,
        nav: &mut Navigator,
    ) -> Result<(), DraftError> {
        let len = self.document.section_count();
        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|t| *t < len),
        };
        let result = self.ensure_editable().and_then(|_| {
            self.ensure_section(index)?;
            target.map(|_| ()).ok_or(DraftError::MoveOutOfBounds {
                index,
                direction: direction.as_str(),
            })
        });
        self.check(result)?;
        let Some(target) = target else {
            return Ok(());
        };
        self.document.sections.swap(index, target);
        nav.follow_swap(index, target);
        Ok(())
    }

    /// Append a scaffolded item of `kind` to the active section. Returns its index.
    pub fn add_content_item(&mut self, kind: ContentKind, nav: &Navigator) -> Result<usize, DraftError> {
        let section = nav.index();
        let result = self
            .ensure_editable()
            .and_then(|_| self.ensure_section(section).map(|_| ()));
        self.check(result)?;
        let content = &mut self.section_mut(section).content;
        content.push(scaffold::new_item(kind));
        Ok(content.len() - 1)
    }

    /// Shallow-merge `{field: value}` into an item of the active section.
    ///
    /// The merged item must still be a valid content item, otherwise the edit is
    /// rejected.
    pub fn edit_content_field(
        &mut self,
        content_index: usize,
        field: &str,
        value: serde_json::Value,
        nav: &Navigator,
    ) -> Result<(), DraftError> {
        let section = nav.index();
        let result = self
            .ensure_editable()
            .and_then(|_| self.ensure_content(section, content_index))
            .and_then(|item| merge_field(item, field, value));
        let edited = match result {
            Ok(edited) => edited,
            Err(e) => return self.check(Err(e)),
        };
        self.section_mut(section).content[content_index] = edited;
        Ok(())
    }

    /// Switch a quiz to `quiz_type`, replacing its options and expected answer
    /// with that type's defaults.
    pub fn change_quiz_type(
        &mut self,
        content_index: usize,
        quiz_type: QuizType,
        nav: &Navigator,
    ) -> Result<(), DraftError> {
        let section = nav.index();
        let result = self
            .ensure_editable()
            .and_then(|_| self.ensure_content(section, content_index))
            .and_then(|item| match item {
                ContentItem::Quiz(_) => Ok(()),
                _ => Err(DraftError::NotAQuiz {
                    index: content_index,
                }),
            });
        self.check(result)?;
        if let ContentItem::Quiz(quiz) = &mut self.section_mut(section).content[content_index] {
            let (options, correct_answer) = scaffold::quiz_defaults(quiz_type);
            quiz.quiz_type = quiz_type;
            quiz.options = options;
            quiz.correct_answer = correct_answer;
        }
        Ok(())
    }

    pub fn delete_content_item(&mut self, content_index: usize, nav: &Navigator) -> Result<(), DraftError> {
        let section = nav.index();
        let result = self
            .ensure_editable()
            .and_then(|_| self.ensure_content(section, content_index).map(|_| ()));
        self.check(result)?;
        self.section_mut(section).content.remove(content_index);
        Ok(())
    }
}

fn merge_field(
    item: &ContentItem,
    field: &str,
    value: serde_json::Value,
) -> Result<ContentItem, DraftError> {
    let invalid = |reason: String| DraftError::InvalidField {
        field: field.to_string(),
        reason,
    };
    let mut merged = serde_json::to_value(item).map_err(|e| invalid(e.to_string()))?;
    let Some(object) = merged.as_object_mut() else {
        return Err(invalid("content item is not an object".to_string()));
    };
    object.insert(field.to_string(), value.clone());
    let edited: ContentItem = serde_json::from_value(merged).map_err(|e| invalid(e.to_string()))?;
    // unknown keys are dropped by serde, the edit must survive the round trip
    let stored = serde_json::to_value(&edited).map_err(|e| invalid(e.to_string()))?;
    let kept = match stored.get(field) {
        Some(stored) => *stored == value,
        // optional media fields are omitted when cleared
        None => {
            value.is_null()
                && matches!(field, "alt" | "caption" | "duration")
                && matches!(
                    edited,
                    ContentItem::Image(_) | ContentItem::Video(_) | ContentItem::Audio(_)
                )
        }
    };
    if !kept {
        return Err(invalid(format!("unknown field for {} item", edited.kind())));
    }
    Ok(edited)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::module::{TextValue, tests::sample_module};

    fn draft() -> (DraftController, Navigator) {
        (DraftController::new(sample_module(), true), Navigator::new())
    }

    #[test]
    fn test_add_section() {
        let (mut draft, _) = draft();
        assert_eq!(draft.add_section().unwrap(), 2);
        let section = draft.document().section(2).unwrap();
        assert_eq!(section.id, 3);
        assert_eq!(section.title, "New Section 3");
        assert!(section.content.is_empty());
    }

    #[test]
    fn test_draft_shares_untouched_sections() {
        let canonical = sample_module();
        let mut draft = DraftController::new(canonical.clone(), true);
        let nav = Navigator::new();
        draft.add_content_item(ContentKind::Text, &nav).unwrap();
        assert!(!Arc::ptr_eq(&canonical.sections[0], &draft.document().sections[0]));
        assert!(Arc::ptr_eq(&canonical.sections[1], &draft.document().sections[1]));
        assert_eq!(canonical.sections[0].content.len(), 2);
        assert_eq!(draft.document().sections[0].content.len(), 3);
    }

    #[test]
    fn test_delete_last_section_is_rejected() {
        let mut module = sample_module();
        module.sections.truncate(1);
        let mut draft = DraftController::new(module, true);
        let mut nav = Navigator::new();
        assert_eq!(draft.delete_section(0, &mut nav).unwrap_err(), DraftError::LastSection);
        assert_eq!(draft.document().section_count(), 1);
    }

    #[test]
    fn test_delete_section_renumbers_and_relocates() {
        let (mut draft, mut nav) = draft();
        draft.add_section().unwrap();
        draft.add_section().unwrap();
        nav.jump_to(3, 4).unwrap();
        draft.delete_section(2, &mut nav).unwrap();
        let titles: Vec<_> = draft.document().sections.iter().map(|s| s.title.clone()).collect();
        assert_eq!(titles, vec!["Ownership", "Borrowing", "New Section 3"]);
        assert_eq!(nav.index(), 2);

        draft.delete_section(2, &mut nav).unwrap();
        assert_eq!(nav.index(), 1);
        assert!(
            draft
                .delete_section(5, &mut nav)
                .is_err_and(|e| e == DraftError::SectionOutOfRange { index: 5, len: 2 })
        );
    }

    #[test]
    fn test_delete_first_section_keeps_cursor_at_zero() {
        let (mut draft, mut nav) = draft();
        draft.delete_section(0, &mut nav).unwrap();
        assert_eq!(nav.index(), 0);
        assert_eq!(draft.document().section(0).unwrap().title, "Borrowing");
    }

    #[test]
    fn test_move_section_follows_cursor() {
        let (mut draft, mut nav) = draft();
        draft.move_section(0, Direction::Down, &mut nav).unwrap();
        assert_eq!(draft.document().section(1).unwrap().title, "Ownership");
        assert_eq!(nav.index(), 1);
        assert!(draft.move_section(1, Direction::Down, &mut nav).is_err());
        assert!(draft.move_section(0, Direction::Up, &mut nav).is_err());
        draft.move_section(1, Direction::Up, &mut nav).unwrap();
        assert_eq!(nav.index(), 0);
    }

    #[test]
    fn test_add_content_out_of_range_is_noop() {
        let mut module = sample_module();
        let mut nav = Navigator::new();
        nav.jump_to(1, 2).unwrap();
        module.sections.truncate(1);
        let mut draft = DraftController::new(module.clone(), true);
        assert!(draft.add_content_item(ContentKind::Quiz, &nav).is_err());
        assert_eq!(draft.document(), &module);
    }

    #[test]
    fn test_edit_content_field() {
        let (mut draft, nav) = draft();
        draft
            .edit_content_field(1, "question", json!("Which keyword?"), &nav)
            .unwrap();
        assert_eq!(draft.document().quiz(0, 1).unwrap().question, "Which keyword?");
        draft
            .edit_content_field(0, "value", json!(["a", "b"]), &nav)
            .unwrap();
        assert_eq!(
            draft.document().section(0).unwrap().content[0],
            ContentItem::Text {
                value: TextValue::Many(vec!["a".into(), "b".into()])
            }
        );
        let before = draft.document().clone();
        assert!(matches!(
            draft.edit_content_field(1, "quizType", json!("essay"), &nav),
            Err(DraftError::InvalidField { .. })
        ));
        assert!(draft.edit_content_field(9, "value", json!("x"), &nav).is_err());
        assert_eq!(draft.document(), &before);
    }

    #[test]
    fn test_edit_unknown_field_is_rejected() {
        let (mut draft, nav) = draft();
        let before = draft.document().clone();
        assert!(matches!(
            draft.edit_content_field(1, "correct_answer", json!("C"), &nav),
            Err(DraftError::InvalidField { .. })
        ));
        assert!(matches!(
            draft.edit_content_field(0, "caption", json!("hello"), &nav),
            Err(DraftError::InvalidField { .. })
        ));
        assert!(draft.edit_content_field(0, "caption", json!(null), &nav).is_err());
        assert_eq!(draft.document(), &before);
        assert_eq!(draft.document().quiz(0, 1).unwrap().correct_answer, "B");
        draft
            .edit_content_field(1, "correctAnswer", json!("C"), &nav)
            .unwrap();
        assert_eq!(draft.document().quiz(0, 1).unwrap().correct_answer, "C");

        let image = draft.add_content_item(ContentKind::Image, &nav).unwrap();
        draft
            .edit_content_field(image, "caption", json!(null), &nav)
            .unwrap();
        match &draft.document().section(0).unwrap().content[image] {
            ContentItem::Image(media) => assert!(media.caption.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_edit_on_section_loaded_without_content() {
        let module = Module::from_json(
            r#"{"id": "m", "title": "T", "sections": [{"id": 1, "title": "A"}]}"#,
        )
        .unwrap();
        let mut draft = DraftController::new(module, true);
        let nav = Navigator::new();
        assert_eq!(
            draft.edit_content_field(0, "value", json!("x"), &nav).unwrap_err(),
            DraftError::ContentOutOfRange { index: 0, len: 0 }
        );
        assert!(draft.document().section(0).unwrap().content.is_empty());
    }

    #[test]
    fn test_change_quiz_type() {
        let (mut draft, nav) = draft();
        draft.change_quiz_type(1, QuizType::TrueFalse, &nav).unwrap();
        let quiz = draft.document().quiz(0, 1).unwrap();
        assert_eq!(quiz.quiz_type, QuizType::TrueFalse);
        assert_eq!(quiz.options, vec!["True", "False"]);
        assert_eq!(quiz.correct_answer, "True");
        assert_eq!(quiz.question, "Which keyword moves a closure's captures?");

        draft.change_quiz_type(1, QuizType::ShortAnswer, &nav).unwrap();
        let quiz = draft.document().quiz(0, 1).unwrap();
        assert!(quiz.options.is_empty());
        draft.change_quiz_type(1, QuizType::MultipleChoice, &nav).unwrap();
        assert_eq!(draft.document().quiz(0, 1).unwrap().options.len(), 4);

        assert_eq!(
            draft.change_quiz_type(0, QuizType::TrueFalse, &nav).unwrap_err(),
            DraftError::NotAQuiz { index: 0 }
        );
    }

    #[test]
    fn test_delete_content_item() {
        let (mut draft, nav) = draft();
        draft.delete_content_item(0, &nav).unwrap();
        assert_eq!(draft.document().section(0).unwrap().content.len(), 1);
        assert!(draft.delete_content_item(3, &nav).is_err());
    }

    #[test]
    fn test_read_only_draft() {
        let mut draft = DraftController::new(sample_module(), false);
        let mut nav = Navigator::new();
        assert_eq!(draft.add_section().unwrap_err(), DraftError::NotEditable);
        assert_eq!(draft.delete_section(0, &mut nav).unwrap_err(), DraftError::NotEditable);
        assert_eq!(
            draft.add_content_item(ContentKind::Text, &nav).unwrap_err(),
            DraftError::NotEditable
        );
        assert_eq!(draft.document(), &sample_module());
    }
}
