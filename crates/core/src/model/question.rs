use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{OptionId, QuestionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question ordinal must start at 1")]
    InvalidOrdinal,

    #[error("choice question {id} has no options")]
    MissingOptions { id: QuestionId },

    #[error("free-text question {id} must not carry options")]
    UnexpectedOptions { id: QuestionId },

    #[error("option {option} appears more than once")]
    DuplicateOption { option: OptionId },

    #[error("max score must be a finite, non-negative number")]
    InvalidMaxScore,
}

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[serde(alias = "single-choice")]
    SingleChoice,
    #[serde(alias = "multiple-choice")]
    MultipleChoice,
    #[serde(alias = "free-text")]
    FreeText,
}

impl QuestionKind {
    #[must_use]
    pub fn is_choice(self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultipleChoice)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    #[serde(default)]
    pub text: String,
}

/// Unvalidated question as delivered by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub id: u64,
    pub ordinal: u32,
    #[serde(rename = "type")]
    pub kind: Option<QuestionKind>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default)]
    pub max_score: f64,
}

/// A question of the running attempt. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuestionDraft", rename_all = "camelCase")]
pub struct Question {
    id: QuestionId,
    ordinal: u32,
    #[serde(rename = "type")]
    kind: QuestionKind,
    text: String,
    options: Vec<QuestionOption>,
    max_score: f64,
}

impl QuestionDraft {
    /// Validate the draft into a `Question`.
    ///
    /// A missing `type` is read as free text when no options are present and as
    /// single choice otherwise.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when the ordinal, options or score are inconsistent.
    pub fn validate(self) -> Result<Question, QuestionError> {
        let id = QuestionId::new(self.id);
        if self.ordinal == 0 {
            return Err(QuestionError::InvalidOrdinal);
        }
        if !self.max_score.is_finite() || self.max_score < 0.0 {
            return Err(QuestionError::InvalidMaxScore);
        }

        let options = self.options.unwrap_or_default();
        let kind = self.kind.unwrap_or(if options.is_empty() {
            QuestionKind::FreeText
        } else {
            QuestionKind::SingleChoice
        });

        if kind.is_choice() && options.is_empty() {
            return Err(QuestionError::MissingOptions { id });
        }
        if !kind.is_choice() && !options.is_empty() {
            return Err(QuestionError::UnexpectedOptions { id });
        }
        for (idx, option) in options.iter().enumerate() {
            if options[..idx].iter().any(|other| other.id == option.id) {
                return Err(QuestionError::DuplicateOption { option: option.id });
            }
        }

        Ok(Question {
            id,
            ordinal: self.ordinal,
            kind,
            text: self.text,
            options,
            max_score: self.max_score,
        })
    }
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(value: QuestionDraft) -> Result<Self, Self::Error> {
        value.validate()
    }
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    /// Position of the question within the attempt, 1-based.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        &self.options
    }

    #[must_use]
    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    #[must_use]
    pub fn has_option(&self, option: OptionId) -> bool {
        self.options.iter().any(|candidate| candidate.id == option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice_draft() -> QuestionDraft {
        QuestionDraft {
            id: 1,
            ordinal: 1,
            kind: Some(QuestionKind::SingleChoice),
            text: "Pick one".into(),
            options: Some(vec![
                QuestionOption { id: OptionId::new(5), text: "five".into() },
                QuestionOption { id: OptionId::new(6), text: "six".into() },
            ]),
            max_score: 2.0,
        }
    }

    #[test]
    fn decodes_wire_question() {
        let raw = r#"{
            "id": 7,
            "ordinal": 3,
            "type": "multiple_choice",
            "text": "Select primes",
            "options": [{"id": 2, "text": "2"}, {"id": 4, "text": "4"}],
            "maxScore": 1.5
        }"#;
        let question: Question = serde_json::from_str(raw).unwrap();
        assert_eq!(question.id(), QuestionId::new(7));
        assert_eq!(question.ordinal(), 3);
        assert_eq!(question.kind(), QuestionKind::MultipleChoice);
        assert!(question.has_option(OptionId::new(4)));
        assert!((question.max_score() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn kebab_case_kind_is_accepted() {
        let raw = r#"{"id": 1, "ordinal": 1, "type": "free-text", "text": "Explain", "maxScore": 3}"#;
        let question: Question = serde_json::from_str(raw).unwrap();
        assert_eq!(question.kind(), QuestionKind::FreeText);
        assert!(question.options().is_empty());
    }

    #[test]
    fn rejects_zero_ordinal() {
        let mut draft = choice_draft();
        draft.ordinal = 0;
        assert_eq!(draft.validate().unwrap_err(), QuestionError::InvalidOrdinal);
    }

    #[test]
    fn rejects_choice_without_options() {
        let mut draft = choice_draft();
        draft.options = None;
        assert!(matches!(
            draft.validate(),
            Err(QuestionError::MissingOptions { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_options() {
        let mut draft = choice_draft();
        draft.options = Some(vec![
            QuestionOption { id: OptionId::new(5), text: "a".into() },
            QuestionOption { id: OptionId::new(5), text: "b".into() },
        ]);
        assert_eq!(
            draft.validate().unwrap_err(),
            QuestionError::DuplicateOption { option: OptionId::new(5) }
        );
    }
}
