use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{OptionId, Question, QuestionId, QuestionKind};

/// Upper bound on free-text answers, in characters.
pub const MAX_TEXT_ANSWER_CHARS: usize = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("question {question} expects a {expected:?} answer")]
    KindMismatch {
        question: QuestionId,
        expected: QuestionKind,
    },

    #[error("question {question} has no option {option}")]
    UnknownOption {
        question: QuestionId,
        option: OptionId,
    },

    #[error("option {option} selected more than once")]
    DuplicateOption { option: OptionId },

    #[error("question {question} accepts a single option, got {count}")]
    TooManySelections { question: QuestionId, count: usize },

    #[error("answer text is too long ({len} > {max} characters)")]
    TextTooLong { len: usize, max: usize },
}

/// Validated answer value as exchanged with the backend.
///
/// Serializes as `{"selectedOptionIds": [..]}` or `{"text": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Choice {
        #[serde(rename = "selectedOptionIds")]
        selected_option_ids: Vec<OptionId>,
    },
    Text {
        text: String,
    },
}

impl AnswerPayload {
    #[must_use]
    pub fn choice(options: impl IntoIterator<Item = OptionId>) -> Self {
        Self::Choice {
            selected_option_ids: options.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// An empty payload means the question counts as unanswered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Choice {
                selected_option_ids,
            } => selected_option_ids.is_empty(),
            Self::Text { text } => text.trim().is_empty(),
        }
    }
}

/// Raw user input for a question, before it is checked against the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerDraft {
    Options(Vec<OptionId>),
    Text(String),
}

impl AnswerDraft {
    /// Validate the draft against the question it answers.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` if the draft does not fit the question's kind, references
    /// unknown or repeated options, or exceeds the free-text limit.
    pub fn validate(self, question: &Question) -> Result<AnswerPayload, AnswerError> {
        match (question.kind(), self) {
            (QuestionKind::SingleChoice | QuestionKind::MultipleChoice, Self::Options(options)) => {
                for (idx, option) in options.iter().enumerate() {
                    if options[..idx].contains(option) {
                        return Err(AnswerError::DuplicateOption { option: *option });
                    }
                    if !question.has_option(*option) {
                        return Err(AnswerError::UnknownOption {
                            question: question.id(),
                            option: *option,
                        });
                    }
                }
                if question.kind() == QuestionKind::SingleChoice && options.len() > 1 {
                    return Err(AnswerError::TooManySelections {
                        question: question.id(),
                        count: options.len(),
                    });
                }
                Ok(AnswerPayload::choice(options))
            }
            (QuestionKind::FreeText, Self::Text(text)) => {
                let len = text.chars().count();
                if len > MAX_TEXT_ANSWER_CHARS {
                    return Err(AnswerError::TextTooLong {
                        len,
                        max: MAX_TEXT_ANSWER_CHARS,
                    });
                }
                Ok(AnswerPayload::text(text))
            }
            (expected, _) => Err(AnswerError::KindMismatch {
                question: question.id(),
                expected,
            }),
        }
    }
}
