use thiserror::Error;

use crate::model::{AnswerError, ParseIdError, QuestionError, TransitionError};

/// Any domain-level failure raised by this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
