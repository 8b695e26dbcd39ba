mod answer;
mod attempt;
mod ids;
mod progress;
mod question;

pub use ids::{AttemptId, OptionId, ParseIdError, QuestionId, TestId};

pub use answer::{AnswerDraft, AnswerError, AnswerPayload, MAX_TEXT_ANSWER_CHARS};
pub use attempt::{
    Attempt, AttemptContext, AttemptEvent, AttemptScore, AttemptState, AttemptStatus, ErrorKind,
    FinishedAttempt, SubmitTrigger, TransitionError,
};
pub use progress::AnsweredQuestions;
pub use question::{Question, QuestionDraft, QuestionError, QuestionKind, QuestionOption};
