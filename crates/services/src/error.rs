//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{AnswerError, ErrorKind, QuestionId, TransitionError};

/// Failures returned by a `RemoteGateway` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("attempt is unknown or no longer valid")]
    SessionInvalid,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("request aborted")]
    Aborted,
}

impl GatewayError {
    /// Transient failures are retried with backoff and never mean expiry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_) | Self::Server { .. })
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout | Self::Network(_) | Self::Server { .. } | Self::Aborted => {
                ErrorKind::Transient
            }
            Self::SessionInvalid => ErrorKind::SessionInvalid,
            Self::Rejected(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::Conflict(_) | Self::Protocol(_) => ErrorKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors returned by the attempt controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("question {ordinal} is outside 1..={total}")]
    OutOfRange { ordinal: u32, total: u32 },
    #[error("answers can no longer be changed")]
    Locked,
    #[error("answer to question {question} is still unsaved")]
    Unsaved { question: QuestionId },
    #[error("connection problem: {0}")]
    Transient(#[source] GatewayError),
    #[error("the exam session is no longer valid")]
    SessionInvalid,
    #[error("submission failed: {0}")]
    Submission(#[source] GatewayError),
    #[error("unexpected failure: {0}")]
    Fatal(#[source] GatewayError),
}

impl SessionError {
    /// Classify a gateway failure outside of the submission path.
    #[must_use]
    pub fn from_gateway(err: GatewayError) -> Self {
        match err.kind() {
            ErrorKind::Transient => Self::Transient(err),
            ErrorKind::SessionInvalid => Self::SessionInvalid,
            ErrorKind::Validation | ErrorKind::Submission | ErrorKind::Fatal => Self::Fatal(err),
        }
    }

    /// Classify a gateway failure raised while submitting.
    #[must_use]
    pub fn from_submission(err: GatewayError) -> Self {
        match err.kind() {
            ErrorKind::SessionInvalid => Self::SessionInvalid,
            _ => Self::Submission(err),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Answer(_) | Self::Transition(_) | Self::OutOfRange { .. } | Self::Locked => {
                ErrorKind::Validation
            }
            Self::Unsaved { .. } | Self::Transient(_) => ErrorKind::Transient,
            Self::SessionInvalid => ErrorKind::SessionInvalid,
            Self::Submission(_) => ErrorKind::Submission,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// The single user-facing notification for this error.
    #[must_use]
    pub fn notice(&self) -> Notice {
        match self.kind() {
            ErrorKind::Validation => Notice::new(NoticeLevel::Warning, self.to_string(), NoticeAction::Dismiss),
            ErrorKind::Transient => Notice::new(
                NoticeLevel::Warning,
                "Connection problem. Your answers are kept and will be saved when the connection returns.",
                NoticeAction::Retry,
            ),
            ErrorKind::SessionInvalid => Notice::new(
                NoticeLevel::Error,
                "This exam session is no longer valid. Please start the test again.",
                NoticeAction::RestartFromConfirmation,
            ),
            ErrorKind::Submission => Notice::new(
                NoticeLevel::Error,
                "Submitting your answers failed. Please try again.",
                NoticeAction::Retry,
            ),
            ErrorKind::Fatal => Notice::new(
                NoticeLevel::Error,
                format!("The exam could not be loaded ({self})."),
                NoticeAction::ReturnToDashboard,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// What the UI should offer next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeAction {
    Dismiss,
    Retry,
    RestartFromConfirmation,
    ReturnToDashboard,
    ShowResults,
}

/// A user-visible notification. Presentation (toast, banner) is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub action: NoticeAction,
}

impl Notice {
    #[must_use]
    pub fn new(level: NoticeLevel, message: impl Into<String>, action: NoticeAction) -> Self {
        Self {
            level,
            message: message.into(),
            action,
        }
    }
}

/// Errors emitted while building the engine configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("API base URL is missing")]
    MissingBaseUrl,
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("invalid value for {field}: {raw}")]
    InvalidNumber { field: &'static str, raw: String },
}
