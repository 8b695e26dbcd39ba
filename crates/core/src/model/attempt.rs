use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::{AttemptId, TestId};

/// Lifecycle status of an attempt as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Starting,
    Active,
    Submitting,
    Completed,
    Expired,
    Error,
}

/// Failure taxonomy shared by the engine and its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout or 5xx; retried locally before it is surfaced.
    Transient,
    /// Malformed answer payload, rejected before any network call.
    Validation,
    /// The server no longer knows the attempt.
    SessionInvalid,
    /// The final submission failed; the attempt can be submitted again.
    Submission,
    /// Anything the user cannot recover from in place.
    Fatal,
}

/// What started a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitTrigger {
    User,
    Expiry,
}

/// Final score reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptScore {
    pub score: f64,
    pub total_score: f64,
}

/// Identity and cursor of a running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt_id: AttemptId,
    pub test_id: TestId,
    pub total_questions: u32,
    /// Current question ordinal, always within `1..=total_questions`.
    pub cursor: u32,
}

impl AttemptContext {
    #[must_use]
    pub fn new(attempt_id: AttemptId, test_id: TestId, total_questions: u32) -> Self {
        Self {
            attempt_id,
            test_id,
            total_questions,
            cursor: 1,
        }
    }

    #[must_use]
    pub fn contains(&self, ordinal: u32) -> bool {
        (1..=self.total_questions).contains(&ordinal)
    }
}

/// A finalized attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedAttempt {
    pub attempt_id: AttemptId,
    pub test_id: TestId,
    pub total_questions: u32,
    /// `None` when the attempt was finalized elsewhere and no score was returned to us.
    pub score: Option<AttemptScore>,
}

/// The attempt session state machine.
///
/// `Idle → Starting → Active → Submitting → {Completed | Expired | Error}`.
/// Every legal move is listed in [`AttemptState::apply`]; everything else is a
/// [`TransitionError`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttemptState {
    #[default]
    Idle,
    Starting {
        test_id: TestId,
    },
    Active(AttemptContext),
    Submitting {
        attempt: AttemptContext,
        trigger: SubmitTrigger,
    },
    Completed(FinishedAttempt),
    Expired(FinishedAttempt),
    Error {
        test_id: Option<TestId>,
        /// Kept when the attempt is still resumable, so submission can be retried.
        attempt: Option<AttemptContext>,
        kind: ErrorKind,
    },
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEvent {
    /// `start(test)` accepted; a pointer lookup or network start follows.
    Begin { test_id: TestId },
    /// The server confirmed a new or resumed attempt.
    Activated(AttemptContext),
    /// The question cursor moved.
    Moved { cursor: u32 },
    SubmitRequested(SubmitTrigger),
    /// The server accepted the submission.
    Submitted { score: Option<AttemptScore> },
    /// The server reports the attempt as already finalized.
    FinishedRemotely {
        attempt_id: AttemptId,
        total_questions: u32,
    },
    Failed(ErrorKind),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot apply {event} while {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

impl AttemptState {
    /// Compute the state that follows `event`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` for any move that is not in the transition table.
    pub fn apply(&self, event: AttemptEvent) -> Result<AttemptState, TransitionError> {
        use AttemptEvent as E;
        use AttemptState as S;

        let next = match (self, event) {
            (S::Idle | S::Completed(_) | S::Expired(_) | S::Error { .. }, E::Begin { test_id }) => {
                S::Starting { test_id }
            }

            (S::Starting { test_id }, E::Activated(ctx)) if ctx.test_id == *test_id => {
                S::Active(ctx)
            }

            (S::Active(ctx), E::Moved { cursor }) if ctx.contains(cursor) => {
                S::Active(AttemptContext {
                    cursor,
                    ..ctx.clone()
                })
            }

            (S::Active(ctx), E::SubmitRequested(trigger)) => S::Submitting {
                attempt: ctx.clone(),
                trigger,
            },
            (
                S::Error {
                    attempt: Some(ctx),
                    kind: ErrorKind::Submission | ErrorKind::Transient,
                    ..
                },
                E::SubmitRequested(trigger),
            ) => S::Submitting {
                attempt: ctx.clone(),
                trigger,
            },

            (S::Submitting { attempt, trigger }, E::Submitted { score }) => {
                let finished = FinishedAttempt {
                    attempt_id: attempt.attempt_id.clone(),
                    test_id: attempt.test_id,
                    total_questions: attempt.total_questions,
                    score,
                };
                match trigger {
                    SubmitTrigger::User => S::Completed(finished),
                    SubmitTrigger::Expiry => S::Expired(finished),
                }
            }

            (
                S::Starting { test_id },
                E::FinishedRemotely {
                    attempt_id,
                    total_questions,
                },
            ) => S::Completed(FinishedAttempt {
                attempt_id,
                test_id: *test_id,
                total_questions,
                score: None,
            }),
            (S::Active(ctx), E::FinishedRemotely { attempt_id, .. })
                if ctx.attempt_id == attempt_id =>
            {
                S::Completed(FinishedAttempt {
                    attempt_id,
                    test_id: ctx.test_id,
                    total_questions: ctx.total_questions,
                    score: None,
                })
            }

            (S::Starting { test_id }, E::Failed(kind)) => S::Error {
                test_id: Some(*test_id),
                attempt: None,
                kind,
            },
            (S::Active(ctx) | S::Submitting { attempt: ctx, .. }, E::Failed(kind)) => {
                let resumable = !matches!(kind, ErrorKind::SessionInvalid | ErrorKind::Fatal);
                S::Error {
                    test_id: Some(ctx.test_id),
                    attempt: resumable.then(|| ctx.clone()),
                    kind,
                }
            }

            (state, event) => {
                return Err(TransitionError {
                    state: state.name(),
                    event: event.name(),
                });
            }
        };
        Ok(next)
    }

    /// `None` while idle, since no attempt exists yet.
    #[must_use]
    pub fn status(&self) -> Option<AttemptStatus> {
        match self {
            Self::Idle => None,
            Self::Starting { .. } => Some(AttemptStatus::Starting),
            Self::Active(_) => Some(AttemptStatus::Active),
            Self::Submitting { .. } => Some(AttemptStatus::Submitting),
            Self::Completed(_) => Some(AttemptStatus::Completed),
            Self::Expired(_) => Some(AttemptStatus::Expired),
            Self::Error { .. } => Some(AttemptStatus::Error),
        }
    }

    /// Terminal states stop all timers and background saves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed(_) | Self::Expired(_) | Self::Error { .. }
        )
    }

    /// Only an active attempt accepts answer edits and saves.
    #[must_use]
    pub fn accepts_answers(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    #[must_use]
    pub fn active(&self) -> Option<&AttemptContext> {
        match self {
            Self::Active(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Attempt context for any state that still refers to a live attempt.
    #[must_use]
    pub fn context(&self) -> Option<&AttemptContext> {
        match self {
            Self::Active(ctx) | Self::Submitting { attempt: ctx, .. } => Some(ctx),
            Self::Error { attempt, .. } => attempt.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn test_id(&self) -> Option<TestId> {
        match self {
            Self::Idle => None,
            Self::Starting { test_id } => Some(*test_id),
            Self::Active(ctx) | Self::Submitting { attempt: ctx, .. } => Some(ctx.test_id),
            Self::Completed(done) | Self::Expired(done) => Some(done.test_id),
            Self::Error { test_id, .. } => *test_id,
        }
    }

    #[must_use]
    pub fn attempt_id(&self) -> Option<&AttemptId> {
        match self {
            Self::Completed(done) | Self::Expired(done) => Some(&done.attempt_id),
            other => other.context().map(|ctx| &ctx.attempt_id),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting { .. } => "starting",
            Self::Active(_) => "active",
            Self::Submitting { .. } => "submitting",
            Self::Completed(_) => "completed",
            Self::Expired(_) => "expired",
            Self::Error { .. } => "error",
        }
    }
}

impl AttemptEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::Activated(_) => "activated",
            Self::Moved { .. } => "moved",
            Self::SubmitRequested(_) => "submit-requested",
            Self::Submitted { .. } => "submitted",
            Self::FinishedRemotely { .. } => "finished-remotely",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Submitting => "SUBMITTING",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Snapshot of the running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub id: AttemptId,
    pub test_id: TestId,
    pub status: AttemptStatus,
    pub total_questions: u32,
    /// Remaining time as last known from the server, ticked down locally.
    pub remaining_seconds: u32,
}
