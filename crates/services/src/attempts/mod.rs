//! The attempt session: answer cache, autosave, countdown, submission, and the
//! controller that drives them.

pub mod answers;
pub mod autosave;
pub mod controller;
pub mod retry;
pub mod submission;
pub mod timer;

pub use answers::{AnswerCache, CachedAnswer, PendingSave, SaveAck};
pub use autosave::{AutosavePolicy, FlushOutcome, FlushReason};
pub use controller::{AttemptController, ControllerOptions, SubmitOutcome};
pub use retry::RetryPolicy;
pub use submission::{
    SubmissionCoordinator, SubmissionGuard, SubmissionLock, SubmissionOutcome, SubmissionReceipt,
};
pub use timer::{Countdown, Tick, Timer, TimerListener, TimerService, TokioTimer};
