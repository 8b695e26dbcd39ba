use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use exam_core::model::{AttemptContext, AttemptScore};
use storage::AttemptStore;

use crate::attempts::autosave::AutosavePolicy;
use crate::attempts::retry::RetryPolicy;
use crate::attempts::timer::Timer;
use crate::error::{GatewayError, SessionError};
use crate::gateway::RemoteGateway;

/// Single-shot guard for the network submission call.
#[derive(Debug, Default)]
pub struct SubmissionLock {
    held: AtomicBool,
}

impl SubmissionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` if a submission is already in flight.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SubmissionGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SubmissionGuard { lock: self })
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the submission lock on drop, on success and failure alike.
#[derive(Debug)]
pub struct SubmissionGuard<'a> {
    lock: &'a SubmissionLock,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// What a finished submission returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmissionReceipt {
    /// `None` when the attempt had already been finalized elsewhere.
    pub score: Option<AttemptScore>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmissionOutcome {
    Finalized(SubmissionReceipt),
    /// Another submission holds the lock; nothing was sent.
    InFlight,
}

/// Flush, then submit exactly once, then drop the resume pointer.
pub struct SubmissionCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn AttemptStore>,
    autosave: Arc<AutosavePolicy>,
    timer: Arc<dyn Timer>,
    retry: RetryPolicy,
    lock: SubmissionLock,
}

impl SubmissionCoordinator {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn AttemptStore>,
        autosave: Arc<AutosavePolicy>,
        timer: Arc<dyn Timer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            autosave,
            timer,
            retry,
            lock: SubmissionLock::new(),
        }
    }

    /// Finalize the attempt.
    ///
    /// The resume pointer is cleared only after the server accepted the
    /// submission; on any failure it stays so the attempt can be resumed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Unsaved` if a dirty answer could not be flushed,
    /// `SessionError::SessionInvalid` if the server no longer knows the attempt,
    /// and `SessionError::Submission` for any other failed submission.
    pub async fn submit(
        &self,
        attempt: &AttemptContext,
        cancel: &CancellationToken,
    ) -> Result<SubmissionOutcome, SessionError> {
        let attempt_id = &attempt.attempt_id;

        self.autosave
            .flush_all(attempt_id, cancel)
            .await
            .map_err(|(question, err)| match err {
                GatewayError::SessionInvalid => SessionError::SessionInvalid,
                _ => SessionError::Unsaved { question },
            })?;

        let Some(_guard) = self.lock.try_acquire() else {
            tracing::debug!(attempt_id = %attempt_id, "submission already in flight");
            return Ok(SubmissionOutcome::InFlight);
        };

        let sent = self
            .retry
            .single_attempt()
            .run("submit", self.timer.as_ref(), cancel, || {
                self.gateway.submit(attempt_id)
            })
            .await;
        let score = match sent {
            Ok(result) => Some(result.score()),
            Err(GatewayError::Conflict(reason)) => {
                self.confirm_finalized(attempt, cancel, reason).await?;
                None
            }
            Err(err) => {
                tracing::warn!(attempt_id = %attempt_id, error = %err, "submission failed");
                return Err(SessionError::from_submission(err));
            }
        };

        if let Err(err) = self.store.clear(attempt.test_id).await {
            tracing::warn!(test_id = %attempt.test_id, error = %err, "failed to clear attempt pointer");
        }
        tracing::info!(attempt_id = %attempt_id, ?score, "attempt submitted");
        Ok(SubmissionOutcome::Finalized(SubmissionReceipt { score }))
    }

    /// After a conflict, check whether the server already finalized the attempt.
    async fn confirm_finalized(
        &self,
        attempt: &AttemptContext,
        cancel: &CancellationToken,
        reason: String,
    ) -> Result<(), SessionError> {
        let attempt_id = &attempt.attempt_id;
        let report = self
            .retry
            .run("get_status", self.timer.as_ref(), cancel, || {
                self.gateway.get_status(attempt_id)
            })
            .await
            .map_err(SessionError::from_submission)?;
        if report.is_finished() {
            tracing::info!(attempt_id = %attempt_id, "attempt was already finalized on the server");
            Ok(())
        } else {
            Err(SessionError::Submission(GatewayError::Conflict(reason)))
        }
    }
}
