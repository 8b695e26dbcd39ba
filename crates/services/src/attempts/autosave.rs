use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;

use exam_core::model::{AttemptId, QuestionId};

use crate::attempts::answers::{AnswerCache, SaveAck};
use crate::attempts::retry::RetryPolicy;
use crate::attempts::timer::Timer;
use crate::error::GatewayError;
use crate::gateway::RemoteGateway;

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Navigation,
    Idle,
    Submission,
    Explicit,
}

impl FlushReason {
    fn label(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Idle => "idle",
            Self::Submission => "submission",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was dirty.
    Clean,
    /// The latest revision is now confirmed.
    Saved { saved_at: DateTime<Utc> },
    /// Saved, but the user edited again meanwhile; still dirty.
    Superseded,
}

/// Decides when dirty answers are pushed to the backend and does the pushing.
///
/// Saves run one at a time, so an older save can never land after a newer one
/// for the same question.
pub struct AutosavePolicy {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<AnswerCache>,
    timer: Arc<dyn Timer>,
    retry: RetryPolicy,
    save_gate: AsyncMutex<()>,
}

impl AutosavePolicy {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<AnswerCache>,
        timer: Arc<dyn Timer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            cache,
            timer,
            retry,
            save_gate: AsyncMutex::new(()),
        }
    }

    /// Save the current revision of one answer, with retries.
    ///
    /// # Errors
    ///
    /// Returns the `GatewayError` left after retries; the answer stays dirty.
    pub async fn flush(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
        reason: FlushReason,
        cancel: &CancellationToken,
    ) -> Result<FlushOutcome, GatewayError> {
        let _serial = self.save_gate.lock().await;
        let Some(pending) = self.cache.pending(question_id) else {
            return Ok(FlushOutcome::Clean);
        };

        let receipt = self
            .retry
            .run("save_answer", self.timer.as_ref(), cancel, || {
                self.gateway
                    .save_answer(attempt_id, question_id, &pending.payload)
            })
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    attempt_id = %attempt_id,
                    question_id = %question_id,
                    reason = reason.label(),
                    error = %err,
                    "answer save failed; kept dirty"
                );
            })?;

        let ack = self
            .cache
            .mark_saved(question_id, pending.revision, receipt.saved_at);
        tracing::debug!(
            attempt_id = %attempt_id,
            question_id = %question_id,
            revision = pending.revision,
            reason = reason.label(),
            ?ack,
            "answer saved"
        );
        Ok(match ack {
            SaveAck::Clean => FlushOutcome::Saved {
                saved_at: receipt.saved_at,
            },
            SaveAck::Superseded => FlushOutcome::Superseded,
            SaveAck::Stale | SaveAck::Unknown => FlushOutcome::Clean,
        })
    }

    /// Flush until the answer is clean, following edits made while saving.
    ///
    /// # Errors
    ///
    /// Returns the first `GatewayError` that survives retries.
    pub async fn flush_until_clean(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
        reason: FlushReason,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        loop {
            match self.flush(attempt_id, question_id, reason, cancel).await? {
                FlushOutcome::Superseded => continue,
                FlushOutcome::Clean | FlushOutcome::Saved { .. } => return Ok(()),
            }
        }
    }

    /// Flush every dirty answer. Used before submission.
    ///
    /// # Errors
    ///
    /// Returns the failing question together with its `GatewayError`.
    pub async fn flush_all(
        &self,
        attempt_id: &AttemptId,
        cancel: &CancellationToken,
    ) -> Result<(), (QuestionId, GatewayError)> {
        for question_id in self.cache.dirty_questions() {
            self.flush_until_clean(attempt_id, question_id, FlushReason::Submission, cancel)
                .await
                .map_err(|err| (question_id, err))?;
        }
        Ok(())
    }

    /// Save the current question when it sat dirty and unchanged for one full
    /// `period`. Runs until `cancel` fires.
    pub async fn run_idle(
        self: Arc<Self>,
        attempt_id: AttemptId,
        current: watch::Receiver<Option<QuestionId>>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut seen: Option<(QuestionId, u64)> = None;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = self.timer.sleep(period) => {}
            }

            let Some(question_id) = *current.borrow() else {
                seen = None;
                continue;
            };
            let observed = self
                .cache
                .pending(question_id)
                .map(|pending| (question_id, pending.revision));
            let unchanged = observed.is_some() && observed == seen;
            seen = observed;
            if !unchanged {
                continue;
            }

            if let Err(err) = self
                .flush(&attempt_id, question_id, FlushReason::Idle, &cancel)
                .await
            {
                if matches!(err, GatewayError::Aborted) {
                    return;
                }
                // the next idle round retries
                seen = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempts::timer::TokioTimer;
    use crate::gateway::{GatewayCall, GatewayOp, InMemoryGateway, TestFixture};
    use exam_core::model::{AnswerPayload, OptionId, TestId};

    async fn setup() -> (InMemoryGateway, Arc<AnswerCache>, Arc<AutosavePolicy>, AttemptId) {
        let gateway = InMemoryGateway::new()
            .with_fixture(TestFixture::single_choice(TestId::new(42), 3, 1800).unwrap());
        let started = gateway.start_attempt(TestId::new(42)).await.unwrap();
        let cache = Arc::new(AnswerCache::new());
        let policy = Arc::new(AutosavePolicy::new(
            Arc::new(gateway.clone()),
            Arc::clone(&cache),
            Arc::new(TokioTimer),
            RetryPolicy::default(),
        ));
        (gateway, cache, policy, started.attempt_id)
    }

    fn pick(option: u64) -> AnswerPayload {
        AnswerPayload::choice([OptionId::new(option)])
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_saves_and_cleans() {
        let (gateway, cache, policy, attempt) = setup().await;
        let q = QuestionId::new(1);
        cache.set(q, pick(5)).unwrap();

        let outcome = policy
            .flush(&attempt, q, FlushReason::Explicit, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, FlushOutcome::Saved { .. }));
        assert!(!cache.is_dirty(q));
        assert_eq!(cache.get(q).unwrap().payload, pick(5));
        assert_eq!(gateway.saved_answer(&attempt, q), Some(pick(5)));

        // clean answers are not re-sent
        let again = policy
            .flush(&attempt, q, FlushReason::Explicit, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, FlushOutcome::Clean);
        assert_eq!(gateway.count(GatewayOp::SaveAnswer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_answer_dirty() {
        let (gateway, cache, policy, attempt) = setup().await;
        let q = QuestionId::new(2);
        cache.set(q, pick(1)).unwrap();
        gateway.fail_next(GatewayOp::SaveAnswer, GatewayError::Timeout, 3);

        let err = policy
            .flush(&attempt, q, FlushReason::Navigation, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
        assert!(cache.is_dirty(q));
        assert_eq!(gateway.count(GatewayOp::SaveAnswer), 3);

        // a later flush still has the answer
        policy
            .flush_until_clean(&attempt, q, FlushReason::Explicit, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(gateway.saved_answer(&attempt, q), Some(pick(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_loop_saves_an_unchanged_dirty_answer() {
        let (gateway, cache, policy, attempt) = setup().await;
        let q = QuestionId::new(1);
        let (_current_tx, current) = watch::channel(Some(q));
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&policy).run_idle(
            attempt.clone(),
            current,
            Duration::from_secs(5),
            cancel.clone(),
        ));

        cache.set(q, pick(3)).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        // first round only observes the edit
        assert_eq!(gateway.count(GatewayOp::SaveAnswer), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!cache.is_dirty(q));
        let saves: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter(|call| call.op() == GatewayOp::SaveAnswer)
            .collect();
        assert_eq!(
            saves,
            vec![GatewayCall::SaveAnswer {
                attempt_id: attempt.clone(),
                question_id: q,
                payload: pick(3),
            }]
        );
        cancel.cancel();
    }
}
