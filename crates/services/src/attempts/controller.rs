use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;

use exam_core::model::{
    AnswerDraft, AnsweredQuestions, Attempt, AttemptContext, AttemptEvent, AttemptId,
    AttemptState, AttemptStatus, ErrorKind, FinishedAttempt, Question, QuestionId, SubmitTrigger,
    TestId, TransitionError,
};
use storage::AttemptStore;

use crate::attempts::answers::{AnswerCache, CachedAnswer};
use crate::attempts::autosave::{AutosavePolicy, FlushReason};
use crate::attempts::retry::RetryPolicy;
use crate::attempts::submission::{SubmissionCoordinator, SubmissionOutcome};
use crate::attempts::timer::{Timer, TimerListener, TimerService, TokioTimer};
use crate::config::{EngineConfig, SessionTimings};
use crate::error::{GatewayError, Notice, NoticeAction, NoticeLevel, SessionError};
use crate::gateway::{QuestionEnvelope, RemoteGateway};
use crate::sync::lock;

/// Tunables of one controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    pub timings: SessionTimings,
    pub retry: RetryPolicy,
}

impl From<&EngineConfig> for ControllerOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timings: config.timings,
            retry: config.retry,
        }
    }
}

/// Result of `submit` or `expire`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// This call finalized the attempt.
    Submitted(FinishedAttempt),
    /// Another submission is in flight; this call did nothing.
    AlreadySubmitting,
    /// The attempt was already finalized.
    AlreadyFinished(FinishedAttempt),
}

/// Runs one exam session: start or resume, answer, navigate, expire, submit.
///
/// Dropping the controller cancels its timers and in-flight background saves
/// but keeps the resume pointer, so a new controller over the same store
/// picks the attempt up again.
pub struct AttemptController {
    inner: Arc<Inner>,
}

struct Inner {
    me: Weak<Inner>,
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn AttemptStore>,
    timer: Arc<dyn Timer>,
    options: ControllerOptions,
    state: Mutex<AttemptState>,
    cache: Arc<AnswerCache>,
    /// Attempt the cache entries belong to.
    cached_attempt: Mutex<Option<AttemptId>>,
    autosave: Arc<AutosavePolicy>,
    countdown: TimerService,
    submission: SubmissionCoordinator,
    /// Questions fetched in this session, by ordinal.
    questions: Mutex<HashMap<u32, Question>>,
    current: watch::Sender<Option<QuestionId>>,
    notice: Mutex<Option<Notice>>,
    server_answered: Mutex<Option<u32>>,
    start_gate: AsyncMutex<()>,
    shutdown: CancellationToken,
    /// Cancelled on every terminal transition and on re-activation.
    activity: Mutex<CancellationToken>,
}

impl AttemptController {
    /// Controller on `tokio::time`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn AttemptStore>,
        options: ControllerOptions,
    ) -> Self {
        Self::with_timer(gateway, store, options, Arc::new(TokioTimer))
    }

    #[must_use]
    pub fn with_timer(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn AttemptStore>,
        options: ControllerOptions,
        timer: Arc<dyn Timer>,
    ) -> Self {
        let cache = Arc::new(AnswerCache::new());
        let autosave = Arc::new(AutosavePolicy::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            Arc::clone(&timer),
            options.retry,
        ));
        let submission = SubmissionCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&autosave),
            Arc::clone(&timer),
            options.retry,
        );
        let countdown = TimerService::new(Arc::clone(&timer), options.timings);
        let (current, _) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let activity = shutdown.child_token();

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            gateway,
            store,
            timer,
            options,
            state: Mutex::new(AttemptState::Idle),
            cache,
            cached_attempt: Mutex::new(None),
            autosave,
            countdown,
            submission,
            questions: Mutex::new(HashMap::new()),
            current,
            notice: Mutex::new(None),
            server_answered: Mutex::new(None),
            start_gate: AsyncMutex::new(()),
            shutdown,
            activity: Mutex::new(activity),
        });
        Self { inner }
    }

    /// Start `test_id`, or resume the attempt the store points to.
    ///
    /// Concurrent and repeated calls for the same test end up on the same
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when the backend refuses or cannot be reached; the
    /// controller is then in `Error` and nothing was written to the store.
    pub async fn start(&self, test_id: TestId) -> Result<AttemptState, SessionError> {
        self.inner.start(test_id).await
    }

    /// Reconnect to a known attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionInvalid` (and purges the pointer) when the
    /// server no longer knows the attempt, or a transient/fatal error.
    pub async fn resume(
        &self,
        test_id: TestId,
        attempt_id: AttemptId,
    ) -> Result<AttemptState, SessionError> {
        let _gate = self.inner.start_gate.lock().await;
        self.inner.resume_locked(test_id, attempt_id).await
    }

    /// Move the cursor, saving the current answer first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::OutOfRange` for ordinals outside the attempt and
    /// `SessionError::Unsaved` when the current answer could not be saved; the
    /// cursor does not move in either case.
    pub async fn navigate_to(&self, ordinal: u32) -> Result<Question, SessionError> {
        self.inner.navigate_to(ordinal).await
    }

    /// Record an answer for the current question. No network call is made.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Answer` for invalid drafts and
    /// `SessionError::Locked` when the attempt no longer accepts answers.
    pub fn answer(&self, draft: AnswerDraft) -> Result<(), SessionError> {
        self.inner.answer(draft)
    }

    /// Save the current question now.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Unsaved` when the save failed after retries.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.inner.flush().await
    }

    /// Flush every dirty answer and finalize the attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when the submission failed; the controller is then
    /// in `Error`, the store still points to the attempt and `submit` may be
    /// called again.
    pub async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.inner.submit_with(SubmitTrigger::User).await
    }

    /// Countdown reached zero. A no-op once a submission started.
    ///
    /// # Errors
    ///
    /// Same as [`AttemptController::submit`].
    pub async fn expire(&self) -> Result<SubmitOutcome, SessionError> {
        self.inner.expire().await
    }

    /// Stop timers and background saves. The resume pointer is kept.
    pub fn teardown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::debug!("attempt controller torn down");
        }
        self.inner.shutdown.cancel();
    }

    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.inner.snapshot()
    }

    /// The running (or last) attempt, `None` while idle or starting.
    #[must_use]
    pub fn attempt(&self) -> Option<Attempt> {
        let state = self.inner.snapshot();
        let status = state.status()?;
        let (id, test_id, total_questions) = match &state {
            AttemptState::Completed(done) | AttemptState::Expired(done) => {
                (done.attempt_id.clone(), done.test_id, done.total_questions)
            }
            other => {
                let ctx = other.context()?;
                (ctx.attempt_id.clone(), ctx.test_id, ctx.total_questions)
            }
        };
        let remaining_seconds = match status {
            AttemptStatus::Completed | AttemptStatus::Expired => 0,
            _ => self.inner.countdown.remaining().unwrap_or(0),
        };
        Some(Attempt {
            id,
            test_id,
            status,
            total_questions,
            remaining_seconds,
        })
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.inner.countdown.remaining()
    }

    /// Countdown updates for a UI clock.
    #[must_use]
    pub fn remaining_watch(&self) -> watch::Receiver<Option<u32>> {
        self.inner.countdown.subscribe()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<Question> {
        let cursor = self.inner.snapshot().context()?.cursor;
        self.inner.question_at(cursor)
    }

    #[must_use]
    pub fn cached_answer(&self, question_id: QuestionId) -> Option<CachedAnswer> {
        self.inner.cache.get(question_id)
    }

    /// Answered flags for every ordinal; unvisited questions count as unanswered.
    #[must_use]
    pub fn answered_questions(&self) -> AnsweredQuestions {
        let total = match self.inner.snapshot() {
            AttemptState::Completed(done) | AttemptState::Expired(done) => done.total_questions,
            other => other.context().map_or(0, |ctx| ctx.total_questions),
        };
        let ids: HashMap<u32, QuestionId> = lock(&self.inner.questions)
            .iter()
            .map(|(ordinal, question)| (*ordinal, question.id()))
            .collect();
        AnsweredQuestions::derive(total, |ordinal| {
            ids.get(&ordinal)
                .is_some_and(|id| self.inner.cache.is_answered(*id))
        })
    }

    /// `answeredCount` from the latest status report.
    #[must_use]
    pub fn server_answered_count(&self) -> Option<u32> {
        *lock(&self.inner.server_answered)
    }

    #[must_use]
    pub fn last_notice(&self) -> Option<Notice> {
        lock(&self.inner.notice).clone()
    }
}

impl Drop for AttemptController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Inner {
    fn snapshot(&self) -> AttemptState {
        lock(&self.state).clone()
    }

    fn transition(&self, event: AttemptEvent) -> Result<AttemptState, SessionError> {
        let event_name = event.name();
        let next = {
            let mut state = lock(&self.state);
            let next = state.apply(event)?;
            *state = next.clone();
            next
        };
        tracing::debug!(
            event = event_name,
            state = next.name(),
            attempt_id = ?next.attempt_id(),
            "attempt transition"
        );
        if matches!(next, AttemptState::Completed(_) | AttemptState::Expired(_)) {
            self.cache.seal();
        }
        if next.is_terminal() {
            lock(&self.activity).cancel();
        }
        Ok(next)
    }

    fn activity(&self) -> CancellationToken {
        lock(&self.activity).clone()
    }

    fn renew_activity(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        let previous = std::mem::replace(&mut *lock(&self.activity), token.clone());
        previous.cancel();
        token
    }

    fn notify(&self, notice: Notice) {
        *lock(&self.notice) = Some(notice);
    }

    fn question_at(&self, ordinal: u32) -> Option<Question> {
        lock(&self.questions).get(&ordinal).cloned()
    }

    fn question_id_at(&self, ordinal: u32) -> Option<QuestionId> {
        lock(&self.questions).get(&ordinal).map(Question::id)
    }

    async fn pointer(&self, test_id: TestId) -> Option<AttemptId> {
        match self.store.get(test_id).await {
            Ok(pointer) => pointer,
            Err(err) => {
                tracing::warn!(test_id = %test_id, error = %err, "failed to read attempt pointer");
                None
            }
        }
    }

    async fn remember(&self, test_id: TestId, attempt_id: &AttemptId) {
        if let Err(err) = self.store.set(test_id, attempt_id).await {
            tracing::warn!(test_id = %test_id, attempt_id = %attempt_id, error = %err, "failed to store attempt pointer");
        }
    }

    async fn forget(&self, test_id: TestId) {
        if let Err(err) = self.store.clear(test_id).await {
            tracing::warn!(test_id = %test_id, error = %err, "failed to clear attempt pointer");
        }
    }

    /// Move to `Error`, purging the pointer when the session is gone.
    async fn abort_with(&self, err: SessionError) -> SessionError {
        let kind = err.kind();
        match kind {
            ErrorKind::SessionInvalid => {
                if let Some(test_id) = self.snapshot().test_id() {
                    self.forget(test_id).await;
                }
                tracing::error!(error = %err, "attempt is no longer valid; pointer purged");
            }
            ErrorKind::Fatal => tracing::error!(error = %err, "attempt failed"),
            _ => tracing::warn!(error = %err, "attempt operation failed"),
        }
        if let Err(ignored) = self.transition(AttemptEvent::Failed(kind)) {
            tracing::debug!(error = %ignored, "failure left state unchanged");
        }
        self.notify(err.notice());
        err
    }

    /// Surface an error without leaving `Active`, unless the session is gone.
    async fn soft_failure(&self, cause: GatewayError, err: SessionError) -> SessionError {
        if cause == GatewayError::SessionInvalid {
            return self.abort_with(SessionError::SessionInvalid).await;
        }
        tracing::warn!(error = %err, "attempt operation failed; state kept");
        self.notify(err.notice());
        err
    }

    async fn start(&self, test_id: TestId) -> Result<AttemptState, SessionError> {
        let _gate = self.start_gate.lock().await;

        let current = self.snapshot();
        if let AttemptState::Active(ctx) | AttemptState::Submitting { attempt: ctx, .. } = &current {
            if ctx.test_id == test_id {
                tracing::debug!(attempt_id = %ctx.attempt_id, "start joined the running attempt");
                return Ok(current);
            }
        }

        if let Some(attempt_id) = self.pointer(test_id).await {
            tracing::info!(test_id = %test_id, attempt_id = %attempt_id, "resuming stored attempt");
            return self.resume_locked(test_id, attempt_id).await;
        }

        self.transition(AttemptEvent::Begin { test_id })?;
        let started = self
            .options
            .retry
            .run("start_attempt", self.timer.as_ref(), &self.shutdown, || {
                self.gateway.start_attempt(test_id)
            })
            .await;
        let started = match started {
            Ok(started) => started,
            Err(err) => return Err(self.abort_with(SessionError::from_gateway(err)).await),
        };
        if started.total_questions == 0 {
            let err = GatewayError::Protocol("attempt has no questions".into());
            return Err(self.abort_with(SessionError::Fatal(err)).await);
        }

        self.remember(test_id, &started.attempt_id).await;
        let ctx = AttemptContext::new(started.attempt_id, test_id, started.total_questions);
        tracing::info!(
            test_id = %test_id,
            attempt_id = %ctx.attempt_id,
            remaining = started.remaining_seconds,
            "attempt started"
        );
        self.activate(ctx, started.remaining_seconds, started.first_question)
    }

    async fn resume_locked(
        &self,
        test_id: TestId,
        attempt_id: AttemptId,
    ) -> Result<AttemptState, SessionError> {
        let known_total = self
            .snapshot()
            .context()
            .filter(|ctx| ctx.attempt_id == attempt_id)
            .map(|ctx| ctx.total_questions);

        self.transition(AttemptEvent::Begin { test_id })?;
        let report = self
            .options
            .retry
            .run("get_status", self.timer.as_ref(), &self.shutdown, || {
                self.gateway.get_status(&attempt_id)
            })
            .await;
        let report = match report {
            Ok(report) => report,
            Err(err) => return Err(self.abort_with(SessionError::from_gateway(err)).await),
        };

        if report.is_finished() {
            self.forget(test_id).await;
            let state = self.transition(AttemptEvent::FinishedRemotely {
                attempt_id: attempt_id.clone(),
                total_questions: report.total_questions.or(known_total).unwrap_or(0),
            })?;
            tracing::info!(attempt_id = %attempt_id, "stored attempt is already finalized");
            self.notify(Notice::new(
                NoticeLevel::Info,
                "This attempt has already been submitted.",
                NoticeAction::ShowResults,
            ));
            return Ok(state);
        }

        let first = self
            .options
            .retry
            .run("get_question", self.timer.as_ref(), &self.shutdown, || {
                self.gateway.get_question(&attempt_id, 1)
            })
            .await;
        let first = match first {
            Ok(first) => first,
            Err(err) => return Err(self.abort_with(SessionError::from_gateway(err)).await),
        };

        let total = report
            .total_questions
            .or(first.total_questions)
            .or(known_total)
            .filter(|total| *total > 0);
        let Some(total) = total else {
            let err = GatewayError::Protocol("total question count is unknown".into());
            return Err(self.abort_with(SessionError::Fatal(err)).await);
        };

        let ctx = AttemptContext::new(attempt_id, test_id, total);
        tracing::info!(
            test_id = %test_id,
            attempt_id = %ctx.attempt_id,
            remaining = report.remaining_seconds,
            "attempt resumed"
        );
        let state = self.activate(ctx, report.remaining_seconds, first)?;
        *lock(&self.server_answered) = Some(report.answered_count);
        Ok(state)
    }

    /// Enter `Active` and spawn the countdown and idle-save loops.
    fn activate(
        &self,
        ctx: AttemptContext,
        remaining: u32,
        first: QuestionEnvelope,
    ) -> Result<AttemptState, SessionError> {
        let token = self.renew_activity();
        let previous = lock(&self.cached_attempt).replace(ctx.attempt_id.clone());
        if previous.as_ref() == Some(&ctx.attempt_id) {
            let kept = self.cache.retain_dirty();
            tracing::debug!(attempt_id = %ctx.attempt_id, kept, "unsaved answers carried over");
        } else {
            self.cache.reset();
        }
        lock(&self.questions).clear();
        *lock(&self.server_answered) = None;

        let question_id = first.question.id();
        self.cache.visit(&first.question, first.saved_answer.as_ref());
        lock(&self.questions).insert(ctx.cursor, first.question);

        let attempt_id = ctx.attempt_id.clone();
        let state = self.transition(AttemptEvent::Activated(ctx))?;
        self.current.send_replace(Some(question_id));

        let listener: Weak<dyn TimerListener> = self.me.clone();
        self.countdown.start(remaining, listener, token.clone());
        tokio::spawn(Arc::clone(&self.autosave).run_idle(
            attempt_id,
            self.current.subscribe(),
            self.options.timings.autosave_idle,
            token,
        ));
        Ok(state)
    }

    async fn load_question(
        &self,
        attempt_id: &AttemptId,
        ordinal: u32,
        cancel: &CancellationToken,
    ) -> Result<Question, GatewayError> {
        if let Some(question) = self.question_at(ordinal) {
            return Ok(question);
        }
        let envelope = self
            .options
            .retry
            .run("get_question", self.timer.as_ref(), cancel, || {
                self.gateway.get_question(attempt_id, ordinal)
            })
            .await?;
        self.cache
            .visit(&envelope.question, envelope.saved_answer.as_ref());
        let question = envelope.question;
        lock(&self.questions).insert(ordinal, question.clone());
        Ok(question)
    }

    async fn navigate_to(&self, ordinal: u32) -> Result<Question, SessionError> {
        let state = self.snapshot();
        let Some(ctx) = state.active().cloned() else {
            return Err(TransitionError {
                state: state.name(),
                event: "moved",
            }
            .into());
        };
        if !ctx.contains(ordinal) {
            let err = SessionError::OutOfRange {
                ordinal,
                total: ctx.total_questions,
            };
            self.notify(err.notice());
            return Err(err);
        }
        if ordinal == ctx.cursor {
            if let Some(question) = self.question_at(ordinal) {
                return Ok(question);
            }
        }

        let token = self.activity();
        if let Some(current) = self.question_id_at(ctx.cursor) {
            if let Err(err) = self
                .autosave
                .flush_until_clean(&ctx.attempt_id, current, FlushReason::Navigation, &token)
                .await
            {
                let unsaved = SessionError::Unsaved { question: current };
                return Err(self.soft_failure(err, unsaved).await);
            }
        }

        let question = match self.load_question(&ctx.attempt_id, ordinal, &token).await {
            Ok(question) => question,
            Err(err) => {
                let session_err = SessionError::from_gateway(err.clone());
                return Err(self.soft_failure(err, session_err).await);
            }
        };

        self.transition(AttemptEvent::Moved { cursor: ordinal })?;
        self.current.send_replace(Some(question.id()));
        tracing::debug!(attempt_id = %ctx.attempt_id, cursor = ordinal, "navigated");
        Ok(question)
    }

    fn answer(&self, draft: AnswerDraft) -> Result<(), SessionError> {
        let result = self.try_answer(draft);
        if let Err(err) = &result {
            self.notify(err.notice());
        }
        result
    }

    fn try_answer(&self, draft: AnswerDraft) -> Result<(), SessionError> {
        let state = self.snapshot();
        let Some(ctx) = state.active() else {
            return Err(SessionError::Locked);
        };
        let question = self
            .question_at(ctx.cursor)
            .ok_or(SessionError::OutOfRange {
                ordinal: ctx.cursor,
                total: ctx.total_questions,
            })?;
        let payload = draft.validate(&question)?;
        let revision = self.cache.set(question.id(), payload)?;
        tracing::debug!(question_id = %question.id(), revision, "answer edited");
        Ok(())
    }

    async fn flush(&self) -> Result<(), SessionError> {
        let state = self.snapshot();
        let Some(ctx) = state.active() else {
            return Ok(());
        };
        let Some(question_id) = self.question_id_at(ctx.cursor) else {
            return Ok(());
        };
        let token = self.activity();
        match self
            .autosave
            .flush_until_clean(&ctx.attempt_id, question_id, FlushReason::Explicit, &token)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let unsaved = SessionError::Unsaved {
                    question: question_id,
                };
                Err(self.soft_failure(err, unsaved).await)
            }
        }
    }

    async fn expire(&self) -> Result<SubmitOutcome, SessionError> {
        tracing::info!(attempt_id = ?self.snapshot().attempt_id(), "attempt time is up");
        self.submit_with(SubmitTrigger::Expiry).await
    }

    async fn submit_with(&self, trigger: SubmitTrigger) -> Result<SubmitOutcome, SessionError> {
        // check-and-set under one lock: only one caller leaves here with Submitting
        let attempt = {
            let mut state = lock(&self.state);
            match &*state {
                AttemptState::Submitting { .. } => return Ok(SubmitOutcome::AlreadySubmitting),
                AttemptState::Completed(done) | AttemptState::Expired(done) => {
                    return Ok(SubmitOutcome::AlreadyFinished(done.clone()));
                }
                _ => {}
            }
            let next = state.apply(AttemptEvent::SubmitRequested(trigger))?;
            let attempt = next.context().cloned().ok_or(TransitionError {
                state: next.name(),
                event: "submit-requested",
            })?;
            *state = next;
            attempt
        };
        tracing::debug!(attempt_id = %attempt.attempt_id, ?trigger, "attempt transition submitting");
        let guard = SubmittingGuard::new(self);

        // a fresh token: a retry from `Error` runs after the activity was cancelled
        let cancel = self.shutdown.child_token();
        let result = self.submission.submit(&attempt, &cancel).await;
        guard.disarm();
        match result {
            Ok(SubmissionOutcome::Finalized(receipt)) => {
                let state = self.transition(AttemptEvent::Submitted {
                    score: receipt.score,
                })?;
                let finished = match state {
                    AttemptState::Completed(done) | AttemptState::Expired(done) => done,
                    other => {
                        return Err(TransitionError {
                            state: other.name(),
                            event: "submitted",
                        }
                        .into());
                    }
                };
                let message = match trigger {
                    SubmitTrigger::User => "Your answers were submitted.",
                    SubmitTrigger::Expiry => "Time is up. Your answers were submitted.",
                };
                self.notify(Notice::new(
                    NoticeLevel::Info,
                    message,
                    NoticeAction::ShowResults,
                ));
                Ok(SubmitOutcome::Submitted(finished))
            }
            Ok(SubmissionOutcome::InFlight) => Ok(SubmitOutcome::AlreadySubmitting),
            Err(err) => Err(self.abort_with(err).await),
        }
    }

    async fn finish_remotely(&self, ctx: &AttemptContext) {
        self.forget(ctx.test_id).await;
        match self.transition(AttemptEvent::FinishedRemotely {
            attempt_id: ctx.attempt_id.clone(),
            total_questions: ctx.total_questions,
        }) {
            Ok(_) => {
                tracing::info!(attempt_id = %ctx.attempt_id, "attempt was finalized elsewhere");
                self.notify(Notice::new(
                    NoticeLevel::Info,
                    "This attempt was submitted from another window.",
                    NoticeAction::ShowResults,
                ));
            }
            Err(err) => tracing::debug!(error = %err, "remote completion ignored"),
        }
    }
}

/// Moves a submission that was dropped mid-flight to a retryable `Error`.
struct SubmittingGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl<'a> SubmittingGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let submitting = matches!(self.inner.snapshot(), AttemptState::Submitting { .. });
        if !submitting {
            return;
        }
        tracing::warn!("submission dropped before it finished; attempt kept for a retry");
        if let Err(err) = self
            .inner
            .transition(AttemptEvent::Failed(ErrorKind::Submission))
        {
            tracing::debug!(error = %err, "dropped submission left state unchanged");
        }
        self.inner
            .notify(SessionError::Submission(GatewayError::Aborted).notice());
    }
}

#[async_trait]
impl TimerListener for Inner {
    async fn resync(&self) -> Option<u32> {
        let ctx = self.snapshot().active()?.clone();
        let token = self.activity();
        let report = self
            .options
            .retry
            .run("get_status", self.timer.as_ref(), &token, || {
                self.gateway.get_status(&ctx.attempt_id)
            })
            .await;
        match report {
            Ok(report) if report.is_finished() => {
                self.finish_remotely(&ctx).await;
                None
            }
            Ok(report) => {
                *lock(&self.server_answered) = Some(report.answered_count);
                Some(report.remaining_seconds)
            }
            Err(GatewayError::SessionInvalid) => {
                self.abort_with(SessionError::SessionInvalid).await;
                None
            }
            Err(GatewayError::Aborted) => None,
            Err(err) => {
                tracing::warn!(attempt_id = %ctx.attempt_id, error = %err, "resync failed; local countdown kept");
                None
            }
        }
    }

    async fn expired(&self) {
        match self.expire().await {
            Ok(outcome) => tracing::debug!(?outcome, "expiry handled"),
            Err(err) => tracing::error!(error = %err, "automatic submission failed"),
        }
    }
}
