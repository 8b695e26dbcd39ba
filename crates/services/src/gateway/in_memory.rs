use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use exam_core::Clock;
use exam_core::model::{
    AnswerPayload, AttemptId, OptionId, Question, QuestionDraft, QuestionId, QuestionKind,
    QuestionOption, TestId,
};

use super::{
    QuestionEnvelope, RemoteGateway, RemoteStatus, SaveReceipt, SavedAnswer, StartedAttempt,
    StatusReport, SubmissionResult,
};
use crate::error::GatewayError;
use crate::sync::lock;

/// Gateway operations, used for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    StartAttempt,
    GetQuestion,
    SaveAnswer,
    GetStatus,
    Submit,
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    StartAttempt {
        test_id: TestId,
    },
    GetQuestion {
        attempt_id: AttemptId,
        ordinal: u32,
    },
    SaveAnswer {
        attempt_id: AttemptId,
        question_id: QuestionId,
        payload: AnswerPayload,
    },
    GetStatus {
        attempt_id: AttemptId,
    },
    Submit {
        attempt_id: AttemptId,
    },
}

impl GatewayCall {
    #[must_use]
    pub fn op(&self) -> GatewayOp {
        match self {
            Self::StartAttempt { .. } => GatewayOp::StartAttempt,
            Self::GetQuestion { .. } => GatewayOp::GetQuestion,
            Self::SaveAnswer { .. } => GatewayOp::SaveAnswer,
            Self::GetStatus { .. } => GatewayOp::GetStatus,
            Self::Submit { .. } => GatewayOp::Submit,
        }
    }
}

/// A test definition served by the in-memory backend.
#[derive(Debug, Clone)]
pub struct TestFixture {
    pub test_id: TestId,
    pub questions: Vec<Question>,
    pub duration_seconds: u32,
    pub answer_key: HashMap<QuestionId, AnswerPayload>,
}

impl TestFixture {
    #[must_use]
    pub fn new(test_id: TestId, questions: Vec<Question>, duration_seconds: u32) -> Self {
        Self {
            test_id,
            questions,
            duration_seconds,
            answer_key: HashMap::new(),
        }
    }

    /// `count` single-choice questions with options 1 to 6, one point each.
    ///
    /// Question ids equal their ordinals.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if a generated question fails validation.
    pub fn single_choice(
        test_id: TestId,
        count: u32,
        duration_seconds: u32,
    ) -> Result<Self, exam_core::model::QuestionError> {
        let questions = (1..=count)
            .map(|ordinal| {
                QuestionDraft {
                    id: u64::from(ordinal),
                    ordinal,
                    kind: Some(QuestionKind::SingleChoice),
                    text: format!("Question {ordinal}"),
                    options: Some(
                        (1..=6)
                            .map(|id| QuestionOption {
                                id: OptionId::new(id),
                                text: format!("Option {id}"),
                            })
                            .collect(),
                    ),
                    max_score: 1.0,
                }
                .validate()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(test_id, questions, duration_seconds))
    }

    #[must_use]
    pub fn with_answer(mut self, question_id: QuestionId, payload: AnswerPayload) -> Self {
        self.answer_key.insert(question_id, payload);
        self
    }

    fn question(&self, ordinal: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.ordinal() == ordinal)
    }

    fn total(&self) -> u32 {
        u32::try_from(self.questions.len()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
struct RemoteAttempt {
    test_id: TestId,
    deadline: Instant,
    answers: HashMap<QuestionId, SavedAnswer>,
    status: RemoteStatus,
}

impl RemoteAttempt {
    fn remaining_seconds(&self) -> u32 {
        let left = self.deadline.saturating_duration_since(Instant::now());
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    fn answered_count(&self) -> u32 {
        let count = self
            .answers
            .values()
            .filter(|saved| !saved.payload.is_empty())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Default)]
struct Backend {
    fixtures: HashMap<TestId, TestFixture>,
    attempts: HashMap<AttemptId, RemoteAttempt>,
    active_by_test: HashMap<TestId, AttemptId>,
    next_attempt: u64,
    failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    calls: Vec<GatewayCall>,
}

impl Backend {
    /// Log the call and pop an injected failure for it, if any.
    fn record(&mut self, call: GatewayCall) -> Result<(), GatewayError> {
        let op = call.op();
        self.calls.push(call);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn attempt(&self, attempt_id: &AttemptId) -> Result<&RemoteAttempt, GatewayError> {
        self.attempts
            .get(attempt_id)
            .ok_or(GatewayError::SessionInvalid)
    }

    fn fixture(&self, test_id: TestId) -> Result<&TestFixture, GatewayError> {
        self.fixtures
            .get(&test_id)
            .ok_or_else(|| GatewayError::NotFound(format!("test {test_id}")))
    }

    fn envelope(
        &self,
        attempt_id: &AttemptId,
        ordinal: u32,
    ) -> Result<QuestionEnvelope, GatewayError> {
        let attempt = self.attempt(attempt_id)?;
        let fixture = self.fixture(attempt.test_id)?;
        let question = fixture
            .question(ordinal)
            .ok_or_else(|| GatewayError::Rejected(format!("no question {ordinal}")))?;
        Ok(QuestionEnvelope {
            question: question.clone(),
            saved_answer: attempt.answers.get(&question.id()).cloned(),
            total_questions: Some(fixture.total()),
        })
    }

    fn score(&self, attempt: &RemoteAttempt) -> Result<SubmissionResult, GatewayError> {
        let fixture = self.fixture(attempt.test_id)?;
        let mut score = 0.0;
        let mut total_score = 0.0;
        for question in &fixture.questions {
            total_score += question.max_score();
            let expected = fixture.answer_key.get(&question.id());
            let given = attempt.answers.get(&question.id()).map(|saved| &saved.payload);
            if let (Some(expected), Some(given)) = (expected, given) {
                if same_answer(expected, given) {
                    score += question.max_score();
                }
            }
        }
        Ok(SubmissionResult {
            score,
            total_score,
            status: RemoteStatus::Completed,
        })
    }
}

fn same_answer(expected: &AnswerPayload, given: &AnswerPayload) -> bool {
    match (expected, given) {
        (
            AnswerPayload::Choice {
                selected_option_ids: a,
            },
            AnswerPayload::Choice {
                selected_option_ids: b,
            },
        ) => {
            let mut a = a.clone();
            let mut b = b.clone();
            a.sort();
            b.sort();
            a == b
        }
        (AnswerPayload::Text { text: a }, AnswerPayload::Text { text: b }) => {
            a.trim().eq_ignore_ascii_case(b.trim())
        }
        _ => false,
    }
}

/// Process-local exam backend for tests and offline runs.
///
/// Clones share one backend, so a test can keep a handle for assertions while
/// the controller owns another.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    backend: Arc<Mutex<Backend>>,
    clock: Clock,
    latency: Option<Duration>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fixture(self, fixture: TestFixture) -> Self {
        self.add_fixture(fixture);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Delay every call by `latency` before it is handled.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_fixture(&self, fixture: TestFixture) {
        lock(&self.backend)
            .fixtures
            .insert(fixture.test_id, fixture);
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: GatewayOp, error: GatewayError, times: usize) {
        let mut backend = lock(&self.backend);
        let queue = backend.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Reset the server-side remaining time of an attempt.
    pub fn set_remaining(&self, attempt_id: &AttemptId, seconds: u32) {
        if let Some(attempt) = lock(&self.backend).attempts.get_mut(attempt_id) {
            attempt.deadline = Instant::now() + Duration::from_secs(u64::from(seconds));
        }
    }

    /// Finalize an attempt as if it had been submitted elsewhere.
    pub fn complete_remotely(&self, attempt_id: &AttemptId) {
        let mut backend = lock(&self.backend);
        let Some(test_id) = backend.attempts.get(attempt_id).map(|a| a.test_id) else {
            return;
        };
        backend.active_by_test.remove(&test_id);
        if let Some(attempt) = backend.attempts.get_mut(attempt_id) {
            attempt.status = RemoteStatus::Completed;
        }
    }

    /// Forget an attempt entirely, as a server-side cleanup would.
    pub fn purge(&self, attempt_id: &AttemptId) {
        let mut backend = lock(&self.backend);
        if let Some(attempt) = backend.attempts.remove(attempt_id) {
            backend.active_by_test.remove(&attempt.test_id);
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.backend).calls.clone()
    }

    #[must_use]
    pub fn count(&self, op: GatewayOp) -> usize {
        lock(&self.backend)
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    #[must_use]
    pub fn saved_answer(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
    ) -> Option<AnswerPayload> {
        lock(&self.backend)
            .attempts
            .get(attempt_id)?
            .answers
            .get(&question_id)
            .map(|saved| saved.payload.clone())
    }

    #[must_use]
    pub fn active_attempt(&self, test_id: TestId) -> Option<AttemptId> {
        lock(&self.backend).active_by_test.get(&test_id).cloned()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn start_attempt(&self, test_id: TestId) -> Result<StartedAttempt, GatewayError> {
        self.delay().await;
        let mut backend = lock(&self.backend);
        backend.record(GatewayCall::StartAttempt { test_id })?;
        let fixture = backend.fixture(test_id)?;
        let total_questions = fixture.total();
        let duration = fixture.duration_seconds;

        let existing = backend.active_by_test.get(&test_id).cloned();
        let attempt_id = match existing {
            Some(existing) => existing,
            None => {
                backend.next_attempt += 1;
                let attempt_id = AttemptId::parse(&format!("a{}", backend.next_attempt))
                    .map_err(|e| GatewayError::Protocol(e.to_string()))?;
                backend.attempts.insert(
                    attempt_id.clone(),
                    RemoteAttempt {
                        test_id,
                        deadline: Instant::now() + Duration::from_secs(u64::from(duration)),
                        answers: HashMap::new(),
                        status: RemoteStatus::InProgress,
                    },
                );
                backend.active_by_test.insert(test_id, attempt_id.clone());
                attempt_id
            }
        };

        let first_question = backend.envelope(&attempt_id, 1)?;
        let remaining_seconds = backend.attempt(&attempt_id)?.remaining_seconds();
        Ok(StartedAttempt {
            attempt_id,
            first_question,
            remaining_seconds,
            total_questions,
        })
    }

    async fn get_question(
        &self,
        attempt_id: &AttemptId,
        ordinal: u32,
    ) -> Result<QuestionEnvelope, GatewayError> {
        self.delay().await;
        let mut backend = lock(&self.backend);
        backend.record(GatewayCall::GetQuestion {
            attempt_id: attempt_id.clone(),
            ordinal,
        })?;
        backend.envelope(attempt_id, ordinal)
    }

    async fn save_answer(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
        payload: &AnswerPayload,
    ) -> Result<SaveReceipt, GatewayError> {
        self.delay().await;
        let saved_at = self.clock.now();
        let mut backend = lock(&self.backend);
        backend.record(GatewayCall::SaveAnswer {
            attempt_id: attempt_id.clone(),
            question_id,
            payload: payload.clone(),
        })?;

        let attempt = backend.attempt(attempt_id)?;
        if attempt.status != RemoteStatus::InProgress {
            return Err(GatewayError::Conflict("attempt is already finalized".into()));
        }
        let known = backend
            .fixture(attempt.test_id)?
            .questions
            .iter()
            .any(|q| q.id() == question_id);
        if !known {
            return Err(GatewayError::Rejected(format!("no question {question_id}")));
        }

        if let Some(attempt) = backend.attempts.get_mut(attempt_id) {
            attempt.answers.insert(
                question_id,
                SavedAnswer {
                    payload: payload.clone(),
                    saved_at,
                },
            );
        }
        Ok(SaveReceipt { saved_at })
    }

    async fn get_status(&self, attempt_id: &AttemptId) -> Result<StatusReport, GatewayError> {
        self.delay().await;
        let mut backend = lock(&self.backend);
        backend.record(GatewayCall::GetStatus {
            attempt_id: attempt_id.clone(),
        })?;
        let attempt = backend.attempt(attempt_id)?;
        let total_questions = backend.fixture(attempt.test_id)?.total();
        let finished = attempt.status != RemoteStatus::InProgress;
        Ok(StatusReport {
            remaining_seconds: if finished { 0 } else { attempt.remaining_seconds() },
            answered_count: attempt.answered_count(),
            is_completed: finished,
            status: attempt.status,
            total_questions: Some(total_questions),
        })
    }

    async fn submit(&self, attempt_id: &AttemptId) -> Result<SubmissionResult, GatewayError> {
        self.delay().await;
        let mut backend = lock(&self.backend);
        backend.record(GatewayCall::Submit {
            attempt_id: attempt_id.clone(),
        })?;
        let attempt = backend.attempt(attempt_id)?;
        if attempt.status != RemoteStatus::InProgress {
            return Err(GatewayError::Conflict("attempt is already finalized".into()));
        }
        let result = backend.score(attempt)?;
        let test_id = attempt.test_id;
        backend.active_by_test.remove(&test_id);
        if let Some(attempt) = backend.attempts.get_mut(attempt_id) {
            attempt.status = RemoteStatus::Completed;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> InMemoryGateway {
        InMemoryGateway::new().with_fixture(
            TestFixture::single_choice(TestId::new(42), 3, 600)
                .unwrap()
                .with_answer(QuestionId::new(1), AnswerPayload::choice([OptionId::new(5)]))
                .with_answer(QuestionId::new(2), AnswerPayload::choice([OptionId::new(2)])),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_returns_the_running_attempt() {
        let gateway = gateway();
        let first = gateway.start_attempt(TestId::new(42)).await.unwrap();
        let second = gateway.start_attempt(TestId::new(42)).await.unwrap();
        assert_eq!(first.attempt_id, second.attempt_id);
        assert_eq!(first.total_questions, 3);
        assert_eq!(first.remaining_seconds, 600);
        assert_eq!(gateway.count(GatewayOp::StartAttempt), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_test_is_not_found() {
        let err = gateway().start_attempt(TestId::new(7)).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_scores_against_the_key_and_finalizes() {
        let gateway = gateway();
        let started = gateway.start_attempt(TestId::new(42)).await.unwrap();
        let id = started.attempt_id;
        gateway
            .save_answer(&id, QuestionId::new(1), &AnswerPayload::choice([OptionId::new(5)]))
            .await
            .unwrap();
        gateway
            .save_answer(&id, QuestionId::new(2), &AnswerPayload::choice([OptionId::new(3)]))
            .await
            .unwrap();

        let result = gateway.submit(&id).await.unwrap();
        assert!((result.score - 1.0).abs() < f64::EPSILON);
        assert!((result.total_score - 3.0).abs() < f64::EPSILON);

        assert!(matches!(
            gateway.submit(&id).await,
            Err(GatewayError::Conflict(_))
        ));
        assert!(gateway.get_status(&id).await.unwrap().is_finished());
        assert_eq!(gateway.active_attempt(TestId::new(42)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failures_are_consumed_in_order() {
        let gateway = gateway();
        let id = gateway.start_attempt(TestId::new(42)).await.unwrap().attempt_id;
        gateway.fail_next(GatewayOp::GetStatus, GatewayError::Timeout, 2);

        assert_eq!(gateway.get_status(&id).await.unwrap_err(), GatewayError::Timeout);
        assert_eq!(gateway.get_status(&id).await.unwrap_err(), GatewayError::Timeout);
        assert!(gateway.get_status(&id).await.is_ok());
        assert_eq!(gateway.count(GatewayOp::GetStatus), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_time_follows_tokio_time_and_purge_invalidates() {
        let gateway = gateway();
        let id = gateway.start_attempt(TestId::new(42)).await.unwrap().attempt_id;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(gateway.get_status(&id).await.unwrap().remaining_seconds, 570);

        gateway.set_remaining(&id, 100);
        assert_eq!(gateway.get_status(&id).await.unwrap().remaining_seconds, 100);

        gateway.purge(&id);
        assert_eq!(
            gateway.get_status(&id).await.unwrap_err(),
            GatewayError::SessionInvalid
        );
    }
}
