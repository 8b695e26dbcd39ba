use std::sync::Arc;
use std::time::Duration;

use exam_core::model::{
    AnswerDraft, AnswerPayload, AttemptId, AttemptScore, AttemptState, AttemptStatus, ErrorKind,
    OptionId, QuestionId, TestId,
};
use services::attempts::{AttemptController, ControllerOptions, SubmitOutcome};
use services::config::SessionTimings;
use services::error::{GatewayError, NoticeAction, SessionError};
use services::gateway::{GatewayCall, GatewayOp, InMemoryGateway, TestFixture};
use storage::{AttemptStore, InMemoryAttemptStore};

const TEST: TestId = TestId::new(42);

fn attempt_id(raw: &str) -> AttemptId {
    AttemptId::parse(raw).unwrap()
}

fn pick(option: u64) -> AnswerPayload {
    AnswerPayload::choice([OptionId::new(option)])
}

fn choose(option: u64) -> AnswerDraft {
    AnswerDraft::Options(vec![OptionId::new(option)])
}

fn gateway(duration_seconds: u32) -> InMemoryGateway {
    InMemoryGateway::new().with_fixture(
        TestFixture::single_choice(TEST, 10, duration_seconds)
            .unwrap()
            .with_answer(QuestionId::new(1), pick(5))
            .with_answer(QuestionId::new(2), pick(2)),
    )
}

fn controller(
    gateway: &InMemoryGateway,
    store: &InMemoryAttemptStore,
    options: ControllerOptions,
) -> AttemptController {
    AttemptController::new(Arc::new(gateway.clone()), Arc::new(store.clone()), options)
}

async fn pointer(store: &InMemoryAttemptStore) -> Option<AttemptId> {
    store.get(TEST).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_per_test() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());

    let (first, second) = tokio::join!(session.start(TEST), session.start(TEST));
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.attempt_id(), Some(&attempt_id("a1")));
    assert_eq!(second.attempt_id(), Some(&attempt_id("a1")));

    let again = session.start(TEST).await.unwrap();
    assert_eq!(again.attempt_id(), Some(&attempt_id("a1")));
    assert_eq!(gateway.count(GatewayOp::StartAttempt), 1);
    assert_eq!(pointer(&store).await, Some(attempt_id("a1")));

    let attempt = session.attempt().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Active);
    assert_eq!(attempt.total_questions, 10);
    assert_eq!(attempt.remaining_seconds, 1800);
}

#[tokio::test(start_paused = true)]
async fn answer_then_flush_leaves_it_clean() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    let q1 = QuestionId::new(1);
    session.answer(choose(5)).unwrap();
    let cached = session.cached_answer(q1).unwrap();
    assert_eq!(cached.payload, pick(5));
    assert!(cached.dirty);
    assert_eq!(gateway.count(GatewayOp::SaveAnswer), 0);

    session.flush().await.unwrap();
    let cached = session.cached_answer(q1).unwrap();
    assert!(!cached.dirty);
    assert!(cached.saved_at.is_some());
    assert_eq!(gateway.saved_answer(&attempt_id("a1"), q1), Some(pick(5)));
    assert!(session.answered_questions().is_answered(1));
}

#[tokio::test(start_paused = true)]
async fn navigation_saves_the_current_answer_first() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    session.answer(choose(5)).unwrap();
    let question = session.navigate_to(2).await.unwrap();
    assert_eq!(question.ordinal(), 2);
    assert_eq!(session.current_question().unwrap().id(), QuestionId::new(2));

    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::StartAttempt { test_id: TEST },
            GatewayCall::SaveAnswer {
                attempt_id: attempt_id("a1"),
                question_id: QuestionId::new(1),
                payload: pick(5),
            },
            GatewayCall::GetQuestion {
                attempt_id: attempt_id("a1"),
                ordinal: 2,
            },
        ]
    );

    // going back uses the cache and sends nothing for a clean answer
    session.navigate_to(1).await.unwrap();
    assert_eq!(gateway.count(GatewayOp::SaveAnswer), 1);
    assert_eq!(gateway.count(GatewayOp::GetQuestion), 1);
    assert_eq!(session.cached_answer(QuestionId::new(1)).unwrap().payload, pick(5));
}

#[tokio::test(start_paused = true)]
async fn failed_save_blocks_navigation() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    session.answer(choose(3)).unwrap();
    gateway.fail_next(GatewayOp::SaveAnswer, GatewayError::Timeout, 3);
    let err = session.navigate_to(2).await.unwrap_err();
    assert!(matches!(err, SessionError::Unsaved { question } if question == QuestionId::new(1)));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(session.state().active().map(|ctx| ctx.cursor), Some(1));
    assert!(session.cached_answer(QuestionId::new(1)).unwrap().dirty);
    assert_eq!(session.last_notice().unwrap().action, NoticeAction::Retry);

    session.navigate_to(2).await.unwrap();
    assert_eq!(
        gateway.saved_answer(&attempt_id("a1"), QuestionId::new(1)),
        Some(pick(3))
    );
}

#[tokio::test(start_paused = true)]
async fn out_of_range_and_invalid_answers_are_refused_locally() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    let err = session.navigate_to(11).await.unwrap_err();
    assert!(matches!(err, SessionError::OutOfRange { ordinal: 11, total: 10 }));
    assert!(matches!(
        session.navigate_to(0).await,
        Err(SessionError::OutOfRange { ordinal: 0, .. })
    ));

    let err = session
        .answer(AnswerDraft::Options(vec![OptionId::new(1), OptionId::new(2)]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(session.answer(choose(9)).is_err());
    assert_eq!(session.state().status(), Some(AttemptStatus::Active));
    assert_eq!(gateway.count(GatewayOp::SaveAnswer), 0);
}

#[tokio::test(start_paused = true)]
async fn reload_resumes_the_same_attempt() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    {
        let first = controller(&gateway, &store, ControllerOptions::default());
        first.start(TEST).await.unwrap();
        first.answer(choose(5)).unwrap();
        first.flush().await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(100)).await;

    let second = controller(&gateway, &store, ControllerOptions::default());
    let state = second.start(TEST).await.unwrap();
    assert_eq!(state.status(), Some(AttemptStatus::Active));
    assert_eq!(state.attempt_id(), Some(&attempt_id("a1")));
    assert_eq!(second.remaining_seconds(), Some(1700));
    assert_eq!(second.server_answered_count(), Some(1));
    assert_eq!(gateway.count(GatewayOp::StartAttempt), 1);

    let restored = second.cached_answer(QuestionId::new(1)).unwrap();
    assert_eq!(restored.payload, pick(5));
    assert!(!restored.dirty);
}

#[tokio::test(start_paused = true)]
async fn resync_adopts_the_server_remaining_time() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let options = ControllerOptions {
        timings: SessionTimings {
            resync_period: Duration::from_millis(31_500),
            ..SessionTimings::default()
        },
        ..ControllerOptions::default()
    };
    let session = controller(&gateway, &store, options);
    session.start(TEST).await.unwrap();

    tokio::time::sleep(Duration::from_millis(31_200)).await;
    assert_eq!(session.remaining_seconds(), Some(1769));
    gateway.set_remaining(&attempt_id("a1"), 1770);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(gateway.count(GatewayOp::GetStatus), 1);
    assert_eq!(session.remaining_seconds(), Some(1770));
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_exactly_once() {
    let gateway = gateway(3);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();
    session.answer(choose(5)).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let AttemptState::Expired(done) = session.state() else {
        panic!("expected expired, got {:?}", session.state());
    };
    assert_eq!(
        done.score,
        Some(AttemptScore {
            score: 1.0,
            total_score: 10.0,
        })
    );
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
    assert_eq!(
        gateway.saved_answer(&attempt_id("a1"), QuestionId::new(1)),
        Some(pick(5))
    );
    assert_eq!(pointer(&store).await, None);
    assert_eq!(session.remaining_seconds(), Some(0));

    let again = session.expire().await.unwrap();
    assert!(matches!(again, SubmitOutcome::AlreadyFinished(_)));
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
    assert!(matches!(session.answer(choose(1)), Err(SessionError::Locked)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_submits_send_one_request() {
    let gateway = gateway(1800).with_latency(Duration::from_millis(100));
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    let (first, second) = tokio::join!(session.submit(), session.submit());
    assert!(matches!(first.unwrap(), SubmitOutcome::Submitted(_)));
    assert_eq!(second.unwrap(), SubmitOutcome::AlreadySubmitting);
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
    assert_eq!(session.state().status(), Some(AttemptStatus::Completed));
    assert_eq!(
        session.last_notice().unwrap().action,
        NoticeAction::ShowResults
    );
}

#[tokio::test(start_paused = true)]
async fn failed_submission_keeps_the_pointer_for_a_retry() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    gateway.fail_next(GatewayOp::Submit, GatewayError::Server { status: 503 }, 1);
    let err = session.submit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Submission);
    assert!(matches!(
        session.state(),
        AttemptState::Error {
            kind: ErrorKind::Submission,
            attempt: Some(_),
            ..
        }
    ));
    assert_eq!(pointer(&store).await, Some(attempt_id("a1")));
    assert_eq!(session.last_notice().unwrap().action, NoticeAction::Retry);

    let outcome = session.submit().await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
    assert_eq!(pointer(&store).await, None);
    assert_eq!(gateway.count(GatewayOp::Submit), 2);
}

#[tokio::test(start_paused = true)]
async fn remote_completion_is_picked_up_on_resync() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    gateway.complete_remotely(&attempt_id("a1"));
    tokio::time::sleep(Duration::from_secs(31)).await;

    let AttemptState::Completed(done) = session.state() else {
        panic!("expected completed, got {:?}", session.state());
    };
    assert_eq!(done.score, None);
    assert_eq!(pointer(&store).await, None);
    assert_eq!(gateway.count(GatewayOp::Submit), 0);
    assert_eq!(
        session.last_notice().unwrap().action,
        NoticeAction::ShowResults
    );
}

#[tokio::test(start_paused = true)]
async fn resuming_a_finished_attempt_shows_results() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    {
        let first = controller(&gateway, &store, ControllerOptions::default());
        first.start(TEST).await.unwrap();
    }
    gateway.complete_remotely(&attempt_id("a1"));

    let second = controller(&gateway, &store, ControllerOptions::default());
    let state = second.start(TEST).await.unwrap();
    assert_eq!(state.status(), Some(AttemptStatus::Completed));
    assert_eq!(pointer(&store).await, None);
    assert_eq!(second.attempt().unwrap().total_questions, 10);
}

#[tokio::test(start_paused = true)]
async fn purged_attempt_clears_the_pointer() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    {
        let first = controller(&gateway, &store, ControllerOptions::default());
        first.start(TEST).await.unwrap();
    }
    gateway.purge(&attempt_id("a1"));

    let second = controller(&gateway, &store, ControllerOptions::default());
    let err = second.start(TEST).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionInvalid));
    assert_eq!(pointer(&store).await, None);
    assert!(matches!(
        second.state(),
        AttemptState::Error {
            kind: ErrorKind::SessionInvalid,
            attempt: None,
            ..
        }
    ));
    assert_eq!(
        second.last_notice().unwrap().action,
        NoticeAction::RestartFromConfirmation
    );

    // a fresh start is possible right away
    let state = second.start(TEST).await.unwrap();
    assert_eq!(state.attempt_id(), Some(&attempt_id("a2")));
}

#[tokio::test(start_paused = true)]
async fn failed_start_writes_nothing() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    gateway.fail_next(GatewayOp::StartAttempt, GatewayError::Server { status: 502 }, 3);

    let err = session.start(TEST).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(session.state().status(), Some(AttemptStatus::Error));
    assert_eq!(pointer(&store).await, None);
    assert_eq!(gateway.count(GatewayOp::StartAttempt), 3);

    let state = session.start(TEST).await.unwrap();
    assert_eq!(state.status(), Some(AttemptStatus::Active));
}

#[tokio::test(start_paused = true)]
async fn resuming_after_a_failed_submit_keeps_unsaved_answers() {
    let gateway = gateway(1800);
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    let q1 = QuestionId::new(1);
    session.answer(choose(5)).unwrap();
    gateway.fail_next(GatewayOp::SaveAnswer, GatewayError::Timeout, 3);
    let err = session.submit().await.unwrap_err();
    assert!(matches!(err, SessionError::Unsaved { question } if question == q1));
    assert_eq!(session.state().status(), Some(AttemptStatus::Error));
    assert_eq!(pointer(&store).await, Some(attempt_id("a1")));

    let state = session.start(TEST).await.unwrap();
    assert_eq!(state.status(), Some(AttemptStatus::Active));
    assert_eq!(state.attempt_id(), Some(&attempt_id("a1")));
    let kept = session.cached_answer(q1).unwrap();
    assert_eq!(kept.payload, pick(5));
    assert!(kept.dirty);

    let SubmitOutcome::Submitted(done) = session.submit().await.unwrap() else {
        panic!("expected a submission");
    };
    assert_eq!(
        done.score,
        Some(AttemptScore {
            score: 1.0,
            total_score: 10.0,
        })
    );
    assert_eq!(gateway.saved_answer(&attempt_id("a1"), q1), Some(pick(5)));
}

#[tokio::test(start_paused = true)]
async fn abandoned_submit_can_be_retried() {
    let gateway = gateway(1800).with_latency(Duration::from_millis(100));
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(50), session.submit()).await;
    assert!(timed_out.is_err());
    assert!(matches!(
        session.state(),
        AttemptState::Error {
            kind: ErrorKind::Submission,
            attempt: Some(_),
            ..
        }
    ));
    assert_eq!(gateway.count(GatewayOp::Submit), 0);
    assert_eq!(pointer(&store).await, Some(attempt_id("a1")));
    assert_eq!(session.last_notice().unwrap().action, NoticeAction::Retry);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let outcome = session.submit().await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Submitted(_)));
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
    assert_eq!(pointer(&store).await, None);
}

#[tokio::test(start_paused = true)]
async fn user_submit_and_expiry_together_send_one_request() {
    let gateway = gateway(1800).with_latency(Duration::from_millis(100));
    let store = InMemoryAttemptStore::new();
    let session = controller(&gateway, &store, ControllerOptions::default());
    session.start(TEST).await.unwrap();
    session.answer(choose(5)).unwrap();

    let (submitted, expired) = tokio::join!(session.submit(), session.expire());
    assert!(matches!(submitted.unwrap(), SubmitOutcome::Submitted(_)));
    assert_eq!(expired.unwrap(), SubmitOutcome::AlreadySubmitting);
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
    assert_eq!(gateway.count(GatewayOp::SaveAnswer), 1);
    assert_eq!(session.state().status(), Some(AttemptStatus::Completed));

    let late = session.expire().await.unwrap();
    assert!(matches!(late, SubmitOutcome::AlreadyFinished(_)));
    assert_eq!(gateway.count(GatewayOp::Submit), 1);
}
