//! The backend boundary.
//!
//! `RemoteGateway` is the only way the engine talks to the exam service. All
//! calls are async and return typed results or a [`GatewayError`].

mod http;
mod in_memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use exam_core::model::{AnswerPayload, AttemptId, AttemptScore, Question, QuestionId, TestId};

use crate::error::GatewayError;

pub use http::HttpGateway;
pub use in_memory::{GatewayCall, GatewayOp, InMemoryGateway, TestFixture};

/// Backend operations consumed by the attempt engine.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Start an attempt, or return the one already running for this test.
    async fn start_attempt(&self, test_id: TestId) -> Result<StartedAttempt, GatewayError>;

    async fn get_question(
        &self,
        attempt_id: &AttemptId,
        ordinal: u32,
    ) -> Result<QuestionEnvelope, GatewayError>;

    async fn save_answer(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
        payload: &AnswerPayload,
    ) -> Result<SaveReceipt, GatewayError>;

    async fn get_status(&self, attempt_id: &AttemptId) -> Result<StatusReport, GatewayError>;

    async fn submit(&self, attempt_id: &AttemptId) -> Result<SubmissionResult, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    pub attempt_id: AttemptId,
    pub first_question: QuestionEnvelope,
    pub remaining_seconds: u32,
    pub total_questions: u32,
}

/// A question together with what the server already holds for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEnvelope {
    #[serde(flatten)]
    pub question: Question,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_answer: Option<SavedAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnswer {
    pub payload: AnswerPayload,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub saved_at: DateTime<Utc>,
}

/// Server-side lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    InProgress,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub remaining_seconds: u32,
    pub answered_count: u32,
    pub is_completed: bool,
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
}

impl StatusReport {
    /// The attempt no longer accepts answers on the server.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_completed || matches!(self.status, RemoteStatus::Completed | RemoteStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub score: f64,
    pub total_score: f64,
    pub status: RemoteStatus,
}

impl SubmissionResult {
    #[must_use]
    pub fn score(&self) -> AttemptScore {
        AttemptScore {
            score: self.score,
            total_score: self.total_score,
        }
    }
}
