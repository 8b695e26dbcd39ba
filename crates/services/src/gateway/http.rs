use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use exam_core::model::{AnswerPayload, AttemptId, QuestionId, TestId};

use super::{
    QuestionEnvelope, RemoteGateway, SaveReceipt, StartedAttempt, StatusReport, SubmissionResult,
};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Which kind of resource a request addresses; decides what a 404 means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Test,
    Attempt,
}

/// `RemoteGateway` over JSON/HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpGateway {
    /// Build a gateway with the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::Protocol(format!("bad request path {path}: {e}")))
    }

    /// `attempts/<attempt_id>/<tail>`, with every segment percent-encoded.
    fn attempt_url(&self, attempt_id: &AttemptId, tail: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.url("attempts/")?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Protocol(format!("base url {} takes no path", self.base_url)))?
            .pop_if_empty()
            .push(attempt_id.as_str())
            .extend(tail);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        scope: Scope,
    ) -> Result<T, GatewayError> {
        let response = self.authorize(request).send().await?;
        let response = check_status(response, scope).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: Response, scope: Scope) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, scope, body))
}

fn classify(status: StatusCode, scope: Scope, body: String) -> GatewayError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE if scope == Scope::Attempt => {
            GatewayError::SessionInvalid
        }
        StatusCode::NOT_FOUND => GatewayError::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => GatewayError::Rejected(body),
        StatusCode::CONFLICT => GatewayError::Conflict(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => GatewayError::Server {
            status: status.as_u16(),
        },
        s if s.is_server_error() => GatewayError::Server { status: s.as_u16() },
        s => GatewayError::Protocol(format!("unexpected status {s}")),
    }
}

#[derive(Debug, Serialize)]
struct SaveRequest<'a> {
    payload: &'a AnswerPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    ok: bool,
    saved_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn start_attempt(&self, test_id: TestId) -> Result<StartedAttempt, GatewayError> {
        let url = self.url(&format!("tests/{test_id}/attempts"))?;
        self.send(self.client.post(url), Scope::Test).await
    }

    async fn get_question(
        &self,
        attempt_id: &AttemptId,
        ordinal: u32,
    ) -> Result<QuestionEnvelope, GatewayError> {
        let url = self.attempt_url(attempt_id, &["questions", &ordinal.to_string()])?;
        self.send(self.client.get(url), Scope::Attempt).await
    }

    async fn save_answer(
        &self,
        attempt_id: &AttemptId,
        question_id: QuestionId,
        payload: &AnswerPayload,
    ) -> Result<SaveReceipt, GatewayError> {
        let url = self.attempt_url(attempt_id, &["answers", &question_id.to_string()])?;
        let request = self.client.put(url).json(&SaveRequest { payload });
        let body: SaveResponse = self.send(request, Scope::Attempt).await?;
        if !body.ok {
            return Err(GatewayError::Rejected("save was not acknowledged".into()));
        }
        let saved_at = body
            .saved_at
            .ok_or_else(|| GatewayError::Protocol("save response without savedAt".into()))?;
        Ok(SaveReceipt { saved_at })
    }

    async fn get_status(&self, attempt_id: &AttemptId) -> Result<StatusReport, GatewayError> {
        let url = self.attempt_url(attempt_id, &["status"])?;
        self.send(self.client.get(url), Scope::Attempt).await
    }

    async fn submit(&self, attempt_id: &AttemptId) -> Result<SubmissionResult, GatewayError> {
        let url = self.attempt_url(attempt_id, &["submit"])?;
        self.send(self.client.post(url), Scope::Attempt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_depends_on_scope() {
        assert_eq!(
            classify(StatusCode::NOT_FOUND, Scope::Attempt, String::new()),
            GatewayError::SessionInvalid
        );
        assert_eq!(
            classify(StatusCode::GONE, Scope::Attempt, String::new()),
            GatewayError::SessionInvalid
        );
        assert_eq!(
            classify(StatusCode::NOT_FOUND, Scope::Test, "no such test".into()),
            GatewayError::NotFound("no such test".into())
        );
    }

    #[test]
    fn retryable_statuses_are_server_errors() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            let err = classify(status, Scope::Attempt, String::new());
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, Scope::Attempt, "bad".into()),
            GatewayError::Rejected(_)
        ));
        assert!(matches!(
            classify(StatusCode::CONFLICT, Scope::Attempt, String::new()),
            GatewayError::Conflict(_)
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, Scope::Attempt, String::new()),
            GatewayError::Protocol(_)
        ));
    }
}
