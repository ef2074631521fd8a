//! Submit-then-poll driver for description generation.

use crate::client::{ApiRequest, ApiResponse, Transport};
use crate::config::PollPolicy;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    GenerationAccepted, GenerationPoll, GenerationRequest, GenerationStatus, RequestId,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SUBMIT_PATH: &str = "/activities/generate_description";
const DEFAULT_FAILURE_TEXT: &str = "Description generation failed";

/// Successful outcome of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub request_id: String,
    pub description: String,
    /// Status polls issued, including the one that completed.
    pub polls: u32,
}

/// Client-side view of one accepted generation request.
///
/// Once `completed` or `error` has been observed, later polls are ignored.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub request_id: String,
    pub status: GenerationStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
}

impl GenerationTask {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: GenerationStatus::Pending,
            result: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            GenerationStatus::Completed | GenerationStatus::Error
        )
    }

    /// Apply a poll response. Returns whether the task changed.
    pub fn observe(&mut self, poll: &GenerationPoll) -> bool {
        if self.is_terminal() {
            return false;
        }
        match &poll.status {
            GenerationStatus::Completed => match poll.description.as_deref() {
                Some(d) if !d.trim().is_empty() => {
                    self.status = GenerationStatus::Completed;
                    self.result = Some(d.to_string());
                    true
                }
                _ => false,
            },
            GenerationStatus::Error => {
                self.status = GenerationStatus::Error;
                self.error_message = Some(
                    poll.message
                        .clone()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_FAILURE_TEXT.to_string()),
                );
                true
            }
            GenerationStatus::Pending | GenerationStatus::Other(_) => false,
        }
    }
}

/// What one poll did to the run.
enum PollStep {
    Done(String),
    Failed(String),
    /// Keep polling. `Some` replaces the recorded last error; `None` leaves it.
    Retry(Option<String>),
}

/// Drives generation requests against the API.
#[derive(Clone)]
pub struct GenerationPoller<T> {
    api: T,
    policy: PollPolicy,
}

impl<T: Transport> GenerationPoller<T> {
    pub fn new(api: T, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Submit `activity` for generation and poll until a terminal outcome.
    pub async fn run(&self, activity: serde_json::Value) -> ClientResult<Generated> {
        self.run_with_cancel(activity, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but gives up with `Cancelled` as soon as
    /// `cancel` fires, whatever the run is waiting on.
    pub async fn run_with_cancel(
        &self,
        activity: serde_json::Value,
        cancel: &CancellationToken,
    ) -> ClientResult<Generated> {
        let request_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            accepted = self.submit(activity) => accepted?,
        };
        tracing::info!(request_id = %request_id, "description generation accepted");

        pause(self.policy.initial_delay, cancel).await?;

        let attempts = self.policy.normalized_attempts();
        let mut task = GenerationTask::new(request_id.clone());
        let mut last_error: Option<String> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                pause(self.policy.interval, cancel).await?;
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                resp = self.api.request(ApiRequest::get(status_path(&request_id))) => resp,
            };

            match evaluate(&mut task, response) {
                PollStep::Done(description) => {
                    tracing::info!(request_id = %request_id, attempt, "description generated");
                    return Ok(Generated {
                        request_id,
                        description,
                        polls: attempt,
                    });
                }
                PollStep::Failed(message) => {
                    tracing::warn!(request_id = %request_id, attempt, message = %message, "description generation failed");
                    return Err(ClientError::Domain { message });
                }
                PollStep::Retry(err) => {
                    if let Some(err) = err {
                        tracing::debug!(request_id = %request_id, attempt, err = %err, "status poll missed");
                        last_error = Some(err);
                    } else {
                        tracing::debug!(request_id = %request_id, attempt, "generation pending");
                    }
                }
            }
        }

        tracing::warn!(request_id = %request_id, attempts, "description generation timed out");
        Err(ClientError::PollingTimedOut {
            attempts,
            last_error,
        })
    }

    async fn submit(&self, activity: serde_json::Value) -> ClientResult<String> {
        let body = serde_json::to_value(GenerationRequest { activity })
            .map_err(|e| submission_failed(format!("invalid payload: {e}")))?;
        let resp = self
            .api
            .request(ApiRequest::post(SUBMIT_PATH, body))
            .await
            .map_err(|e| submission_failed(e.to_string()))?;
        if !resp.is_success() {
            let message = match resp.ensure_success() {
                Err(ClientError::Http { message, .. }) => message,
                _ => format!("HTTP {}", resp.status),
            };
            return Err(submission_failed(message));
        }
        let accepted: GenerationAccepted = resp
            .json()
            .map_err(|e| submission_failed(e.to_string()))?;
        accepted
            .request_id
            .as_ref()
            .and_then(RequestId::usable)
            .ok_or_else(|| submission_failed("response carried no request_id"))
    }
}

fn status_path(request_id: &str) -> String {
    format!("/activities/description_status/{request_id}")
}

fn submission_failed(message: impl Into<String>) -> ClientError {
    ClientError::SubmissionFailed {
        message: message.into(),
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> ClientResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn evaluate(task: &mut GenerationTask, response: ClientResult<ApiResponse>) -> PollStep {
    let resp = match response {
        Ok(resp) => resp,
        Err(e) => return PollStep::Retry(Some(e.to_string())),
    };
    if !resp.is_success() {
        return PollStep::Retry(Some(format!("polling failed with HTTP {}", resp.status)));
    }
    let poll: GenerationPoll = match resp.json() {
        Ok(poll) => poll,
        Err(_) => {
            return PollStep::Retry(Some("unexpected status: undecodable response".to_string()));
        }
    };

    task.observe(&poll);
    match (&task.status, &poll.status) {
        (GenerationStatus::Completed, _) => {
            PollStep::Done(task.result.clone().unwrap_or_default())
        }
        (GenerationStatus::Error, _) => PollStep::Failed(
            task.error_message
                .clone()
                .unwrap_or_else(|| DEFAULT_FAILURE_TEXT.to_string()),
        ),
        (_, GenerationStatus::Pending) => PollStep::Retry(None),
        (_, GenerationStatus::Completed) => PollStep::Retry(Some(
            "unexpected status: completed without description".to_string(),
        )),
        (_, other) => PollStep::Retry(Some(format!("unexpected status: {other}"))),
    }
}
