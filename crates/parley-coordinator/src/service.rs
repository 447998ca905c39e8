//! Caller-facing `request_feedback` entry point.

use std::sync::Arc;
use std::time::Duration;

use parley_options::{OptionConfig, OptionResolver, ResolvedOptions, DEFAULT_LANGUAGE};
use tracing::{info, warn};

use crate::bridge::WaitOutcome;
use crate::coordinator::RequestCoordinator;
use crate::types::{FeedbackError, FeedbackResult, Task, TaskId, TaskStatus};

pub const MAX_PROMPT_CHARS: usize = 10_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRequest {
    pub task_id: Option<TaskId>,
    pub prompt: String,
    pub ai_options: Option<Vec<String>>,
    pub language: String,
    pub timeout: Duration,
}

impl FeedbackRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            task_id: None,
            prompt: prompt.into(),
            ai_options: None,
            language: DEFAULT_LANGUAGE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_ai_options(mut self, ai_options: Vec<String>) -> Self {
        self.ai_options = Some(ai_options);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), FeedbackError> {
        if self.prompt.trim().is_empty() {
            return Err(FeedbackError::validation("prompt cannot be empty"));
        }
        let prompt_chars = self.prompt.chars().count();
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(FeedbackError::validation(format!(
                "prompt has {prompt_chars} characters; the limit is {MAX_PROMPT_CHARS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Completed,
    Cancelled,
    TimedOut,
    Failed,
}

impl ReplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackReply {
    pub task_id: TaskId,
    pub status: ReplyStatus,
    pub result: FeedbackResult,
    /// Options that were offered to the person.
    pub resolution: ResolvedOptions,
}

/// Explicit context object tying option resolution to the coordinator.
pub struct FeedbackService {
    coordinator: Arc<RequestCoordinator>,
    resolver: Arc<OptionResolver>,
    config: Arc<dyn OptionConfig>,
}

impl std::fmt::Debug for FeedbackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackService")
            .field("coordinator", &self.coordinator)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl FeedbackService {
    pub fn new(
        coordinator: Arc<RequestCoordinator>,
        resolver: Arc<OptionResolver>,
        config: Arc<dyn OptionConfig>,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            config,
        }
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    /// Shows `prompt` and blocks until a reply, a close, or the timeout.
    ///
    /// Invalid requests fail before dispatch. Everything after dispatch
    /// returns a reply; coordinator failures arrive as an error content item.
    #[tracing::instrument(
        name = "parley_coordinator.request_feedback",
        skip_all,
        fields(language = %request.language, timeout_ms = request.timeout.as_millis() as u64)
    )]
    pub fn request_feedback(
        &self,
        request: FeedbackRequest,
    ) -> Result<FeedbackReply, FeedbackError> {
        request.validate()?;
        let FeedbackRequest {
            task_id,
            prompt,
            ai_options,
            language,
            timeout,
        } = request;
        let task_id = task_id.unwrap_or_else(TaskId::generate);

        let resolution = self
            .resolver
            .resolve_with_report(&prompt, ai_options.as_deref(), self.config.as_ref(), &language)
            .resolved;
        let handle = self.coordinator.bridge().open(task_id.clone())?;
        let task = Task::new(task_id.clone(), prompt, ai_options);
        if let Err(error) = self
            .coordinator
            .submit_task(task, resolution.options.clone())
        {
            warn!(
                reason_code = error.reason_code(),
                task_id = %task_id,
                error = %error,
                "feedback request could not reach the presentation thread"
            );
            let result =
                FeedbackResult::error(task_id.clone(), error.reason_code(), error.to_string());
            return Ok(FeedbackReply {
                task_id,
                status: ReplyStatus::Failed,
                result,
                resolution,
            });
        }

        let (status, result) = match handle.wait(timeout) {
            WaitOutcome::Delivered(result) => (self.delivered_status(&result), result),
            WaitOutcome::TimedOut => {
                if let Err(error) = self.coordinator.expire(task_id.clone()) {
                    warn!(
                        reason_code = error.reason_code(),
                        task_id = %task_id,
                        "timed out task could not be expired"
                    );
                }
                (ReplyStatus::TimedOut, FeedbackResult::empty(task_id.clone()))
            }
            WaitOutcome::AlreadyConsumed => (
                ReplyStatus::Failed,
                FeedbackResult::error(
                    task_id.clone(),
                    "bridge_handle_consumed",
                    "wait handle was already consumed",
                ),
            ),
        };
        info!(
            reason_code = "feedback_request_finished",
            task_id = %task_id,
            status = status.as_str(),
            items = result.content.len(),
            "feedback request finished"
        );
        Ok(FeedbackReply {
            task_id,
            status,
            result,
            resolution,
        })
    }

    /// `request_feedback(prompt, ai_options, language, timeout_seconds)`
    /// returning only the reply content.
    pub fn ask(
        &self,
        prompt: &str,
        ai_options: Option<Vec<String>>,
        language: &str,
        timeout_seconds: u64,
    ) -> Result<FeedbackResult, FeedbackError> {
        let mut request = FeedbackRequest::new(prompt)
            .with_language(language)
            .with_timeout(Duration::from_secs(timeout_seconds));
        request.ai_options = ai_options;
        Ok(self.request_feedback(request)?.result)
    }

    /// Runs [`Self::request_feedback`] on Tokio's blocking pool.
    pub async fn request_feedback_async(
        self: &Arc<Self>,
        request: FeedbackRequest,
    ) -> Result<FeedbackReply, FeedbackError> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.request_feedback(request))
            .await
            .map_err(|error| FeedbackError::dispatch(format!("feedback worker failed: {error}")))?
    }

    fn delivered_status(&self, result: &FeedbackResult) -> ReplyStatus {
        if result.error_item().is_some() {
            return ReplyStatus::Failed;
        }
        match self.coordinator.task_status(&result.task_id) {
            Some(TaskStatus::Completed) => ReplyStatus::Completed,
            _ => ReplyStatus::Cancelled,
        }
    }
}
