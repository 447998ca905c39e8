//! Shared data types for feedback requests.

use std::fmt;

use parley_core::next_task_id;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to callers of the feedback service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("invalid feedback request: {reason}")]
    Validation { reason: String },
    #[error("feedback request could not be dispatched: {reason}")]
    Dispatch { reason: String },
    #[error("invalid task transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

impl FeedbackError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn dispatch(reason: impl Into<String>) -> Self {
        Self::Dispatch {
            reason: reason.into(),
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "feedback_request_invalid",
            Self::Dispatch { .. } => "feedback_dispatch_failed",
            Self::InvalidTransition { .. } => "task_transition_invalid",
        }
    }
}

/// Opaque, non-blank task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Result<Self, FeedbackError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(FeedbackError::validation("task id cannot be blank"));
        }
        Ok(Self(value))
    }

    /// Generates a process-unique `task-<unix_ms>-<n>` id.
    pub fn generate() -> Self {
        Self(next_task_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state for a feedback task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    AwaitingUser,
    Completed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Returns true when this status can transition to `next`.
    ///
    /// A pending task may end without ever being shown (presentation failure,
    /// timeout or shutdown before the session opened).
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::AwaitingUser)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::TimedOut)
                | (Self::Pending, Self::Cancelled)
                | (Self::AwaitingUser, Self::Completed)
                | (Self::AwaitingUser, Self::TimedOut)
                | (Self::AwaitingUser, Self::Cancelled)
        )
    }

    pub fn ensure_transition(self, next: Self) -> Result<(), FeedbackError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(FeedbackError::InvalidTransition {
            from: self,
            to: next,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingUser => "awaiting_user",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub prompt: String,
    pub ai_options: Option<Vec<String>>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(
        task_id: TaskId,
        prompt: impl Into<String>,
        ai_options: Option<Vec<String>>,
    ) -> Self {
        Self {
            task_id,
            prompt: prompt.into(),
            ai_options,
            status: TaskStatus::Pending,
        }
    }
}

/// One piece of a user's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    FileReference {
        display_name: String,
        path: String,
    },
    /// Structured failure reported instead of a user reply.
    Error {
        reason_code: String,
        message: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn file_reference(display_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::FileReference {
            display_name: display_name.into(),
            path: path.into(),
        }
    }

    pub fn error(reason_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            reason_code: reason_code.into(),
            message: message.into(),
        }
    }
}

/// Reply delivered for one task. Empty content is a valid "skip".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub task_id: TaskId,
    pub content: Vec<ContentItem>,
}

impl FeedbackResult {
    pub fn new(task_id: TaskId, content: Vec<ContentItem>) -> Self {
        Self { task_id, content }
    }

    pub fn empty(task_id: TaskId) -> Self {
        Self::new(task_id, Vec::new())
    }

    pub fn error(task_id: TaskId, reason_code: &str, message: impl Into<String>) -> Self {
        Self::new(task_id, vec![ContentItem::error(reason_code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn error_item(&self) -> Option<&ContentItem> {
        self.content
            .iter()
            .find(|item| matches!(item, ContentItem::Error { .. }))
    }
}
