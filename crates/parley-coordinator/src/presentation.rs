//! Collaborator traits for the surface that shows prompts to a person.

use std::sync::mpsc::Sender;

use tracing::debug;

use crate::coordinator::Command;
use crate::types::{ContentItem, FeedbackResult, TaskId};

/// Payload handed to [`PresentationSurface::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub task_id: TaskId,
    pub prompt: String,
    pub options: Vec<String>,
}

/// One open prompt. Lives only on the coordinator thread.
pub trait PresentationSession {
    /// Closes the session. Called once during teardown; must tolerate the
    /// person having closed the surface already.
    fn close(&mut self);
}

/// Factory for sessions, moved onto the coordinator thread at startup.
pub trait PresentationSurface: Send + 'static {
    fn create(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> anyhow::Result<Box<dyn PresentationSession>>;
}

/// Event sink a session uses to report back to the coordinator.
///
/// Every call only enqueues a command, so it is safe to invoke from inside a
/// session callback or from any other thread.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    task_id: TaskId,
    session: u64,
    sender: Sender<Command>,
}

impl SessionEvents {
    pub(crate) fn new(task_id: TaskId, session: u64, sender: Sender<Command>) -> Self {
        Self {
            task_id,
            session,
            sender,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn feedback_provided(&self, content: Vec<ContentItem>) {
        let result = FeedbackResult::new(self.task_id.clone(), content);
        self.send(Command::Feedback {
            task_id: self.task_id.clone(),
            session: Some(self.session),
            result,
        });
    }

    pub fn closed(&self) {
        self.send(Command::Closed {
            task_id: self.task_id.clone(),
            session: Some(self.session),
        });
    }

    fn send(&self, command: Command) {
        if self.sender.send(command).is_err() {
            debug!(
                reason_code = "session_event_after_shutdown",
                task_id = %self.task_id,
                "coordinator stopped; session event dropped"
            );
        }
    }
}
