//! Request/response orchestration between blocked callers and a single
//! presentation-owning thread.
//!
//! Callers open a [`SynchronizationBridge`] slot, hand the task to the
//! [`RequestCoordinator`] and block in [`WaitHandle::wait`]. The coordinator
//! thread creates one presentation session per task, reacts to the session's
//! feedback or close events and signals the slot exactly once.

pub mod bridge;
pub mod coordinator;
pub mod presentation;
pub mod reply_render;
pub mod service;
pub mod types;

pub use bridge::{SynchronizationBridge, WaitHandle, WaitOutcome};
pub use coordinator::{RequestCoordinator, TaskRecord, MAX_RETAINED_TERMINAL_TASKS};
pub use presentation::{PresentationSession, PresentationSurface, SessionEvents, SessionRequest};
pub use reply_render::{render_reply, RenderedBlock, NO_FEEDBACK_MESSAGE};
pub use service::{FeedbackReply, FeedbackRequest, FeedbackService, ReplyStatus, MAX_PROMPT_CHARS};
pub use types::{ContentItem, FeedbackError, FeedbackResult, Task, TaskId, TaskStatus};
