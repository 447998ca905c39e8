//! Owning-thread run loop that creates and tears down presentation sessions.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use parley_core::current_unix_timestamp_ms;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::{lock_or_recover, SynchronizationBridge};
use crate::presentation::{PresentationSession, PresentationSurface, SessionEvents, SessionRequest};
use crate::types::{FeedbackError, FeedbackResult, Task, TaskId, TaskStatus};

pub const MAX_RETAINED_TERMINAL_TASKS: usize = 256;
const OWNING_THREAD_NAME: &str = "parley-presentation";
const PRESENTATION_CREATE_FAILED: &str = "presentation_create_failed";

#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        task: Task,
        options: Vec<String>,
    },
    /// `session` is set when the event comes from a session's own sink;
    /// events from a replaced session are ignored.
    Feedback {
        task_id: TaskId,
        session: Option<u64>,
        result: FeedbackResult,
    },
    Closed {
        task_id: TaskId,
        session: Option<u64>,
    },
    Teardown {
        task_id: TaskId,
        session: u64,
        close_session: bool,
    },
    Expire {
        task_id: TaskId,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: TaskStatus,
    pub at_unix_ms: u64,
}

/// Introspection copy of one task and its status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task: Task,
    pub options: Vec<String>,
    pub history: Vec<StatusChange>,
}

#[derive(Debug, Default)]
struct TaskRegistry {
    records: HashMap<TaskId, TaskRecord>,
    terminal_order: VecDeque<TaskId>,
}

impl TaskRegistry {
    fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.records.get(task_id).map(|record| record.task.status)
    }

    fn is_live(&self, task_id: &TaskId) -> bool {
        self.status(task_id)
            .is_some_and(|status| !status.is_terminal())
    }

    fn live_task_ids(&self) -> Vec<TaskId> {
        self.records
            .values()
            .filter(|record| !record.task.status.is_terminal())
            .map(|record| record.task.task_id.clone())
            .collect()
    }

    fn insert(&mut self, task: Task, options: Vec<String>) {
        let status = task.status;
        self.terminal_order.retain(|task_id| task_id != &task.task_id);
        self.records.insert(
            task.task_id.clone(),
            TaskRecord {
                task,
                options,
                history: vec![StatusChange {
                    status,
                    at_unix_ms: current_unix_timestamp_ms(),
                }],
            },
        );
    }

    fn transition(&mut self, task_id: &TaskId, next: TaskStatus) -> Result<(), FeedbackError> {
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| FeedbackError::validation(format!("unknown task '{task_id}'")))?;
        record.task.status.ensure_transition(next)?;
        record.task.status = next;
        record.history.push(StatusChange {
            status: next,
            at_unix_ms: current_unix_timestamp_ms(),
        });
        if next.is_terminal() {
            self.terminal_order.push_back(task_id.clone());
            self.evict_old_terminal_records();
        }
        Ok(())
    }

    fn evict_old_terminal_records(&mut self) {
        while self.terminal_order.len() > MAX_RETAINED_TERMINAL_TASKS {
            let Some(oldest) = self.terminal_order.pop_front() else {
                break;
            };
            if self
                .records
                .get(&oldest)
                .is_some_and(|record| record.task.status.is_terminal())
            {
                self.records.remove(&oldest);
            }
        }
    }
}

/// Handle to the presentation-owning thread.
///
/// All session creation, teardown and state transitions run on one thread
/// named `parley-presentation`; the public methods only enqueue commands and
/// may be called from any thread.
pub struct RequestCoordinator {
    sender: Sender<Command>,
    bridge: SynchronizationBridge,
    registry: Arc<Mutex<TaskRegistry>>,
    active_sessions: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("active_sessions", &self.active_session_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RequestCoordinator {
    pub fn start(surface: impl PresentationSurface) -> Result<Self> {
        Self::start_with_bridge(surface, SynchronizationBridge::new())
    }

    pub fn start_with_bridge(
        surface: impl PresentationSurface,
        bridge: SynchronizationBridge,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let registry = Arc::new(Mutex::new(TaskRegistry::default()));
        let active_sessions = Arc::new(AtomicUsize::new(0));

        let context_sender = sender.clone();
        let context_bridge = bridge.clone();
        let context_registry = Arc::clone(&registry);
        let context_active = Arc::clone(&active_sessions);
        let worker = thread::Builder::new()
            .name(OWNING_THREAD_NAME.to_string())
            .spawn(move || {
                let context = OwningContext {
                    surface: Box::new(surface),
                    sessions: HashMap::new(),
                    next_serial: 0,
                    sender: context_sender,
                    bridge: context_bridge,
                    registry: context_registry,
                    active_sessions: context_active,
                };
                context.run(receiver);
            })
            .context("failed to spawn presentation thread")?;

        Ok(Self {
            sender,
            bridge,
            registry,
            active_sessions,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn bridge(&self) -> &SynchronizationBridge {
        &self.bridge
    }

    /// Queues a session for `task_id`. A duplicate submit for a live task is
    /// ignored on the owning thread.
    pub fn submit(
        &self,
        task_id: TaskId,
        prompt: impl Into<String>,
        resolved_options: Vec<String>,
    ) -> Result<(), FeedbackError> {
        self.submit_task(Task::new(task_id, prompt, None), resolved_options)
    }

    pub fn submit_task(
        &self,
        task: Task,
        resolved_options: Vec<String>,
    ) -> Result<(), FeedbackError> {
        self.dispatch(Command::Submit {
            task,
            options: resolved_options,
        })
    }

    /// Delivers `result` for `task_id`, then tears the session down. The
    /// result is always attributed to `task_id`.
    pub fn complete(
        &self,
        task_id: TaskId,
        mut result: FeedbackResult,
    ) -> Result<(), FeedbackError> {
        if result.task_id != task_id {
            debug!(
                reason_code = "coordinator_result_task_id_rewritten",
                task_id = %task_id,
                result_task_id = %result.task_id,
                "result carried a different task id"
            );
            result.task_id = task_id.clone();
        }
        self.dispatch(Command::Feedback {
            task_id,
            session: None,
            result,
        })
    }

    /// Delivers an empty result for a session closed without feedback.
    /// Repeated calls for the same task are no-ops.
    pub fn cancel_on_close(&self, task_id: TaskId) -> Result<(), FeedbackError> {
        self.dispatch(Command::Closed {
            task_id,
            session: None,
        })
    }

    /// Marks a task timed out and discards its session without signaling.
    pub fn expire(&self, task_id: TaskId) -> Result<(), FeedbackError> {
        self.dispatch(Command::Expire { task_id })
    }

    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        lock_or_recover(&self.registry).status(task_id)
    }

    pub fn task_record(&self, task_id: &TaskId) -> Option<TaskRecord> {
        lock_or_recover(&self.registry).records.get(task_id).cloned()
    }

    pub fn active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.worker)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Cancels live tasks, closes their sessions and joins the owning thread.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
        let worker = lock_or_recover(&self.worker).take();
        let Some(worker) = worker else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!(
                reason_code = "coordinator_thread_panicked",
                "presentation thread panicked"
            );
        }
    }

    fn dispatch(&self, command: Command) -> Result<(), FeedbackError> {
        self.sender
            .send(command)
            .map_err(|_| FeedbackError::dispatch("presentation thread is not running"))
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum TeardownTiming {
    Deferred { close_session: bool },
    Immediate,
}

struct OpenSession {
    serial: u64,
    session: Box<dyn PresentationSession>,
}

struct OwningContext {
    surface: Box<dyn PresentationSurface>,
    sessions: HashMap<TaskId, OpenSession>,
    next_serial: u64,
    sender: Sender<Command>,
    bridge: SynchronizationBridge,
    registry: Arc<Mutex<TaskRegistry>>,
    active_sessions: Arc<AtomicUsize>,
}

impl OwningContext {
    fn run(mut self, receiver: Receiver<Command>) {
        info!(reason_code = "coordinator_started", "presentation thread started");
        while let Ok(command) = receiver.recv() {
            if !self.handle(command) {
                break;
            }
        }
        drop(receiver);
        let released = self.bridge.release_all();
        info!(
            reason_code = "coordinator_stopped",
            released_waiters = released,
            "presentation thread stopped"
        );
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { task, options } => self.open_session(task, options),
            Command::Feedback {
                task_id,
                session,
                result,
            } => {
                if self.is_current_session(&task_id, session) {
                    self.finish(
                        task_id,
                        TaskStatus::Completed,
                        Some(result),
                        TeardownTiming::Deferred {
                            close_session: true,
                        },
                    );
                }
            }
            Command::Closed { task_id, session } => {
                if self.is_current_session(&task_id, session) {
                    let result = FeedbackResult::empty(task_id.clone());
                    self.finish(
                        task_id,
                        TaskStatus::Cancelled,
                        Some(result),
                        TeardownTiming::Deferred {
                            close_session: false,
                        },
                    );
                }
            }
            Command::Teardown {
                task_id,
                session,
                close_session,
            } => self.teardown(&task_id, Some(session), close_session),
            Command::Expire { task_id } => {
                self.finish(task_id, TaskStatus::TimedOut, None, TeardownTiming::Immediate)
            }
            Command::Shutdown => {
                self.shutdown_sessions();
                return false;
            }
        }
        true
    }

    #[tracing::instrument(level = "debug", skip_all, fields(task_id = %task.task_id))]
    fn open_session(&mut self, task: Task, options: Vec<String>) {
        let task_id = task.task_id.clone();
        if lock_or_recover(&self.registry).is_live(&task_id) {
            warn!(
                reason_code = "coordinator_duplicate_submit_ignored",
                task_id = %task_id,
                "task already has an active session"
            );
            return;
        }
        if self.sessions.contains_key(&task_id) {
            // Terminal task whose deferred teardown has not run yet.
            debug!(
                reason_code = "coordinator_stale_session_replaced",
                task_id = %task_id,
                "closing previous session before reusing task id"
            );
            self.teardown(&task_id, None, true);
        }
        lock_or_recover(&self.registry).insert(task.clone(), options.clone());

        let request = SessionRequest {
            task_id: task_id.clone(),
            prompt: task.prompt,
            options,
        };
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        let events = SessionEvents::new(task_id.clone(), serial, self.sender.clone());
        let surface = &mut self.surface;
        let created = catch_unwind(AssertUnwindSafe(|| surface.create(request, events)));
        let failure = match created {
            Ok(Ok(session)) => {
                if let Err(error) =
                    lock_or_recover(&self.registry).transition(&task_id, TaskStatus::AwaitingUser)
                {
                    warn!(
                        reason_code = error.reason_code(),
                        task_id = %task_id,
                        error = %error,
                        "task could not enter awaiting_user"
                    );
                }
                self.sessions
                    .insert(task_id.clone(), OpenSession { serial, session });
                self.publish_active_count();
                debug!(
                    reason_code = "coordinator_session_opened",
                    task_id = %task_id,
                    "presentation session opened"
                );
                return;
            }
            Ok(Err(error)) => format!("{error:#}"),
            Err(_) => "presentation surface panicked while creating a session".to_string(),
        };

        warn!(
            reason_code = PRESENTATION_CREATE_FAILED,
            task_id = %task_id,
            error = %failure,
            "presentation session could not be created"
        );
        let result = FeedbackResult::error(task_id.clone(), PRESENTATION_CREATE_FAILED, failure);
        self.finish(task_id, TaskStatus::Completed, Some(result), TeardownTiming::Immediate);
    }

    fn is_current_session(&self, task_id: &TaskId, session: Option<u64>) -> bool {
        let Some(serial) = session else {
            return true;
        };
        let current = self
            .sessions
            .get(task_id)
            .is_some_and(|open| open.serial == serial);
        if !current {
            debug!(
                reason_code = "coordinator_stale_session_event_ignored",
                task_id = %task_id,
                session = serial,
                "event from a replaced or discarded session"
            );
        }
        current
    }

    fn finish(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        result: Option<FeedbackResult>,
        timing: TeardownTiming,
    ) {
        // A waiter that already timed out turns any late outcome into TimedOut.
        let waiter_timed_out = self.bridge.take_abandoned(&task_id);
        let status = if waiter_timed_out && status != TaskStatus::TimedOut {
            debug!(
                reason_code = "coordinator_reply_after_timeout",
                task_id = %task_id,
                requested = status.as_str(),
                "outcome arrived after the caller timed out"
            );
            TaskStatus::TimedOut
        } else {
            status
        };
        let transitioned = lock_or_recover(&self.registry).transition(&task_id, status);
        if let Err(error) = transitioned {
            debug!(
                reason_code = "coordinator_event_ignored",
                task_id = %task_id,
                status = status.as_str(),
                error = %error,
                "task event ignored"
            );
            return;
        }
        debug!(
            reason_code = "coordinator_task_finished",
            task_id = %task_id,
            status = status.as_str(),
            "task reached terminal status"
        );

        // Teardown is queued before the waiter wakes, so a caller reusing the
        // id always finds its submit behind this teardown.
        match timing {
            TeardownTiming::Deferred { close_session } => {
                if let Some(serial) = self.sessions.get(&task_id).map(|open| open.serial) {
                    let _ = self.sender.send(Command::Teardown {
                        task_id: task_id.clone(),
                        session: serial,
                        close_session,
                    });
                }
            }
            TeardownTiming::Immediate => self.teardown(&task_id, None, true),
        }
        if let Some(result) = result.filter(|_| !waiter_timed_out) {
            self.bridge.signal(&task_id, result);
        }
    }

    /// Discards the session for `task_id`; with `session` set, only when it
    /// is still that session.
    fn teardown(&mut self, task_id: &TaskId, session: Option<u64>, close_session: bool) {
        let matches = self
            .sessions
            .get(task_id)
            .is_some_and(|open| session.map_or(true, |serial| open.serial == serial));
        if !matches {
            return;
        }
        let Some(mut open) = self.sessions.remove(task_id) else {
            return;
        };
        if close_session {
            close_quietly(task_id, open.session.as_mut());
        }
        drop(open);
        self.publish_active_count();
        debug!(
            reason_code = "coordinator_session_torn_down",
            task_id = %task_id,
            "presentation session discarded"
        );
    }

    fn shutdown_sessions(&mut self) {
        let live = lock_or_recover(&self.registry).live_task_ids();
        for task_id in live {
            if lock_or_recover(&self.registry)
                .transition(&task_id, TaskStatus::Cancelled)
                .is_ok()
            {
                self.bridge
                    .signal(&task_id, FeedbackResult::empty(task_id.clone()));
            }
        }
        for (task_id, mut open) in self.sessions.drain() {
            close_quietly(&task_id, open.session.as_mut());
        }
        self.publish_active_count();
    }

    fn publish_active_count(&self) {
        self.active_sessions
            .store(self.sessions.len(), Ordering::Release);
    }
}

fn close_quietly(task_id: &TaskId, session: &mut dyn PresentationSession) {
    if catch_unwind(AssertUnwindSafe(|| session.close())).is_err() {
        warn!(
            reason_code = "presentation_close_panicked",
            task_id = %task_id,
            "presentation session panicked while closing"
        );
    }
}
