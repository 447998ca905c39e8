//! Per-task single-slot hand-off between the coordinator and blocked callers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::types::{FeedbackError, FeedbackResult, TaskId};

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum SlotState {
    Waiting,
    Filled(FeedbackResult),
    Consumed,
    Abandoned,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct BridgeInner {
    slots: Mutex<HashMap<TaskId, Arc<Slot>>>,
    /// Tasks whose waiter gave up before a result arrived.
    abandoned: Mutex<HashSet<TaskId>>,
}

impl BridgeInner {
    fn slot(&self, task_id: &TaskId) -> Option<Arc<Slot>> {
        lock_or_recover(&self.slots).get(task_id).cloned()
    }

    fn deregister(&self, task_id: &TaskId, slot: &Arc<Slot>) {
        let mut slots = lock_or_recover(&self.slots);
        if slots
            .get(task_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, slot))
        {
            slots.remove(task_id);
        }
    }
}

/// Result of [`WaitHandle::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Delivered(FeedbackResult),
    TimedOut,
    /// The handle already returned a result or timed out earlier.
    AlreadyConsumed,
}

/// Registry of open wait slots keyed by task id.
///
/// The registry lock is held only to look up, insert or remove a slot; each
/// caller blocks on its own slot's condition variable, so a slow task never
/// delays signals for another.
#[derive(Debug, Clone, Default)]
pub struct SynchronizationBridge {
    inner: Arc<BridgeInner>,
}

impl SynchronizationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `task_id`. Fails if one is already open.
    pub fn open(&self, task_id: TaskId) -> Result<WaitHandle, FeedbackError> {
        let mut slots = lock_or_recover(&self.inner.slots);
        if slots.contains_key(&task_id) {
            return Err(FeedbackError::validation(format!(
                "task '{task_id}' already has an open waiter"
            )));
        }
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Waiting),
            ready: Condvar::new(),
        });
        slots.insert(task_id.clone(), Arc::clone(&slot));
        lock_or_recover(&self.inner.abandoned).remove(&task_id);
        Ok(WaitHandle {
            task_id,
            slot,
            bridge: Arc::clone(&self.inner),
        })
    }

    /// Fills the slot for `task_id` and wakes its waiter.
    ///
    /// Returns false, without side effects, when the slot is unknown, already
    /// filled or abandoned after a timeout.
    pub fn signal(&self, task_id: &TaskId, result: FeedbackResult) -> bool {
        let Some(slot) = self.inner.slot(task_id) else {
            debug!(
                reason_code = "bridge_late_signal_dropped",
                task_id = %task_id,
                "no open waiter for task"
            );
            return false;
        };
        let mut state = lock_or_recover(&slot.state);
        if !matches!(*state, SlotState::Waiting) {
            debug!(
                reason_code = "bridge_duplicate_signal_dropped",
                task_id = %task_id,
                "waiter slot already settled"
            );
            return false;
        }
        *state = SlotState::Filled(result);
        slot.ready.notify_one();
        true
    }

    /// Releases every still-waiting slot with an empty result.
    pub fn release_all(&self) -> usize {
        let slots = lock_or_recover(&self.inner.slots)
            .iter()
            .map(|(task_id, slot)| (task_id.clone(), Arc::clone(slot)))
            .collect::<Vec<_>>();
        let mut released = 0;
        for (task_id, slot) in slots {
            let mut state = lock_or_recover(&slot.state);
            if matches!(*state, SlotState::Waiting) {
                *state = SlotState::Filled(FeedbackResult::empty(task_id));
                slot.ready.notify_one();
                released += 1;
            }
        }
        released
    }

    /// Clears and returns the timed-out mark left by the last waiter of
    /// `task_id`. The mark is reset whenever a new waiter is opened.
    pub fn take_abandoned(&self, task_id: &TaskId) -> bool {
        lock_or_recover(&self.inner.abandoned).remove(task_id)
    }

    pub fn is_open(&self, task_id: &TaskId) -> bool {
        self.inner.slot(task_id).is_some()
    }

    pub fn open_count(&self) -> usize {
        lock_or_recover(&self.inner.slots).len()
    }
}

/// Caller-side end of one bridge slot.
///
/// Dropping the handle deregisters the slot, so later signals are discarded.
#[derive(Debug)]
pub struct WaitHandle {
    task_id: TaskId,
    slot: Arc<Slot>,
    bridge: Arc<BridgeInner>,
}

impl WaitHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Blocks the calling thread until the slot is signaled or `timeout`
    /// elapses. A result is returned at most once per handle.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let guard = lock_or_recover(&self.slot.state);
        let (mut state, _) = self
            .slot
            .ready
            .wait_timeout_while(guard, timeout, |state| matches!(state, SlotState::Waiting))
            .unwrap_or_else(PoisonError::into_inner);

        let outcome = match std::mem::replace(&mut *state, SlotState::Consumed) {
            SlotState::Filled(result) => WaitOutcome::Delivered(result),
            SlotState::Waiting => {
                *state = SlotState::Abandoned;
                lock_or_recover(&self.bridge.abandoned).insert(self.task_id.clone());
                WaitOutcome::TimedOut
            }
            previous @ (SlotState::Consumed | SlotState::Abandoned) => {
                *state = previous;
                return WaitOutcome::AlreadyConsumed;
            }
        };
        drop(state);
        self.bridge.deregister(&self.task_id, &self.slot);
        outcome
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.bridge.deregister(&self.task_id, &self.slot);
    }
}
