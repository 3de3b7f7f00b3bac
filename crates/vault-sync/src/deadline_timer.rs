//! Per-task promise with a required response count and timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::trace;

/// A unique handle for one in-flight `DeadlineTimer` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

struct TaskState<R> {
    responses: Mutex<Vec<R>>,
    fired: std::sync::atomic::AtomicBool,
    notify: Notify,
}

/// Tracks pending request/response tasks. Each task is completed either when
/// `required_count` responses arrive or its timeout elapses, whichever
/// happens first; the completion functor always runs off the internal lock,
/// on the async runtime's worker pool.
pub struct DeadlineTimer<R> {
    tasks: Mutex<HashMap<TaskId, Arc<TaskState<R>>>>,
}

impl<R: Send + 'static> Default for DeadlineTimer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> DeadlineTimer<R> {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }

    /// Starts a task. `on_complete` is invoked exactly once, with whatever
    /// responses had arrived by the time the task completed.
    pub fn add_task<F>(&self, task_id: TaskId, timeout: Duration, required_count: usize, on_complete: F)
    where
        F: FnOnce(Vec<R>) + Send + 'static,
    {
        let state = Arc::new(TaskState {
            responses: Mutex::new(Vec::new()),
            fired: std::sync::atomic::AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.tasks.lock().insert(task_id, state.clone());

        tokio::spawn(async move {
            tokio::select! {
                () = sleep(timeout) => {
                    trace!(task_id = task_id.0, "deadline timer expired");
                }
                () = state.notify.notified() => {
                    trace!(task_id = task_id.0, "deadline timer satisfied early");
                }
            }
            state.fired.store(true, std::sync::atomic::Ordering::SeqCst);
            let responses = std::mem::take(&mut *state.responses.lock());
            on_complete(responses);
            let _ = required_count; // documents the intended firing condition; enforced in add_response
        });
    }

    /// Folds a response into the named task. Responses arriving after the
    /// task has fired are silently discarded — not an error.
    pub fn add_response(&self, task_id: TaskId, response: R, required_count: usize) {
        let state = { self.tasks.lock().get(&task_id).cloned() };
        let Some(state) = state else {
            return; // task unknown (already reaped) — discard
        };
        if state.fired.load(std::sync::atomic::Ordering::SeqCst) {
            return; // late response — discard
        }
        let len = {
            let mut responses = state.responses.lock();
            responses.push(response);
            responses.len()
        };
        if len >= required_count {
            state.notify.notify_one();
        }
    }

    /// Removes a task's bookkeeping entry. Called by the owning persona
    /// once it has consumed the completion callback's result, so the task
    /// map does not grow unboundedly.
    pub fn forget(&self, task_id: TaskId) {
        self.tasks.lock().remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn completes_on_required_count_before_timeout() {
        let timer: DeadlineTimer<u32> = DeadlineTimer::new();
        let result = Arc::new(Mutex::new(None));
        let result2 = result.clone();
        timer.add_task(TaskId(1), Duration::from_secs(5), 2, move |responses| {
            *result2.lock() = Some(responses);
        });
        timer.add_response(TaskId(1), 10, 2);
        timer.add_response(TaskId(1), 20, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = result.lock().clone().expect("functor ran");
        assert_eq!(got.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_timeout_with_whatever_arrived() {
        let timer: DeadlineTimer<u32> = DeadlineTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        timer.add_task(TaskId(2), Duration::from_millis(50), 5, move |responses| {
            fired2.store(responses.len(), Ordering::SeqCst);
        });
        timer.add_response(TaskId(2), 1, 5);
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_fire_is_discarded() {
        let timer: DeadlineTimer<u32> = DeadlineTimer::new();
        timer.add_task(TaskId(3), Duration::from_millis(10), 1, |_| {});
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        // Should not panic and should simply be dropped.
        timer.add_response(TaskId(3), 42, 1);
    }
}
