//! Completion handles for submitted tasks

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::kernel::{TaskId, TaskState};

type Callback = Box<dyn FnOnce(TaskState) + Send>;

/// Timestamps recorded for a task on a profiling-enabled queue
#[derive(Debug, Clone, Copy)]
pub struct ProfilingInfo {
    pub submitted: Instant,
    pub started: Instant,
    pub ended: Instant,
}

impl ProfilingInfo {
    /// Time between submission and the start of execution
    pub fn queue_delay(&self) -> Duration {
        self.started.saturating_duration_since(self.submitted)
    }

    pub fn execution_time(&self) -> Duration {
        self.ended.saturating_duration_since(self.started)
    }
}

struct EventState {
    status: TaskState,
    callbacks: Vec<Callback>,
    submitted: Option<Instant>,
    started: Option<Instant>,
    ended: Option<Instant>,
}

struct EventInner {
    task: TaskId,
    label: String,
    predecessors: Vec<TaskId>,
    profiling: bool,
    state: Mutex<EventState>,
    finished: Condvar,
}

/// Cheap, clonable handle to one task's completion
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(task: TaskId, label: String, predecessors: Vec<TaskId>, profiling: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                task,
                label,
                predecessors,
                profiling,
                state: Mutex::new(EventState {
                    status: TaskState::Submitted,
                    callbacks: Vec::new(),
                    submitted: profiling.then(Instant::now),
                    started: None,
                    ended: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Tasks this one was ordered after, fixed at submission
    pub fn predecessors(&self) -> &[TaskId] {
        &self.inner.predecessors
    }

    pub fn status(&self) -> TaskState {
        self.inner.state.lock().status
    }

    /// True once the task has completed or failed
    pub fn is_complete(&self) -> bool {
        self.status().is_finished()
    }

    /// Block until the task is finished and return its final state
    pub fn wait(&self) -> TaskState {
        let mut state = self.inner.state.lock();
        while !state.status.is_finished() {
            self.inner.finished.wait(&mut state);
        }
        state.status
    }

    /// Wait for every event in turn
    pub fn wait_all<'a, I>(events: I)
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            event.wait();
        }
    }

    /// Timestamps, available once a task on a profiling queue has finished
    pub fn profiling(&self) -> Option<ProfilingInfo> {
        if !self.inner.profiling {
            return None;
        }
        let state = self.inner.state.lock();
        Some(ProfilingInfo {
            submitted: state.submitted?,
            started: state.started?,
            ended: state.ended?,
        })
    }

    pub(crate) fn same_as(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_status(&self, status: TaskState) {
        let mut state = self.inner.state.lock();
        if state.status.is_finished() {
            return;
        }
        if status == TaskState::Dispatched && self.inner.profiling {
            state.started = Some(Instant::now());
        }
        state.status = status;
    }

    /// Run `callback` once the event finishes
    ///
    /// Returns the final state instead when the event is already finished;
    /// the callback is dropped in that case.
    pub(crate) fn on_complete<F>(&self, callback: F) -> Result<(), TaskState>
    where
        F: FnOnce(TaskState) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.status.is_finished() {
            return Err(state.status);
        }
        state.callbacks.push(Box::new(callback));
        Ok(())
    }

    /// Record the final state, wake waiters and run callbacks outside the lock
    pub(crate) fn complete(&self, status: TaskState) {
        debug_assert!(status.is_finished());
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.status.is_finished() {
                return;
            }
            if self.inner.profiling {
                let now = Instant::now();
                state.started.get_or_insert(now);
                state.ended = Some(now);
            }
            state.status = status;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.finished.notify_all();

        for callback in callbacks {
            callback(status);
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("task", &self.inner.task)
            .field("label", &self.inner.label)
            .field("status", &self.status())
            .field("predecessors", &self.inner.predecessors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn event(profiling: bool) -> Event {
        Event::new(TaskId::next(), "test".to_string(), vec![TaskId(1)], profiling)
    }

    #[test]
    fn test_wait_returns_final_state() {
        let ev = event(false);
        let waiter = {
            let ev = ev.clone();
            thread::spawn(move || ev.wait())
        };
        ev.set_status(TaskState::Dispatched);
        ev.complete(TaskState::Completed);
        assert_eq!(waiter.join().unwrap(), TaskState::Completed);
        assert!(ev.is_complete());
        assert_eq!(ev.predecessors(), &[TaskId(1)]);
    }

    #[test]
    fn test_callbacks_run_once() {
        let ev = event(false);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            ev.on_complete(move |state| {
                assert_eq!(state, TaskState::Failed);
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        ev.complete(TaskState::Failed);
        ev.complete(TaskState::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(ev.status(), TaskState::Failed);
        assert_eq!(ev.on_complete(|_| {}), Err(TaskState::Failed));
    }

    #[test]
    fn test_profiling_timestamps() {
        let ev = event(true);
        assert!(ev.profiling().is_none());
        ev.set_status(TaskState::Dispatched);
        ev.complete(TaskState::Completed);
        let info = ev.profiling().unwrap();
        assert!(info.ended >= info.started);
        assert!(info.started >= info.submitted);

        let plain = event(false);
        plain.complete(TaskState::Completed);
        assert!(plain.profiling().is_none());
    }
}
