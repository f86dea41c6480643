//! Kernel task identity, lifecycle states and executable commands

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::args::KernelArgs;
use super::range::{Item, Range};
use crate::memory::AccessRequest;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable opaque identifier assigned to every submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a kernel task
///
/// `Created -> Submitted -> Waiting -> Dispatched -> Completed | Failed`.
/// `Waiting` is skipped when the task has no unfinished predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Submitted,
    Waiting,
    Dispatched,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

pub(crate) type KernelBody = Box<dyn FnMut(Item, &mut KernelArgs) + Send>;
pub(crate) type SingleBody = Box<dyn FnOnce(&mut KernelArgs) + Send>;

/// The action a command group enqueues
pub(crate) enum Command {
    ParallelFor { range: Range, body: KernelBody },
    Single(SingleBody),
    /// No work; orders on its dependencies only
    Barrier,
}

impl Command {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Command::ParallelFor { .. } => "parallel_for",
            Command::Single(_) => "single_task",
            Command::Barrier => "barrier",
        }
    }
}

/// A submitted unit of work with its declared accesses
pub(crate) struct KernelTask {
    pub id: TaskId,
    pub label: String,
    /// Tag of the command group; only its accessors resolve at run time
    pub tag: u64,
    pub requests: Vec<AccessRequest>,
    pub command: Command,
}

impl KernelTask {
    /// Run the command against bound memory. Panics inside the body are
    /// caught and returned as the fault message.
    pub(crate) fn run(command: Command, args: &mut KernelArgs) -> Result<(), String> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match command {
            Command::ParallelFor { range, mut body } => {
                for item in range.items() {
                    body(item, args);
                }
            }
            Command::Single(body) => body(args),
            Command::Barrier => {}
        }));
        result.map_err(panic_message)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "kernel panicked".to_string()
    }
}
