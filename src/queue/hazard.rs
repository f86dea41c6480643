//! Data-hazard inference over buffer accesses
//!
//! Every buffer carries its own [`BufferHazards`] record, so tasks on
//! different queues that share a buffer are ordered like tasks on one queue:
//! - a read depends on the last writer (read-after-write)
//! - a write depends on the last writer and every reader since it
//!   (write-after-write, write-after-read)
//!
//! Finished readers and successful writers stop producing edges. A writer
//! that failed stays an edge for later reads until a write-only access
//! replaces its contents, so data derived from a failed task fails the same
//! way whether the reader is submitted before or after the failure.

use parking_lot::{Mutex, MutexGuard};

use crate::kernel::TaskState;
use crate::memory::AccessMode;
use crate::queue::Event;

static SUBMISSION_ORDER: Mutex<()> = parking_lot::const_mutex(());

/// Serialise hazard registration across every queue in the process
///
/// Held while a task reads and updates the records of all its buffers, so
/// edges only ever point at earlier submissions and cannot form a cycle.
pub(crate) fn submission_order() -> MutexGuard<'static, ()> {
    SUBMISSION_ORDER.lock()
}

/// Ordering constraint on an earlier task
#[derive(Clone)]
pub(crate) struct HazardEdge {
    pub event: Event,
    /// Failure of `event` fails the dependent instead of merely ordering it
    pub carries_failure: bool,
}

/// Last writer and readers since that write, for one buffer
#[derive(Default)]
pub(crate) struct BufferHazards {
    last_writer: Option<Event>,
    readers: Vec<Event>,
}

impl BufferHazards {
    /// Edges an access in `mode` must wait for
    pub(crate) fn edges(&self, mode: AccessMode) -> Vec<HazardEdge> {
        let mut edges = Vec::new();

        if let Some(writer) = &self.last_writer {
            let status = writer.status();
            if mode.reads() {
                if !status.is_finished() || status == TaskState::Failed {
                    edges.push(HazardEdge {
                        event: writer.clone(),
                        carries_failure: true,
                    });
                }
            } else if !status.is_finished() {
                edges.push(HazardEdge {
                    event: writer.clone(),
                    carries_failure: false,
                });
            }
        }

        if mode.writes() {
            edges.extend(
                self.readers
                    .iter()
                    .filter(|r| !r.is_complete())
                    .map(|r| HazardEdge {
                        event: r.clone(),
                        carries_failure: false,
                    }),
            );
        }
        edges
    }

    /// Record `event` as the newest access in `mode`
    pub(crate) fn commit(&mut self, event: &Event, mode: AccessMode) {
        if mode.writes() {
            self.last_writer = Some(event.clone());
            self.readers.clear();
        } else {
            self.readers.retain(|r| !r.is_complete());
            self.readers.push(event.clone());
        }
    }
}
