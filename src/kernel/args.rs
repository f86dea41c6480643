//! Memory bound to a running task
//!
//! Before a task runs, every declared access is locked and bound to a slot.
//! Kernel bodies reach the data through their accessors; an accessor taken
//! from another command group panics, which the queue reports as a fault.

use std::any::Any;

use super::task::TaskId;
use crate::error::{OffloadError, OffloadResult};
use crate::memory::storage::{ExclusiveView, SharedView};
use crate::memory::{AccessMode, AccessRequest, Accessor, Element, Readable, Writable};

pub struct KernelArgs {
    tag: u64,
    task: TaskId,
    slots: Vec<Box<dyn Any>>,
}

impl KernelArgs {
    /// Arguments with nothing bound
    pub(crate) fn empty(task: TaskId) -> Self {
        Self {
            tag: 0,
            task,
            slots: Vec::new(),
        }
    }

    /// Lock every requested window for the duration of the task
    ///
    /// Locks are taken in `BufferId` order so tasks sharing buffers can never
    /// wait on each other in a cycle.
    pub(crate) fn bind(tag: u64, task: TaskId, requests: &[AccessRequest]) -> OffloadResult<Self> {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| requests[i].buffer);

        let mut bound: Vec<Option<Box<dyn Any>>> = (0..requests.len()).map(|_| None).collect();
        for i in order {
            let request = &requests[i];
            let storage = request
                .storage
                .upgrade()
                .filter(|s| !s.is_released())
                .ok_or(OffloadError::DanglingBufferReference(request.buffer.0))?;
            bound[i] = Some(storage.bind(request.mode, request.offset, request.len));
        }

        let slots = bound
            .into_iter()
            .map(|slot| slot.ok_or_else(|| crate::internal_error!("unbound access slot")))
            .collect::<OffloadResult<Vec<_>>>()?;

        Ok(Self { tag, task, slots })
    }

    /// Task the arguments belong to
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Elements visible through a readable accessor
    pub fn slice<T: Element, M: Readable>(&self, acc: Accessor<T, M>) -> &[T] {
        let slot = self.slot(acc.tag, acc.slot);
        match M::MODE {
            AccessMode::ReadOnly => downcast::<SharedView<T>>(slot).as_slice(),
            _ => downcast::<ExclusiveView<T>>(slot).as_slice(),
        }
    }

    /// Mutable elements behind a writable accessor
    pub fn slice_mut<T: Element, M: Writable>(&mut self, acc: Accessor<T, M>) -> &mut [T] {
        self.check_tag(acc.tag);
        let slot = self
            .slots
            .get_mut(acc.slot)
            .unwrap_or_else(|| panic!("accessor slot {} is not bound", acc.slot));
        slot.downcast_mut::<ExclusiveView<T>>()
            .unwrap_or_else(|| panic!("accessor does not match its bound memory"))
            .as_mut_slice()
    }

    /// Read one element; panics when `index` is out of bounds
    pub fn get<T: Element, M: Readable>(&self, acc: Accessor<T, M>, index: usize) -> T {
        self.slice(acc)[index]
    }

    /// Write one element; panics when `index` is out of bounds
    pub fn set<T: Element, M: Writable>(&mut self, acc: Accessor<T, M>, index: usize, value: T) {
        self.slice_mut(acc)[index] = value;
    }

    fn slot(&self, tag: u64, slot: usize) -> &dyn Any {
        self.check_tag(tag);
        self.slots
            .get(slot)
            .unwrap_or_else(|| panic!("accessor slot {} is not bound", slot))
            .as_ref()
    }

    fn check_tag(&self, tag: u64) {
        if tag != self.tag {
            panic!(
                "accessor used outside the command group that created it (task {})",
                self.task
            );
        }
    }
}

fn downcast<V: 'static>(slot: &dyn Any) -> &V {
    slot.downcast_ref::<V>()
        .unwrap_or_else(|| panic!("accessor does not match its bound memory"))
}

impl std::fmt::Debug for KernelArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelArgs")
            .field("task", &self.task)
            .field("slots", &self.slots.len())
            .finish()
    }
}
