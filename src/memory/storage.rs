//! Device-side storage shared by buffers and USM allocations
//!
//! Element data sits behind a `parking_lot` reader/writer lock. A task takes
//! owned (`Arc`) guards for each declared access while it runs, so even
//! accesses the queue does not hazard-track cannot race. The storage also
//! owns the buffer's hazard record, so ordering follows the buffer rather than
//! the queue that submitted to it.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use serde::Serialize;

use super::accessor::AccessMode;
use crate::queue::hazard::BufferHazards;
use crate::queue::Event;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Element types that can live in device memory
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Default + Send + Sync + 'static {}

/// Process-unique identity of a buffer or device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BufferId(pub u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Events of tasks that declared an access to one storage
#[derive(Default)]
struct UsageLog {
    entries: Mutex<Vec<(Event, AccessMode)>>,
}

impl UsageLog {
    fn record(&self, event: Event, mode: AccessMode) {
        let mut entries = self.entries.lock();
        entries.retain(|(e, _)| !e.is_complete());
        entries.push((event, mode));
    }

    fn outstanding(&self, writers_only: bool) -> Vec<Event> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(e, mode)| !e.is_complete() && (!writers_only || mode.writes()))
            .map(|(e, _)| e.clone())
            .collect()
    }
}

/// Typed storage behind a buffer or device pointer
pub struct Storage<T> {
    id: BufferId,
    len: usize,
    /// Buffers take part in hazard inference; USM allocations do not
    tracked: bool,
    data: Arc<RwLock<Vec<T>>>,
    hazards: Mutex<BufferHazards>,
    usage: UsageLog,
    released: AtomicBool,
}

impl<T: Element> Storage<T> {
    pub(crate) fn new(data: Vec<T>, tracked: bool) -> Self {
        Self {
            id: BufferId::next(),
            len: data.len(),
            tracked,
            data: Arc::new(RwLock::new(data)),
            hazards: Mutex::new(BufferHazards::default()),
            usage: UsageLog::default(),
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> BufferId {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn data(&self) -> &RwLock<Vec<T>> {
        &self.data
    }

    /// Block until every in-flight writer has finished
    pub(crate) fn wait_writers(&self) {
        for event in self.usage.outstanding(true) {
            event.wait();
        }
    }

    /// Block until every in-flight user has finished
    pub(crate) fn wait_all(&self) {
        for event in self.usage.outstanding(false) {
            event.wait();
        }
    }

    /// Mark released and free the element data. Returns false if it was
    /// already released.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.data.write() = Vec::new();
        true
    }
}

/// Type-erased view of a storage used by the scheduler
pub(crate) trait ErasedStorage: Send + Sync {
    fn id(&self) -> BufferId;
    fn is_released(&self) -> bool;
    fn is_tracked(&self) -> bool;
    fn record_use(&self, event: Event, mode: AccessMode);
    /// Writer and reader record shared by every queue using this storage
    fn hazards(&self) -> &Mutex<BufferHazards>;
    /// Lock for the duration of one task and return the typed view
    fn bind(&self, mode: AccessMode, offset: usize, len: usize) -> Box<dyn Any>;
}

impl<T: Element> ErasedStorage for Storage<T> {
    fn id(&self) -> BufferId {
        self.id
    }

    fn is_released(&self) -> bool {
        Storage::is_released(self)
    }

    fn is_tracked(&self) -> bool {
        self.tracked
    }

    fn record_use(&self, event: Event, mode: AccessMode) {
        self.usage.record(event, mode);
    }

    fn hazards(&self) -> &Mutex<BufferHazards> {
        &self.hazards
    }

    fn bind(&self, mode: AccessMode, offset: usize, len: usize) -> Box<dyn Any> {
        match mode {
            AccessMode::ReadOnly => Box::new(SharedView {
                guard: self.data.read_arc(),
                offset,
                len,
            }),
            AccessMode::WriteOnly | AccessMode::ReadWrite => Box::new(ExclusiveView {
                guard: self.data.write_arc(),
                offset,
                len,
            }),
        }
    }
}

/// Read-locked window into a storage
pub(crate) struct SharedView<T: 'static> {
    guard: ArcRwLockReadGuard<RawRwLock, Vec<T>>,
    offset: usize,
    len: usize,
}

impl<T> SharedView<T> {
    pub(crate) fn as_slice(&self) -> &[T] {
        &self.guard[self.offset..self.offset + self.len]
    }
}

/// Write-locked window into a storage
pub(crate) struct ExclusiveView<T: 'static> {
    guard: ArcRwLockWriteGuard<RawRwLock, Vec<T>>,
    offset: usize,
    len: usize,
}

impl<T> ExclusiveView<T> {
    pub(crate) fn as_slice(&self) -> &[T] {
        &self.guard[self.offset..self.offset + self.len]
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.guard[self.offset..self.offset + self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Storage::new(vec![0u8; 4], true);
        let b = Storage::new(vec![0u8; 4], true);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_bind_windows() {
        let storage = Storage::new((0..8).collect::<Vec<i32>>(), true);

        let view = storage.bind(AccessMode::ReadOnly, 2, 3);
        let shared = view.downcast_ref::<SharedView<i32>>().unwrap();
        assert_eq!(shared.as_slice(), &[2, 3, 4]);
        drop(view);

        let mut view = storage.bind(AccessMode::ReadWrite, 6, 2);
        let exclusive = view.downcast_mut::<ExclusiveView<i32>>().unwrap();
        exclusive.as_mut_slice()[1] = 70;
        drop(view);

        assert_eq!(storage.data().read()[7], 70);
    }

    #[test]
    fn test_release_is_one_shot() {
        let storage = Storage::new(vec![1.0f32; 16], false);
        assert!(!storage.is_released());
        assert!(storage.release());
        assert!(storage.is_released());
        assert!(storage.data().read().is_empty());
        assert!(!storage.release());
    }
}
