//! Command-group handler: collects access requests, explicit dependencies
//! and the single command of one submission

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::args::KernelArgs;
use super::range::{Item, Range};
use super::task::Command;
use crate::error::{OffloadError, OffloadResult};
use crate::memory::storage::ErasedStorage;
use crate::memory::{
    AccessMarker, AccessRequest, Accessor, Element, MemoryObject, ReadOnly, ReadWrite, WriteOnly,
};
use crate::queue::Event;

static NEXT_HANDLER_TAG: AtomicU64 = AtomicU64::new(1);

pub struct Handler {
    tag: u64,
    label: Option<String>,
    requests: Vec<AccessRequest>,
    seen: HashSet<u64>,
    deps: Vec<Event>,
    command: Option<Command>,
}

/// Everything a finished command group hands to the queue
pub(crate) struct CommandGroup {
    pub tag: u64,
    pub label: Option<String>,
    pub requests: Vec<AccessRequest>,
    pub deps: Vec<Event>,
    pub command: Command,
}

impl Handler {
    pub(crate) fn new() -> Self {
        Self {
            tag: NEXT_HANDLER_TAG.fetch_add(1, Ordering::Relaxed),
            label: None,
            requests: Vec::new(),
            seen: HashSet::new(),
            deps: Vec::new(),
            command: None,
        }
    }

    /// Declare read-only access to the whole object
    pub fn read<T: Element, O: MemoryObject<T>>(&mut self, obj: &O) -> OffloadResult<Accessor<T, ReadOnly>> {
        self.access(obj)
    }

    /// Declare write-only access to the whole object
    pub fn write<T: Element, O: MemoryObject<T>>(&mut self, obj: &O) -> OffloadResult<Accessor<T, WriteOnly>> {
        self.access(obj)
    }

    /// Declare read-write access to the whole object
    pub fn read_write<T: Element, O: MemoryObject<T>>(
        &mut self,
        obj: &O,
    ) -> OffloadResult<Accessor<T, ReadWrite>> {
        self.access(obj)
    }

    /// Declare an access to the whole object with the mode given by `M`
    pub fn access<T, M, O>(&mut self, obj: &O) -> OffloadResult<Accessor<T, M>>
    where
        T: Element,
        M: AccessMarker,
        O: MemoryObject<T>,
    {
        let len = obj.storage().len();
        self.access_range(obj, 0, len)
    }

    /// Declare an access to `len` elements starting at `offset`
    pub fn access_range<T, M, O>(&mut self, obj: &O, offset: usize, len: usize) -> OffloadResult<Accessor<T, M>>
    where
        T: Element,
        M: AccessMarker,
        O: MemoryObject<T>,
    {
        let storage = obj.storage();
        let id = storage.id();

        if storage.is_released() {
            return Err(OffloadError::DanglingBufferReference(id.0));
        }
        if storage.len() == 0 {
            return Err(crate::range_error!("buffer {} has no elements", id));
        }
        if len == 0 || offset.checked_add(len).map_or(true, |end| end > storage.len()) {
            return Err(crate::range_error!(
                "window [{}, {}+{}) is outside buffer {} of {} elements",
                offset,
                offset,
                len,
                id,
                storage.len()
            ));
        }
        if !self.seen.insert(id.0) {
            return Err(OffloadError::DuplicateAccess(id.0));
        }

        let erased: Arc<dyn ErasedStorage> = storage.clone();
        let slot = self.requests.len();
        self.requests.push(AccessRequest {
            storage: Arc::downgrade(&erased),
            buffer: id,
            mode: M::MODE,
            offset,
            len,
            tracked: erased.is_tracked(),
        });
        Ok(Accessor::new(self.tag, slot, id, len))
    }

    /// Add an explicit predecessor
    pub fn depends_on(&mut self, event: &Event) {
        self.deps.push(event.clone());
    }

    /// Add several explicit predecessors
    pub fn depends_on_all<'e, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'e Event>,
    {
        self.deps.extend(events.into_iter().cloned());
    }

    /// Human-readable label for logs and faults
    pub fn set_name(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Run `body` once per work-item of `range`
    ///
    /// The emulated device runs a kernel's work-items one after another in
    /// linear-id order on a single worker lane. Other lanes serve independent
    /// tasks, so bodies must not wait on each other within one launch.
    /// A domain whose size overflows `usize` is rejected with `InvalidRange`.
    pub fn parallel_for<R, F>(&mut self, range: R, body: F) -> OffloadResult<()>
    where
        R: Into<Range>,
        F: Fn(Item, &mut KernelArgs) + Send + 'static,
    {
        let range = range.into();
        range.checked_size()?;
        self.set_command(Command::ParallelFor {
            range,
            body: Box::new(body),
        })
    }

    /// Run `body` exactly once
    pub fn single_task<F>(&mut self, body: F) -> OffloadResult<()>
    where
        F: FnOnce(&mut KernelArgs) + Send + 'static,
    {
        self.set_command(Command::Single(Box::new(body)))
    }

    fn set_command(&mut self, command: Command) -> OffloadResult<()> {
        if let Some(existing) = &self.command {
            return Err(OffloadError::InvalidConfiguration(format!(
                "command group already holds a {} command",
                existing.kind()
            )));
        }
        self.command = Some(command);
        Ok(())
    }

    /// Close the group; a group without a command acts as a barrier
    pub(crate) fn finish(self) -> CommandGroup {
        CommandGroup {
            tag: self.tag,
            label: self.label,
            requests: self.requests,
            deps: self.deps,
            command: self.command.unwrap_or(Command::Barrier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AccessMode, Buffer, DevicePtr};

    #[test]
    fn test_accessors_get_sequential_slots() {
        let a = Buffer::from_vec(vec![1.0f32; 8]);
        let b = Buffer::<f32>::new(8);
        let mut h = Handler::new();

        let ra = h.read(&a).unwrap();
        let wb = h.write(&b).unwrap();
        assert_eq!(ra.slot, 0);
        assert_eq!(wb.slot, 1);
        assert_eq!(ra.tag, wb.tag);

        let group = h.finish();
        assert_eq!(group.requests.len(), 2);
        assert_eq!(group.requests[0].mode(), AccessMode::ReadOnly);
        assert_eq!(group.requests[1].mode(), AccessMode::WriteOnly);
        assert!(matches!(group.command, Command::Barrier));
    }

    #[test]
    fn test_duplicate_access_rejected() {
        let a = Buffer::from_vec(vec![0u32; 4]);
        let mut h = Handler::new();
        h.read(&a).unwrap();
        let err = h.read_write(&a).unwrap_err();
        assert!(matches!(err, OffloadError::DuplicateAccess(id) if id == a.id().0));
    }

    #[test]
    fn test_geometry_errors() {
        let empty = Buffer::<u8>::new(0);
        let a = Buffer::<u8>::new(10);
        let mut h = Handler::new();

        assert!(matches!(h.read(&empty), Err(OffloadError::InvalidRange(_))));
        assert!(matches!(
            h.access_range::<u8, ReadOnly, _>(&a, 8, 3),
            Err(OffloadError::InvalidRange(_))
        ));
        assert!(matches!(
            h.access_range::<u8, ReadOnly, _>(&a, 2, 0),
            Err(OffloadError::InvalidRange(_))
        ));
        assert!(matches!(
            h.access_range::<u8, ReadOnly, _>(&a, usize::MAX, 2),
            Err(OffloadError::InvalidRange(_))
        ));
        let acc = h.access_range::<u8, ReadOnly, _>(&a, 8, 2).unwrap();
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_released_buffer_is_dangling() {
        let mut a = Buffer::from_vec(vec![1i32; 4]);
        a.release().unwrap();
        let mut h = Handler::new();
        assert!(matches!(
            h.read(&a),
            Err(OffloadError::DanglingBufferReference(_))
        ));
    }

    #[test]
    fn test_usm_requests_are_untracked() {
        let ptr: DevicePtr<f64> = DevicePtr::alloc(4);
        let buf = Buffer::from_vec(vec![0.0f64; 4]);
        let mut h = Handler::new();
        h.write(&ptr).unwrap();
        h.read(&buf).unwrap();
        let group = h.finish();
        assert!(!group.requests[0].tracked);
        assert!(group.requests[1].tracked);
    }

    #[test]
    fn test_overflowing_parallel_for_rejected() {
        let mut h = Handler::new();
        let err = h
            .parallel_for(Range::d3(usize::MAX, 2, 1), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, OffloadError::InvalidRange(_)));
        assert!(err.is_user_error());
        // nothing was recorded, so a valid launch still fits
        h.parallel_for(Range::d2(4, 4), |_, _| {}).unwrap();
    }

    #[test]
    fn test_second_kernel_rejected() {
        let mut h = Handler::new();
        h.single_task(|_| {}).unwrap();
        let err = h.parallel_for(Range::d1(4), |_, _| {}).unwrap_err();
        assert!(matches!(err, OffloadError::InvalidConfiguration(_)));
    }
}
