//! Memory objects kernels can access
//!
//! Two kinds of memory objects are handed to command groups:
//! 1. [`Buffer`]: owned data region, hazard-tracked by the queue, released on
//!    drop with copy-back to its host region
//! 2. [`DevicePtr`]: device-only allocation from `Queue::malloc_device`,
//!    ordered only by explicit dependencies
//!
//! Both share the same [`storage`] backing so a kernel binds them the same way.

pub mod accessor;
pub mod buffer;
pub mod storage;
pub mod usm;

use std::sync::Arc;

pub use accessor::{
    AccessMarker, AccessMode, AccessRequest, Accessor, ReadOnly, ReadWrite, Readable, WriteOnly,
    Writable,
};
pub use buffer::{Buffer, HostMirror};
pub use storage::{BufferId, Element};
pub use usm::DevicePtr;

use storage::Storage;

mod sealed {
    pub trait Sealed {}
}

/// Anything a command group can declare an access on
pub trait MemoryObject<T: Element>: sealed::Sealed {
    #[doc(hidden)]
    fn storage(&self) -> &Arc<Storage<T>>;
}

impl<T: Element> sealed::Sealed for Buffer<'_, T> {}
impl<T: Element> sealed::Sealed for DevicePtr<T> {}

impl<T: Element> MemoryObject<T> for Buffer<'_, T> {
    fn storage(&self) -> &Arc<Storage<T>> {
        Buffer::storage(self)
    }
}

impl<T: Element> MemoryObject<T> for DevicePtr<T> {
    fn storage(&self) -> &Arc<Storage<T>> {
        DevicePtr::storage(self)
    }
}
