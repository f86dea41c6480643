//! Device-only allocations for the explicit-transfer path
//!
//! A [`DevicePtr`] names storage on the queue's device. It has no host mirror
//! and the queue does not infer hazards on it: copies and kernels that touch
//! the same allocation are ordered by explicit dependencies or by an in-order
//! queue.

use std::fmt;
use std::mem;
use std::sync::Arc;

use super::storage::{BufferId, Element, Storage};
use crate::error::{OffloadError, OffloadResult};

pub struct DevicePtr<T: Element> {
    storage: Arc<Storage<T>>,
}

impl<T: Element> DevicePtr<T> {
    pub(crate) fn alloc(count: usize) -> Self {
        Self {
            storage: Arc::new(Storage::new(vec![T::default(); count], false)),
        }
    }

    pub fn id(&self) -> BufferId {
        self.storage.id()
    }

    /// Element count of the allocation
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * mem::size_of::<T>()
    }

    pub fn is_freed(&self) -> bool {
        self.storage.is_released()
    }

    pub(crate) fn storage(&self) -> &Arc<Storage<T>> {
        &self.storage
    }

    pub(crate) fn ensure_live(&self) -> OffloadResult<()> {
        if self.is_freed() {
            return Err(OffloadError::DanglingBufferReference(self.id().0));
        }
        Ok(())
    }
}

impl<T: Element> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<T: Element> fmt::Debug for DevicePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePtr")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Convert a byte count into an element count for `T`, checking it against
/// the number of elements available
pub(crate) fn elements_for_bytes<T>(byte_count: usize, available: usize) -> OffloadResult<usize> {
    let size = mem::size_of::<T>().max(1);
    if byte_count % size != 0 {
        return Err(crate::range_error!(
            "byte count {} is not a multiple of the element size {}",
            byte_count,
            size
        ));
    }
    let count = byte_count / size;
    if count > available {
        return Err(crate::range_error!(
            "copy of {} elements exceeds the {} available",
            count,
            available
        ));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_clone_share_storage() {
        let ptr: DevicePtr<f32> = DevicePtr::alloc(16);
        let alias = ptr.clone();
        assert_eq!(ptr.id(), alias.id());
        assert_eq!(ptr.byte_len(), 64);
        assert!(ptr.ensure_live().is_ok());

        ptr.storage().release();
        assert!(alias.is_freed());
        assert!(matches!(
            alias.ensure_live(),
            Err(OffloadError::DanglingBufferReference(_))
        ));
    }

    #[test]
    fn test_elements_for_bytes() {
        assert_eq!(elements_for_bytes::<f32>(16, 4).unwrap(), 4);
        assert_eq!(elements_for_bytes::<f32>(0, 4).unwrap(), 0);
        assert!(elements_for_bytes::<f32>(6, 4).is_err());
        assert!(elements_for_bytes::<f64>(40, 4).is_err());
    }
}
