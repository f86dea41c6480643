//! Buffers: owned data regions whose accesses the queue hazard-tracks
//!
//! A buffer either borrows a host slice (contents are copied in at creation
//! and copied back on release), owns its data outright, or is device-resident
//! with default-initialised contents. Release happens on drop or through
//! [`Buffer::release`] and always waits for the tasks that use the buffer.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLockReadGuard;

use super::storage::{BufferId, Element, Storage};
use crate::error::{OffloadError, OffloadResult};

pub struct Buffer<'h, T: Element> {
    storage: Arc<Storage<T>>,
    host: Option<&'h mut [T]>,
}

impl<T: Element> Buffer<'static, T> {
    /// Device-resident buffer of `len` default-initialised elements
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![T::default(); len])
    }

    /// Buffer that owns `data`; read it back with [`Buffer::into_vec`] or
    /// [`Buffer::host_mirror`]
    pub fn from_vec(data: Vec<T>) -> Self {
        let storage = Arc::new(Storage::new(data, true));
        tracing::trace!(buffer = %storage.id(), len = storage.len(), "created buffer");
        Self {
            storage,
            host: None,
        }
    }
}

impl<'h, T: Element> Buffer<'h, T> {
    /// Copy-in/copy-out buffer over a host region
    ///
    /// The region stays mutably borrowed until the buffer is released, at
    /// which point it holds the latest contents written by kernels.
    pub fn from_host(host: &'h mut [T]) -> Self {
        let storage = Arc::new(Storage::new(host.to_vec(), true));
        tracing::trace!(buffer = %storage.id(), len = storage.len(), "created host-backed buffer");
        Self {
            storage,
            host: Some(host),
        }
    }

    pub fn id(&self) -> BufferId {
        self.storage.id()
    }

    /// Declared element count
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.storage.is_released()
    }

    pub fn has_host_region(&self) -> bool {
        self.host.is_some()
    }

    /// Wait for every in-flight writer and expose the current contents
    ///
    /// Tasks that write the buffer block at dispatch while the mirror is
    /// alive, so drop it before waiting on the queue.
    pub fn host_mirror(&self) -> OffloadResult<HostMirror<'_, T>> {
        self.ensure_live()?;
        self.storage.wait_writers();
        Ok(HostMirror {
            guard: self.storage.data().read(),
        })
    }

    /// Wait for all users, copy back to the host region and free storage
    ///
    /// Calling it again is a no-op.
    pub fn release(&mut self) -> OffloadResult<()> {
        if self.storage.is_released() {
            return Ok(());
        }
        self.storage.wait_all();

        if let Some(host) = self.host.take() {
            let data = self.storage.data().read();
            host.copy_from_slice(&data);
        }

        if self.storage.release() {
            tracing::debug!(buffer = %self.id(), "released buffer");
        }
        Ok(())
    }

    /// Wait for all users and take the contents, copying back to the host
    /// region if there is one
    pub fn into_vec(mut self) -> OffloadResult<Vec<T>> {
        self.ensure_live()?;
        self.storage.wait_all();

        let data = std::mem::take(&mut *self.storage.data().write());
        if let Some(host) = self.host.take() {
            host.copy_from_slice(&data);
        }
        self.storage.release();
        Ok(data)
    }

    pub(crate) fn storage(&self) -> &Arc<Storage<T>> {
        &self.storage
    }

    fn ensure_live(&self) -> OffloadResult<()> {
        if self.storage.is_released() {
            return Err(OffloadError::DanglingBufferReference(self.id().0));
        }
        Ok(())
    }
}

impl<T: Element> Drop for Buffer<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!(buffer = %self.id(), error = %err, "buffer release failed");
        }
    }
}

impl<T: Element> fmt::Debug for Buffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("host_region", &self.host.is_some())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Read view of a buffer's contents with all writers finished
pub struct HostMirror<'a, T> {
    guard: RwLockReadGuard<'a, Vec<T>>,
}

impl<T> Deref for HostMirror<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_default_initialised() {
        let buf: Buffer<'_, i32> = Buffer::new(8);
        assert_eq!(buf.len(), 8);
        assert!(!buf.has_host_region());
        assert_eq!(&*buf.host_mirror().unwrap(), &[0; 8]);
    }

    #[test]
    fn test_host_region_copy_back_on_release() {
        let mut host = vec![1u32, 2, 3];
        {
            let mut buf = Buffer::from_host(&mut host);
            buf.storage().data().write()[1] = 20;
            buf.release().unwrap();
            assert!(buf.is_released());
            buf.release().unwrap();
        }
        assert_eq!(host, vec![1, 20, 3]);
    }

    #[test]
    fn test_copy_back_on_drop() {
        let mut host = vec![0.0f32; 4];
        {
            let buf = Buffer::from_host(&mut host);
            buf.storage().data().write()[3] = 1.5;
        }
        assert_eq!(host[3], 1.5);
    }

    #[test]
    fn test_mirror_after_release_is_dangling() {
        let mut buf = Buffer::from_vec(vec![1u8, 2]);
        buf.release().unwrap();
        assert!(matches!(
            buf.host_mirror(),
            Err(OffloadError::DanglingBufferReference(_))
        ));
        assert!(buf.into_vec().is_err());
    }

    #[test]
    fn test_into_vec() {
        let buf = Buffer::from_vec(vec![5i64; 3]);
        assert_eq!(buf.into_vec().unwrap(), vec![5, 5, 5]);
    }
}
