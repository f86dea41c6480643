//! Access modes, typed accessors and the type-erased access requests the
//! queue schedules on

use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;

use serde::Serialize;

use super::storage::{BufferId, ErasedStorage};

/// How a task touches a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    /// Prior contents are kept; elements the kernel does not write survive
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn reads(&self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "read_only",
            AccessMode::WriteOnly => "write_only",
            AccessMode::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level access mode carried by an [`Accessor`]
pub trait AccessMarker: sealed::Sealed + Send + Sync + 'static {
    const MODE: AccessMode;
}

/// Modes that allow reading through [`crate::kernel::KernelArgs`]
pub trait Readable: AccessMarker {}

/// Modes that allow writing through [`crate::kernel::KernelArgs`]
pub trait Writable: AccessMarker {}

#[derive(Debug, Clone, Copy)]
pub struct ReadOnly;

#[derive(Debug, Clone, Copy)]
pub struct WriteOnly;

#[derive(Debug, Clone, Copy)]
pub struct ReadWrite;

impl sealed::Sealed for ReadOnly {}
impl sealed::Sealed for WriteOnly {}
impl sealed::Sealed for ReadWrite {}

impl AccessMarker for ReadOnly {
    const MODE: AccessMode = AccessMode::ReadOnly;
}

impl AccessMarker for WriteOnly {
    const MODE: AccessMode = AccessMode::WriteOnly;
}

impl AccessMarker for ReadWrite {
    const MODE: AccessMode = AccessMode::ReadWrite;
}

impl Readable for ReadOnly {}
impl Readable for ReadWrite {}
impl Writable for WriteOnly {}
impl Writable for ReadWrite {}

/// Handle to one declared access, valid inside the kernel body of the
/// command group that created it
///
/// Accessors are plain tokens: they carry no reference to the data, so they
/// can be moved into the kernel closure freely. The memory is reached through
/// [`crate::kernel::KernelArgs`] while the task runs.
pub struct Accessor<T, M> {
    pub(crate) tag: u64,
    pub(crate) slot: usize,
    buffer: BufferId,
    len: usize,
    _marker: PhantomData<fn() -> (T, M)>,
}

impl<T, M: AccessMarker> Accessor<T, M> {
    pub(crate) fn new(tag: u64, slot: usize, buffer: BufferId, len: usize) -> Self {
        Self {
            tag,
            slot,
            buffer,
            len,
            _marker: PhantomData,
        }
    }

    /// Number of elements visible through this accessor
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    pub fn mode(&self) -> AccessMode {
        M::MODE
    }
}

impl<T, M> Clone for Accessor<T, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, M> Copy for Accessor<T, M> {}

impl<T, M: AccessMarker> fmt::Debug for Accessor<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("buffer", &self.buffer)
            .field("mode", &M::MODE)
            .field("len", &self.len)
            .finish()
    }
}

/// Type-erased access declaration attached to a submitted task
#[derive(Clone)]
pub struct AccessRequest {
    pub(crate) storage: Weak<dyn ErasedStorage>,
    pub(crate) buffer: BufferId,
    pub(crate) mode: AccessMode,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    /// Whether the queue infers hazards for this buffer
    pub(crate) tracked: bool,
}

impl AccessRequest {
    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Element offset and count of the accessed window
    pub fn window(&self) -> (usize, usize) {
        (self.offset, self.len)
    }
}

impl fmt::Debug for AccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRequest")
            .field("buffer", &self.buffer)
            .field("mode", &self.mode)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("tracked", &self.tracked)
            .finish()
    }
}
