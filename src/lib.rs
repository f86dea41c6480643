//! offloadforge - host-side task orchestration for accelerator offload
//!
//! Callers create buffers, submit kernel tasks that declare how they access
//! those buffers, and an execution queue orders the tasks by their data
//! hazards and runs them on a selected device. Devices are emulated by
//! worker lanes on a thread pool so every behaviour runs without hardware.

#![allow(clippy::collapsible_else_if)] // Sometimes clearer for control flow
#![allow(clippy::type_complexity)] // Boxed kernel closures
#![allow(clippy::needless_range_loop)] // Clearer for index-space kernels

pub mod device;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod queue;

pub use device::{
    select_device, Aspect, AspectSelector, CpuSelector, DefaultSelector, DeviceInfo,
    DeviceSelector, DeviceType, EmulatedPlatform, GpuSelector, Platform, UsmSelector,
};
pub use error::{ErrorCategory, OffloadError, OffloadResult};
pub use kernel::{Handler, Item, KernelArgs, Range, TaskId, TaskState};
pub use memory::{
    AccessMode, Accessor, Buffer, BufferId, DevicePtr, Element, HostMirror, ReadOnly, ReadWrite,
    WriteOnly,
};
pub use queue::{default_async_handler, Event, ProfilingInfo, Queue, QueueConfig, QueueStats};
