//! Execution queue and completion handles

pub mod config;
pub mod event;
pub(crate) mod hazard;
#[allow(clippy::module_inception)]
mod queue;
pub mod stats;

pub use config::QueueConfig;
pub use event::{Event, ProfilingInfo};
pub use queue::{default_async_handler, AsyncHandler, Queue};
pub use stats::QueueStats;
