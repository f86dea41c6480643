//! Kernel tasks: iteration domains, command groups and the arguments a
//! running kernel sees

pub mod args;
pub mod handler;
pub mod range;
pub mod task;

pub use args::KernelArgs;
pub use handler::Handler;
pub use range::{Item, Range};
pub use task::{TaskId, TaskState};

pub(crate) use handler::CommandGroup;
pub(crate) use task::{Command, KernelTask};
